use axum::{response::IntoResponse, Json};
use utoipa::OpenApi;

use crate::dto::{
    auth_dto::{SignInRequest, SignUpRequest, UpdateProfileRequest},
    folder_dto::{CreateFolderRequest, UpdateFolderRequest},
    test_dto::MoveTestsRequest,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        super::health::health,
        super::auth::sign_up,
        super::auth::sign_in,
        super::profile::get_profile,
        super::profile::update_profile,
        super::tests::list_tests,
        super::tests::delete_test,
        super::tests::move_tests,
        super::folders::list_folders,
        super::folders::create_folder,
        super::folders::update_folder,
        super::folders::delete_folder,
        super::cache::cache_stats,
    ),
    components(schemas(
        SignUpRequest,
        SignInRequest,
        UpdateProfileRequest,
        CreateFolderRequest,
        UpdateFolderRequest,
        MoveTestsRequest,
    )),
    tags((name = "test-buddy", description = "Quiz history, folders and accounts"))
)]
pub struct ApiDoc;

pub async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
