use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};

use crate::{
    dto::folder_dto::{CreateFolderRequest, FolderListResponse, UpdateFolderRequest},
    error::Result,
    middleware::auth::AuthUser,
    services::folder_service::FolderChanges,
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/folders",
    responses((status = 200, description = "The user's folders, by name"))
)]
#[axum::debug_handler]
pub async fn list_folders(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse> {
    let profile = state.auth_service.get_profile(&user.id).await?;
    let items = state.folder_service.list_folders(&user.id).await?;
    Ok(Json(FolderListResponse {
        items,
        max_folders: profile.plan.limits().max_folders,
    }))
}

#[utoipa::path(
    post,
    path = "/api/folders",
    request_body = CreateFolderRequest,
    responses(
        (status = 201, description = "Folder created"),
        (status = 412, description = "Plan folder allowance used up")
    )
)]
#[axum::debug_handler]
pub async fn create_folder(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<CreateFolderRequest>,
) -> Result<impl IntoResponse> {
    let profile = state.auth_service.get_profile(&user.id).await?;
    let folder = state
        .folder_service
        .create_folder(&user.id, profile.plan, &payload.name, payload.description, payload.color)
        .await?;
    Ok((StatusCode::CREATED, Json(folder)))
}

#[utoipa::path(
    patch,
    path = "/api/folders/{id}",
    params(("id" = String, Path, description = "Folder id")),
    request_body = UpdateFolderRequest,
    responses(
        (status = 200, description = "Folder updated"),
        (status = 404, description = "Folder not found")
    )
)]
#[axum::debug_handler]
pub async fn update_folder(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateFolderRequest>,
) -> Result<impl IntoResponse> {
    let changes = FolderChanges {
        name: payload.name,
        description: payload.description,
        color: payload.color,
    };
    let folder = state.folder_service.update_folder(&user.id, &id, changes).await?;
    Ok(Json(folder))
}

#[utoipa::path(
    delete,
    path = "/api/folders/{id}",
    params(("id" = String, Path, description = "Folder id")),
    responses(
        (status = 200, description = "Folder deleted, its tests are unorganized"),
        (status = 404, description = "Folder not found")
    )
)]
#[axum::debug_handler]
pub async fn delete_folder(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let deletion = state.folder_service.delete_folder(&user.id, &id).await?;
    Ok(Json(deletion))
}
