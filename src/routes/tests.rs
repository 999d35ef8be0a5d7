use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};

use crate::{
    dto::test_dto::{ListTestsQuery, MoveTestsRequest, SaveTestRequest, SavedTestResponse, SubmitTestRequest},
    error::Result,
    middleware::auth::AuthUser,
    models::test_history::TestHistory,
    utils::time::now,
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/tests",
    params(ListTestsQuery),
    responses((status = 200, description = "A page of tests, newest first"))
)]
#[axum::debug_handler]
pub async fn list_tests(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListTestsQuery>,
) -> Result<impl IntoResponse> {
    let page = state
        .history_service
        .get_user_test_history(&user.id, query.into())
        .await?;
    Ok(Json(page))
}

#[axum::debug_handler]
pub async fn save_test(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<SaveTestRequest>,
) -> Result<impl IntoResponse> {
    let profile = state.auth_service.get_profile(&user.id).await?;
    state
        .history_service
        .check_monthly_quota(&user.id, profile.plan)
        .await?;
    if let Some(folder_id) = payload.folder_id.as_deref() {
        state.folder_service.get_folder(&user.id, folder_id).await?;
    }
    let history = TestHistory {
        id: String::new(),
        user_id: user.id.clone(),
        test_name: payload.test_name,
        file_name: payload.file_name,
        file_type: payload.file_type,
        extracted_text: payload.extracted_text,
        quiz_type: payload.quiz_type,
        questions: payload.questions,
        user_answers: payload.user_answers,
        score: payload.score,
        folder_id: payload.folder_id,
        created_at: now(),
        completed_at: None,
    };
    let id = state.history_service.save_test_history(history).await?;
    Ok((StatusCode::CREATED, Json(SavedTestResponse { id })))
}

#[axum::debug_handler]
pub async fn get_test(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.history_service.get_test(&user.id, &id).await?))
}

#[utoipa::path(
    delete,
    path = "/api/tests/{id}",
    params(("id" = String, Path, description = "Test id")),
    responses(
        (status = 204, description = "Both copies deleted"),
        (status = 404, description = "Test not found")
    )
)]
#[axum::debug_handler]
pub async fn delete_test(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.history_service.delete_test_history(&user.id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn submit_test(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(payload): Json<SubmitTestRequest>,
) -> Result<impl IntoResponse> {
    let test = state
        .history_service
        .complete_test(&user.id, &id, payload.answers)
        .await?;
    Ok(Json(test))
}

#[axum::debug_handler]
pub async fn retake_test(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let profile = state.auth_service.get_profile(&user.id).await?;
    let test = state
        .history_service
        .retake_test(&user.id, &id, profile.plan)
        .await?;
    Ok(Json(test))
}

#[utoipa::path(
    post,
    path = "/api/tests/move",
    request_body = MoveTestsRequest,
    responses(
        (status = 200, description = "Batch result, failed operations listed"),
        (status = 404, description = "Target folder not found")
    )
)]
#[axum::debug_handler]
pub async fn move_tests(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<MoveTestsRequest>,
) -> Result<impl IntoResponse> {
    let result = state
        .history_service
        .move_tests_to_folder(&user.id, &payload.test_ids, payload.folder_id.as_deref())
        .await?;
    Ok(Json(result))
}
