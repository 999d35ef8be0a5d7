use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::{
    dto::auth_dto::{SignInRequest, SignUpRequest},
    error::Result,
    utils::validation::validate,
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/auth/sign-up",
    request_body = SignUpRequest,
    responses(
        (status = 201, description = "Account created, token issued"),
        (status = 400, description = "Invalid email or weak password"),
        (status = 409, description = "Email already in use")
    )
)]
#[axum::debug_handler]
pub async fn sign_up(
    State(state): State<AppState>,
    Json(payload): Json<SignUpRequest>,
) -> Result<impl IntoResponse> {
    validate(&payload)?;
    let session = state
        .auth_service
        .sign_up(&payload.email, &payload.password, payload.display_name)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[utoipa::path(
    post,
    path = "/api/auth/sign-in",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Token issued"),
        (status = 401, description = "Wrong password"),
        (status = 404, description = "No such user")
    )
)]
#[axum::debug_handler]
pub async fn sign_in(
    State(state): State<AppState>,
    Json(payload): Json<SignInRequest>,
) -> Result<impl IntoResponse> {
    let session = state
        .auth_service
        .sign_in(&payload.email, &payload.password)
        .await?;
    Ok(Json(session))
}
