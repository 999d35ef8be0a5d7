use axum::{extract::State, response::IntoResponse, Extension, Json};
use serde_json::json;

use crate::{
    dto::auth_dto::UpdateProfileRequest,
    error::{Error, Result},
    middleware::auth::AuthUser,
    models::user::Plan,
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/profile",
    responses(
        (status = 200, description = "Profile and plan entitlements"),
        (status = 401, description = "Not signed in")
    )
)]
#[axum::debug_handler]
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse> {
    let profile = state.auth_service.get_profile(&user.id).await?;
    let limits = profile.plan.limits();
    Ok(Json(json!({ "user": profile, "limits": limits })))
}

#[utoipa::path(
    patch,
    path = "/api/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated profile"),
        (status = 400, description = "Invalid display name or plan")
    )
)]
#[axum::debug_handler]
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse> {
    let plan = payload
        .plan
        .as_deref()
        .map(|p| p.parse::<Plan>().map_err(|e| Error::validation("plan", e)))
        .transpose()?;

    let mut profile = None;
    if let Some(name) = payload.display_name.as_deref() {
        profile = Some(state.auth_service.update_display_name(&user.id, name).await?);
    }
    if let Some(plan) = plan {
        profile = Some(state.auth_service.change_plan(&user.id, plan).await?);
    }
    let profile = match profile {
        Some(p) => p,
        None => state.auth_service.get_profile(&user.id).await?,
    };
    Ok(Json(profile))
}
