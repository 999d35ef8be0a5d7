use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::AppState;

#[utoipa::path(
    get,
    path = "/api/cache/stats",
    responses((status = 200, description = "Query cache statistics"))
)]
#[axum::debug_handler]
pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.cache.stats();
    let hit_rate = stats.hit_rate();
    Json(json!({ "stats": stats, "hitRate": hit_rate }))
}
