pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};
use reqwest::Client;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::config::Config;
use crate::database::DocumentStore;
use crate::error::{Error, ErrorKind, Result};
use crate::middleware::rate_limit::RateLimiter;
use crate::services::{
    ai_service::AIService, auth_service::AuthService, batch_service::BatchOperations,
    folder_service::FolderService, history_service::HistoryService, query_cache::QueryCache,
};

/// Every service, built once at startup around one store handle.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store_kind: &'static str,
    pub store: Arc<dyn DocumentStore>,
    pub cache: QueryCache,
    pub batch: BatchOperations,
    pub auth_service: AuthService,
    pub history_service: HistoryService,
    pub folder_service: FolderService,
    pub ai_service: AIService,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn DocumentStore>, store_kind: &'static str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::backend(ErrorKind::Internal, format!("http client: {}", e)))?;

        let retry = config.retry.clone();
        let cache = QueryCache::new(store.clone(), config.cache.clone());
        let batch = BatchOperations::new(store.clone());
        let auth_service = AuthService::new(
            store.clone(),
            cache.clone(),
            retry.clone(),
            config.jwt_secret.clone(),
            config.token_ttl_hours,
        );
        let history_service =
            HistoryService::new(store.clone(), cache.clone(), batch.clone(), retry.clone());
        let folder_service =
            FolderService::new(store.clone(), cache.clone(), history_service.clone(), retry.clone());
        let ai_service = AIService::new(
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
            http_client,
            retry,
        )
        .with_models(config.openai_models.clone());
        let rate_limiter =
            RateLimiter::new(config.rate_limit_rps).trust_forwarded_for(config.trust_forwarded_for);

        Ok(Self {
            config: Arc::new(config),
            store_kind,
            store,
            cache,
            batch,
            auth_service,
            history_service,
            folder_service,
            ai_service,
            rate_limiter,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let public_api = Router::new()
        .route("/api/auth/sign-up", post(routes::auth::sign_up))
        .route("/api/auth/sign-in", post(routes::auth::sign_in));

    let user_api = Router::new()
        .route(
            "/api/profile",
            get(routes::profile::get_profile).patch(routes::profile::update_profile),
        )
        .route("/api/quizzes/generate", post(routes::quizzes::generate_quiz))
        .route(
            "/api/tests",
            get(routes::tests::list_tests).post(routes::tests::save_test),
        )
        .route("/api/tests/move", post(routes::tests::move_tests))
        .route(
            "/api/tests/:id",
            get(routes::tests::get_test).delete(routes::tests::delete_test),
        )
        .route("/api/tests/:id/submit", post(routes::tests::submit_test))
        .route("/api/tests/:id/retake", post(routes::tests::retake_test))
        .route(
            "/api/folders",
            get(routes::folders::list_folders).post(routes::folders::create_folder),
        )
        .route(
            "/api/folders/:id",
            patch(routes::folders::update_folder).delete(routes::folders::delete_folder),
        )
        .route("/api/cache/stats", get(routes::cache::cache_stats))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    let api = public_api.merge(user_api).layer(axum::middleware::from_fn_with_state(
        state.rate_limiter.clone(),
        middleware::rate_limit::rps_middleware,
    ));

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/openapi.json", get(routes::docs::openapi_json))
        .merge(api)
        .with_state(state.clone())
        .layer(middleware::cors::cors_layer(&state.config.cors_origins))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
}
