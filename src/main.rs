use std::net::SocketAddr;
use std::sync::Arc;

use test_buddy_backend::{
    build_router,
    config::Config,
    database::{pool::create_pool, DocumentStore, MemoryStore, PgDocumentStore},
    AppState,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing();

    let (store, store_kind): (Arc<dyn DocumentStore>, &'static str) = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url).await?;
            let store = PgDocumentStore::new(pool);
            store.migrate().await?;
            info!("Using Postgres document store");
            let store: Arc<dyn DocumentStore> = Arc::new(store);
            (store, "postgres")
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store; data is lost on exit");
            let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
            (store, "memory")
        }
    };

    let sweep_every = config.cache_sweep_interval;
    let address = config.server_address.clone();
    let app_state = AppState::new(config, store, store_kind)?;

    tokio::spawn(app_state.cache.clone().run_sweeper(sweep_every));

    let app = build_router(app_state);
    let addr: SocketAddr = address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
