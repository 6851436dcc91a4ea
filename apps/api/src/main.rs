mod autosave;
mod clock;
mod collab;
mod config;
mod db;
mod document;
mod errors;
mod models;
mod routes;
mod scoring;
mod session;
mod state;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::clock::SystemClock;
use crate::collab::redis_transport::RedisTransport;
use crate::collab::RealtimeTransport;
use crate::config::Config;
use crate::db::create_pool;
use crate::routes::build_router;
use crate::session::registry::{SessionRegistry, TransportFactory};
use crate::state::AppState;
use crate::store::postgres::PgDocumentStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting resume session service v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    let store = Arc::new(PgDocumentStore::new(db));

    // Initialize Redis. Every session gets its own pub/sub link.
    let redis = redis::Client::open(config.redis_url.clone())?;
    info!("Redis client initialized");
    let transports: TransportFactory = Arc::new(move || {
        Arc::new(RedisTransport::new(redis.clone())) as Arc<dyn RealtimeTransport>
    });

    info!(
        debounce_ms = config.session.autosave_debounce.as_millis() as u64,
        cooldown_ms = config.session.autosave_cooldown.as_millis() as u64,
        throttle_ms = config.session.collab_throttle.as_millis() as u64,
        "Session timing configured"
    );

    let sessions = Arc::new(SessionRegistry::new(
        store,
        transports,
        Arc::new(SystemClock),
        config.session,
    ));

    // Build app state
    let state = AppState {
        config: config.clone(),
        sessions: Arc::clone(&sessions),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the editor has a fixed host

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sessions.shutdown_all().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
