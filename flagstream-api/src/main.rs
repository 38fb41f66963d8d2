//! # Flagstream API Server
//!
//! HTTP gateway publishing feature-flag events to the configured pub/sub
//! backend.
//!
//! ## Architecture
//!
//! The API server is built with Axum and provides:
//! - `POST /v1/topics/:topic/events`: batch publishing with per-event errors
//! - `GET /health`: backend health
//!
//! ## Usage
//!
//! ```bash
//! PUBSUB_TYPE=redis-stream PUBSUB_REDIS_URL=redis://localhost:6379 \
//!     cargo run -p flagstream-api
//! ```

use flagstream_api::{
    app::{build_router, AppState},
    config::Config,
};
use flagstream_shared::config::PubSubConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flagstream_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Flagstream API Server v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;
    let pubsub = PubSubConfig::from_env()?;

    let commands = pubsub.connect_redis().await?;
    let mut factory = pubsub.factory();
    if let Some(commands) = commands.clone() {
        factory = factory.with_redis(commands);
    }
    let client = factory.build()?;

    let bind_address = config.bind_address();
    let state = AppState::new(client, commands, config);
    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Server listening on http://{}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received, exiting...");
        })
        .await?;

    state.shutdown().await;

    Ok(())
}
