/// Application state and router builder
///
/// This module defines the shared application state and provides
/// a function to build the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use flagstream_api::{app::AppState, config::Config};
/// use flagstream_shared::config::PubSubConfig;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pubsub = PubSubConfig::from_env()?;
/// let commands = pubsub.connect_redis().await?;
///
/// let mut factory = pubsub.factory();
/// if let Some(commands) = commands.clone() {
///     factory = factory.with_redis(commands);
/// }
///
/// let state = AppState::new(factory.build()?, commands, config);
/// let app = flagstream_api::app::build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::config::Config;
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use flagstream_shared::provider::{Client, PubSubClient, ProviderError};
use flagstream_shared::pubsub::publisher::Publisher;
use flagstream_shared::redis::StreamCommands;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// This is cloned for each request handler via Axum's `State` extractor.
/// Uses Arc internally for cheap cloning.
#[derive(Clone)]
pub struct AppState {
    /// Pub/sub client
    pub client: Arc<PubSubClient>,

    /// Redis handle for health checks; `None` for the managed backend
    pub health: Option<Arc<dyn StreamCommands>>,

    /// Application configuration
    pub config: Arc<Config>,

    /// One publisher per topic, created on first use
    publishers: Arc<RwLock<HashMap<String, Arc<dyn Publisher>>>>,
}

impl AppState {
    /// Creates new application state
    pub fn new(
        client: PubSubClient,
        health: Option<Arc<dyn StreamCommands>>,
        config: Config,
    ) -> Self {
        Self {
            client: Arc::new(client),
            health,
            config: Arc::new(config),
            publishers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Gets the publisher for a topic, creating it on first use
    ///
    /// # Errors
    ///
    /// Returns an error if the client can't create a publisher for `topic`.
    pub async fn publisher(&self, topic: &str) -> Result<Arc<dyn Publisher>, ProviderError> {
        if let Some(publisher) = self.publishers.read().await.get(topic) {
            return Ok(publisher.clone());
        }

        let mut publishers = self.publishers.write().await;
        // Another request may have created it while we waited for the lock
        if let Some(publisher) = publishers.get(topic) {
            return Ok(publisher.clone());
        }

        let publisher = self.client.create_publisher(topic).await?;
        tracing::info!(topic = %topic, "Publisher created");
        publishers.insert(topic.to_string(), publisher.clone());

        Ok(publisher)
    }

    /// Stops every publisher and closes the client
    pub async fn shutdown(&self) {
        let publishers: Vec<_> = self.publishers.write().await.drain().collect();
        for (topic, publisher) in publishers {
            tracing::debug!(topic = %topic, "Stopping publisher");
            publisher.stop().await;
        }
        self.client.close().await;
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// The router is organized as follows:
/// ```text
/// /
/// ├── /health                        # Backend health check
/// └── /v1/                           # API v1 (versioned)
///     └── /topics/:topic/events
///         └── POST                   # Publish a batch of events
/// ```
///
/// # Middleware Stack
///
/// Applied in order (bottom to top):
/// 1. Logging (tower-http TraceLayer)
/// 2. CORS (tower-http CorsLayer)
pub fn build_router(state: AppState) -> Router {
    // Import route handlers
    use crate::routes;

    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    let v1_routes = Router::new().route(
        "/topics/:topic/events",
        post(routes::events::publish_events),
    );

    // Configure CORS based on environment
    let cors = if state.config.api.cors_origins.iter().any(|o| o == "*") {
        // Development mode: permissive CORS
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .max_age(std::time::Duration::from_secs(3600))
    };

    // Combine all routes with middleware stack
    Router::new()
        .merge(health_routes)
        .nest("/v1", v1_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .with_state(state)
}
