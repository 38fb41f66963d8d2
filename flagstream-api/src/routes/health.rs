/// Health check endpoint
///
/// Provides a simple health check endpoint that verifies:
/// - The server is running
/// - The Redis backend answers PING (Redis backends only)
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "pubsub_type": "redis-stream",
///   "backend": "connected"
/// }
/// ```
///
/// `backend` is `unchecked` for the managed backend.

use crate::{app::AppState, error::ApiResult};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Application version
    pub version: String,

    /// Pub/sub backend type
    pub pubsub_type: String,

    /// Backend status
    pub backend: String,
}

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let backend_status = match &state.health {
        Some(commands) => match commands.ping().await {
            Ok(true) => "connected",
            Ok(false) => "disconnected",
            Err(e) => {
                tracing::warn!(error = %e, "Backend health check failed");
                "disconnected"
            }
        },
        None => "unchecked",
    };

    Ok(Json(HealthResponse {
        status: if backend_status == "disconnected" {
            "degraded".to_string()
        } else {
            "healthy".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        pubsub_type: state.client.pubsub_type().to_string(),
        backend: backend_status.to_string(),
    }))
}
