/// Event publishing endpoint
///
/// Publishes a batch of events to a topic. Each event is published on its
/// own: one failure doesn't stop the rest, and failures are reported per
/// event ID.
///
/// # Endpoint
///
/// ```text
/// POST /v1/topics/:topic/events
/// ```
///
/// # Request
///
/// ```json
/// {
///   "events": [
///     {
///       "id": "user-42",
///       "kind": "evaluation",
///       "environment_id": "env-production",
///       "timestamp": "2026-01-01T00:00:00Z",
///       "payload": {"feature_id": "dark-mode", "variation": "on"}
///     }
///   ]
/// }
/// ```
///
/// # Response
///
/// ```json
/// {
///   "published": 1,
///   "failed": 0,
///   "errors": {}
/// }
/// ```
///
/// When every event fails with a backend error the request fails with 503.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, State},
    Json,
};
use flagstream_shared::events::Event;
use flagstream_shared::pubsub::publisher::{PublishError, Publisher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Publish request body
#[derive(Debug, Serialize, Deserialize)]
pub struct PublishRequest {
    pub events: Vec<Event>,
}

/// Publish response body
#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Number of events published
    pub published: usize,

    /// Number of events that failed
    #[serde(default)]
    pub failed: usize,

    /// Failure messages keyed by event ID; events sharing an ID share an entry
    #[serde(default)]
    pub errors: HashMap<String, String>,
}

/// Publish handler
pub async fn publish_events(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Json(request): Json<PublishRequest>,
) -> ApiResult<Json<PublishResponse>> {
    validate(&request, state.config.api.max_batch_size)?;

    let publisher = state.publisher(&topic).await?;

    let (published, failures) = publish_each(publisher.as_ref(), &request.events).await;

    if published == 0 {
        if let Some((_, err)) = failures.into_iter().find(|(_, e)| !e.is_terminal()) {
            return Err(err.into());
        }
        return Err(ApiError::BadRequest("no event could be published".to_string()));
    }

    for (id, err) in &failures {
        tracing::warn!(topic = %topic, event_id = %id, error = %err, "Event not published");
    }

    tracing::debug!(topic = %topic, published, failed = failures.len(), "Events published");

    Ok(Json(PublishResponse {
        published,
        failed: failures.len(),
        errors: failures
            .into_iter()
            .map(|(id, err)| (id, err.to_string()))
            .collect(),
    }))
}

/// Publishes every event, counting outcomes per event rather than per ID
async fn publish_each(
    publisher: &dyn Publisher,
    events: &[Event],
) -> (usize, Vec<(String, PublishError)>) {
    let mut published = 0;
    let mut failures = Vec::new();

    for event in events {
        match publisher.publish(event).await {
            Ok(()) => published += 1,
            Err(e) => failures.push((event.id.clone(), e)),
        }
    }

    (published, failures)
}

fn validate(request: &PublishRequest, max_batch_size: usize) -> ApiResult<()> {
    if request.events.is_empty() {
        return Err(ApiError::BadRequest("events must not be empty".to_string()));
    }

    if request.events.len() > max_batch_size {
        return Err(ApiError::PayloadTooLarge(format!(
            "{} events exceeds the limit of {}",
            request.events.len(),
            max_batch_size
        )));
    }

    if let Some(event) = request
        .events
        .iter()
        .find(|e| e.id.is_empty() || e.environment_id.is_empty())
    {
        return Err(ApiError::BadRequest(format!(
            "event '{}' needs an id and an environment_id",
            event.id
        )));
    }

    Ok(())
}
