/// HTTP tests for the API server
///
/// Drive the router with `tower::ServiceExt::oneshot` against an in-memory
/// stream backend, then read the streams back to check what was published.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use flagstream_api::app::{build_router, AppState};
use flagstream_api::config::Config;
use flagstream_api::routes::events::PublishResponse;
use flagstream_api::routes::health::HealthResponse;
use flagstream_shared::events::{decode_event, Event, EventKind};
use flagstream_shared::provider::{ClientFactory, PubSubType};
use flagstream_shared::redis::commands::StreamCommands;
use flagstream_shared::redis::{MemoryStreams, StreamTopic};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const PARTITIONS: u32 = 4;

fn app_with(streams: &MemoryStreams, config: Config) -> Router {
    let commands: Arc<dyn StreamCommands> = Arc::new(streams.clone());
    let client = ClientFactory::new(PubSubType::RedisStream)
        .with_redis(commands.clone())
        .with_partition_count(PARTITIONS)
        .build()
        .unwrap();

    build_router(AppState::new(client, Some(commands), config))
}

fn publish_request(topic: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/v1/topics/{}/events", topic))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_reports_backend() {
    let app = app_with(&MemoryStreams::new(), Config::default());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = body_json(response).await;
    assert_eq!(health.status, "healthy");
    assert_eq!(health.pubsub_type, "redis-stream");
    assert_eq!(health.backend, "connected");
}

#[tokio::test]
async fn test_publish_lands_on_partitioned_streams() {
    let streams = MemoryStreams::new();
    let app = app_with(&streams, Config::default());

    let events: Vec<Event> = (0..8)
        .map(|i| {
            Event::new(
                EventKind::Evaluation,
                "env-production",
                json!({"feature_id": format!("flag-{}", i)}),
            )
        })
        .collect();

    let response = app
        .oneshot(publish_request("evaluation-events", json!({ "events": events })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: PublishResponse = body_json(response).await;
    assert_eq!(body.published, 8);
    assert_eq!(body.failed, 0);
    assert!(body.errors.is_empty());

    let topic = StreamTopic::new("evaluation-events", PARTITIONS);
    let total: usize = topic.stream_keys().iter().map(|k| streams.stream_len(k)).sum();
    assert_eq!(total, 8);

    // Each event is on the partition its ID hashes to
    let first = &events[0];
    let key = topic.stream_key_for(&first.id);
    streams
        .xgroup_create_mkstream(&key, "check", "0")
        .await
        .unwrap();
    let batches = streams
        .xread_group("check", "c1", &[key.clone()], 100, Duration::ZERO)
        .await
        .unwrap();
    let found = batches
        .into_iter()
        .flat_map(|b| b.entries)
        .map(|entry| decode_event(&entry.into_payload()).unwrap())
        .any(|event| event.id == first.id);
    assert!(found);
}

#[tokio::test]
async fn test_empty_batch_is_rejected() {
    let app = app_with(&MemoryStreams::new(), Config::default());

    let response = app
        .oneshot(publish_request("events", json!({ "events": [] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_batch_is_rejected() {
    let mut config = Config::default();
    config.api.max_batch_size = 2;
    let streams = MemoryStreams::new();
    let app = app_with(&streams, config);

    let events: Vec<Event> = (0..3)
        .map(|_| Event::new(EventKind::Goal, "env-a", json!({"goal_id": "signup"})))
        .collect();

    let response = app
        .oneshot(publish_request("goal-events", json!({ "events": events })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let topic = StreamTopic::new("goal-events", PARTITIONS);
    assert!(topic.stream_keys().iter().all(|k| streams.stream_len(k) == 0));
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let app = app_with(&MemoryStreams::new(), Config::default());

    let response = app
        .oneshot(publish_request("events", json!({ "events": [{"kind": "nope"}] })))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_events_sharing_an_id_are_each_published() {
    let streams = MemoryStreams::new();
    let app = app_with(&streams, Config::default());

    let events: Vec<Event> = (0..3)
        .map(|i| {
            Event::new(EventKind::Goal, "env-production", json!({"goal_id": format!("g-{}", i)}))
                .with_id("user-42")
        })
        .collect();

    let response = app
        .oneshot(publish_request("goal-events", json!({ "events": events })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: PublishResponse = body_json(response).await;
    assert_eq!(body.published, 3);
    assert_eq!(body.failed, 0);

    let topic = StreamTopic::new("goal-events", PARTITIONS);
    assert_eq!(streams.stream_len(&topic.stream_key_for("user-42")), 3);
}
