//! End-to-end tests of the Redis Streams publisher and puller
//!
//! Run against the in-memory executor with a paused clock, so idle times and
//! the 30s reclaim ticker advance deterministically.
//!
//! ```bash
//! cargo test -p flagstream-shared --test stream_pubsub_tests
//! ```

use bytes::Bytes;
use flagstream_shared::events::{decode_event, Event, EventKind};
use flagstream_shared::provider::factory::{ClientFactory, PubSubType};
use flagstream_shared::provider::{Client, PullerOptions};
use flagstream_shared::pubsub::message::{handler_fn, Message, MessageHandler};
use flagstream_shared::pubsub::publisher::{Publisher, RawMessage};
use flagstream_shared::pubsub::puller::{PullError, Puller, PullerState};
use flagstream_shared::redis::memory::MemoryStreams;
use flagstream_shared::redis::stream_publisher::StreamPublisher;
use flagstream_shared::redis::stream_puller::{StreamPuller, StreamPullerConfig};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handler forwarding every message to a channel, optionally acking first
fn collecting_handler(ack: bool) -> (Arc<dyn MessageHandler>, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = handler_fn(move |_cancel, msg: Message| {
        let tx = tx.clone();
        async move {
            if ack {
                msg.ack().await;
            }
            let _ = tx.send(msg);
        }
    });
    (handler, rx)
}

fn start(
    puller: &StreamPuller,
    handler: Arc<dyn MessageHandler>,
) -> (CancellationToken, JoinHandle<Result<(), PullError>>) {
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let puller = puller.clone();
        let cancel = cancel.clone();
        async move { puller.pull(cancel, handler).await }
    });
    (cancel, task)
}

/// Collects everything delivered within `window`
async fn drain_for(rx: &mut mpsc::UnboundedReceiver<Message>, window: Duration) -> Vec<Message> {
    let mut messages = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(msg)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        messages.push(msg);
    }
    messages
}

#[tokio::test(start_paused = true)]
async fn test_round_trip() {
    let streams = MemoryStreams::new();
    let publisher = StreamPublisher::new(Arc::new(streams.clone()), "T", 4);
    let puller = StreamPuller::new(
        Arc::new(streams.clone()),
        "sub",
        "T",
        StreamPullerConfig::default().with_partition_count(4),
    );

    publisher
        .publish(&RawMessage::new("m1", b"P".to_vec()))
        .await
        .unwrap();

    let (handler, mut rx) = collecting_handler(true);
    let (cancel, task) = start(&puller, handler);

    let msg = rx.recv().await.unwrap();
    assert_eq!(msg.data, Bytes::from_static(b"P"));
    assert_eq!(msg.attribute("stream"), Some(publisher.stream_key("m1").as_str()));
    assert_eq!(msg.attribute("id"), Some(msg.id.as_str()));
    assert!(!msg.is_claimed());

    cancel.cancel();
    assert!(matches!(task.await.unwrap(), Err(PullError::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn test_backlog_before_group_creation_is_delivered() {
    let streams = MemoryStreams::new();
    let publisher = StreamPublisher::new(Arc::new(streams.clone()), "events", 2);
    for i in 0..5 {
        publisher
            .publish(&RawMessage::new(format!("early-{}", i), b"x".to_vec()))
            .await
            .unwrap();
    }

    let puller = StreamPuller::new(
        Arc::new(streams.clone()),
        "late-subscriber",
        "events",
        StreamPullerConfig::default().with_partition_count(2),
    );
    let (handler, mut rx) = collecting_handler(true);
    let (_cancel, task) = start(&puller, handler);

    let delivered = drain_for(&mut rx, Duration::from_secs(1)).await;
    assert_eq!(delivered.len(), 5);

    puller.close().await.unwrap();
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_unacked_message_is_reclaimed() {
    let streams = MemoryStreams::new();
    let publisher = StreamPublisher::new(Arc::new(streams.clone()), "events", 4);
    let puller = StreamPuller::new(
        Arc::new(streams.clone()),
        "sub",
        "events",
        StreamPullerConfig::default()
            .with_partition_count(4)
            .with_idle_time(Duration::from_secs(1)),
    );

    publisher
        .publish(&RawMessage::new("m1", b"never acked".to_vec()))
        .await
        .unwrap();

    let (handler, mut rx) = collecting_handler(false);
    let (cancel, task) = start(&puller, handler);

    let live = rx.recv().await.unwrap();
    assert!(!live.is_claimed());

    // Next reclaim tick is 30s after start
    let claimed = rx.recv().await.unwrap();
    assert!(claimed.is_claimed());
    assert_eq!(claimed.id, live.id);
    assert_eq!(claimed.data, live.data);
    assert_eq!(claimed.attribute("stream"), live.attribute("stream"));

    cancel.cancel();
    assert!(task.await.unwrap().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_acked_message_is_not_reclaimed() {
    let streams = MemoryStreams::new();
    let publisher = StreamPublisher::new(Arc::new(streams.clone()), "events", 4);
    let puller = StreamPuller::new(
        Arc::new(streams.clone()),
        "sub",
        "events",
        StreamPullerConfig::default()
            .with_partition_count(4)
            .with_idle_time(Duration::from_secs(1)),
    );

    publisher
        .publish(&RawMessage::new("m1", b"acked".to_vec()))
        .await
        .unwrap();

    let (handler, mut rx) = collecting_handler(true);
    let (cancel, task) = start(&puller, handler);

    rx.recv().await.unwrap();

    // Three reclaim ticks
    let redelivered = drain_for(&mut rx, Duration::from_secs(95)).await;
    assert!(redelivered.is_empty());
    assert_eq!(streams.pending_len(&publisher.stream_key("m1"), "sub"), 0);

    cancel.cancel();
    task.await.unwrap().unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_hundred_messages_across_four_partitions() {
    let streams = MemoryStreams::new();
    let publisher = StreamPublisher::new(Arc::new(streams.clone()), "events", 4);
    let puller = StreamPuller::new(
        Arc::new(streams.clone()),
        "sub",
        "events",
        StreamPullerConfig::default()
            .with_partition_count(4)
            .with_batch_size(10),
    );

    let messages: Vec<RawMessage> = (0..100)
        .map(|i| RawMessage::new(format!("msg-{}", i), format!("payload-{}", i).into_bytes()))
        .collect();
    for message in &messages {
        publisher.publish(message).await.unwrap();
    }

    // Every partition got some traffic
    for key in publisher.topic().stream_keys() {
        assert!(streams.stream_len(&key) > 0, "partition {} is empty", key);
    }

    let (handler, mut rx) = collecting_handler(true);
    let (cancel, task) = start(&puller, handler);

    let delivered = drain_for(&mut rx, Duration::from_secs(10)).await;

    let payloads: HashSet<Bytes> = delivered.iter().map(|m| m.data.clone()).collect();
    assert_eq!(delivered.len(), 100);
    assert_eq!(payloads.len(), 100);

    cancel.cancel();
    task.await.unwrap().unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_reclaim_is_bounded_by_task_limit() {
    let streams = MemoryStreams::new();
    let publisher = StreamPublisher::new(Arc::new(streams.clone()), "events", 1);
    let puller = StreamPuller::new(
        Arc::new(streams.clone()),
        "sub",
        "events",
        StreamPullerConfig::default()
            .with_partition_count(1)
            .with_idle_time(Duration::from_secs(1))
            .with_claim_handler_timeout(Duration::from_secs(10))
            .with_max_reclaim_tasks(1),
    );

    for i in 0..3 {
        publisher
            .publish(&RawMessage::new(format!("m{}", i), b"x".to_vec()))
            .await
            .unwrap();
    }

    // Claimed messages stall until their reprocessing timeout
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = handler_fn(move |cancel: CancellationToken, msg: Message| {
        let tx = tx.clone();
        async move {
            let claimed = msg.is_claimed();
            let _ = tx.send(msg);
            if claimed {
                cancel.cancelled().await;
            }
        }
    });
    let (cancel, task) = start(&puller, handler);

    let live = drain_for(&mut rx, Duration::from_secs(1)).await;
    assert_eq!(live.len(), 3);

    // First tick at 30s: one slot, one claim
    let first_tick = drain_for(&mut rx, Duration::from_secs(30)).await;
    assert_eq!(first_tick.len(), 1);
    assert!(first_tick[0].is_claimed());

    // Slot freed by the 10s timeout before the second tick
    let second_tick = drain_for(&mut rx, Duration::from_secs(30)).await;
    assert_eq!(second_tick.len(), 1);
    assert!(second_tick[0].is_claimed());

    assert_eq!(streams.pending_len("events-0", "sub"), 3);

    cancel.cancel();
    task.await.unwrap().unwrap_err();
}

#[tokio::test(start_paused = true)]
async fn test_factory_client_with_events() {
    let streams = MemoryStreams::new();
    let client = ClientFactory::new(PubSubType::RedisStream)
        .with_redis(Arc::new(streams.clone()))
        .with_partition_count(4)
        .build()
        .unwrap();

    let publisher = client.create_publisher("evaluation-events").await.unwrap();
    let puller = client
        .create_puller(
            "event-persister",
            "evaluation-events",
            PullerOptions::default().with_batch_size(5),
        )
        .await
        .unwrap();

    let event = Event::new(
        EventKind::Evaluation,
        "env-production",
        json!({"feature_id": "dark-mode", "variation": "on"}),
    )
    .with_id("user-42");
    publisher.publish(&event).await.unwrap();

    let (handler, mut rx) = collecting_handler(true);
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let puller = puller.clone();
        let cancel = cancel.clone();
        async move { puller.pull(cancel, handler).await }
    });

    let msg = rx.recv().await.unwrap();
    let decoded = decode_event(&msg.data).unwrap();
    assert_eq!(decoded, event);

    puller.close().await.unwrap();
    puller.close().await.unwrap();
    assert!(task.await.unwrap().is_ok());

    let again = puller.pull(cancel, collecting_handler(true).0).await;
    assert!(matches!(again, Err(PullError::Closed)));
}

#[tokio::test(start_paused = true)]
async fn test_close_during_pull_returns_ok() {
    let puller = StreamPuller::new(
        Arc::new(MemoryStreams::new()),
        "sub",
        "events",
        StreamPullerConfig::default().with_partition_count(2),
    );
    let (handler, _rx) = collecting_handler(true);
    let (_cancel, task) = start(&puller, handler);

    while puller.state() != PullerState::Running {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    puller.close().await.unwrap();
    assert!(task.await.unwrap().is_ok());
    assert_eq!(puller.state(), PullerState::Closed);
}
