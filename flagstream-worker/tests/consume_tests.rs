//! Worker pipeline tests
//!
//! Publish events through a factory-built stream client, consume them with
//! the rate-limited puller and the event consumer, and check what was
//! processed and acknowledged.
//!
//! ```bash
//! cargo test -p flagstream-worker --test consume_tests
//! ```

use flagstream_shared::events::{Event, EventKind};
use flagstream_shared::provider::{Client, ClientFactory, PubSubType, PullerOptions};
use flagstream_shared::pubsub::rate_limited::RateLimitedPuller;
use flagstream_shared::redis::{MemoryStreams, StreamTopic};
use flagstream_worker::consumer::{ConsumerConfig, EventConsumer};
use flagstream_worker::processors::EventCounter;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const PARTITIONS: u32 = 4;

#[tokio::test(start_paused = true)]
async fn test_events_are_processed_and_acked() {
    let streams = MemoryStreams::new();
    let client = ClientFactory::new(PubSubType::RedisStream)
        .with_redis(Arc::new(streams.clone()))
        .with_partition_count(PARTITIONS)
        .build()
        .unwrap();

    let publisher = client.create_publisher("flag-events").await.unwrap();
    for i in 0..12 {
        let event = Event::new(
            EventKind::Evaluation,
            format!("env-{}", i % 3),
            json!({"feature_id": "dark-mode", "variation": "on"}),
        );
        publisher.publish(&event).await.unwrap();
    }
    for _ in 0..4 {
        let event = Event::new(EventKind::Goal, "env-0", json!({"goal_id": "checkout"}));
        publisher.publish(&event).await.unwrap();
    }
    // Rejected by the counter, acked without processing
    let invalid = Event::new(EventKind::Evaluation, "env-0", json!({}));
    publisher.publish(&invalid).await.unwrap();

    let puller = client
        .create_puller("event-persister", "flag-events", PullerOptions::default())
        .await
        .unwrap();
    let (limited, messages) = RateLimitedPuller::new(puller, 0);

    let counter = Arc::new(EventCounter::new());
    let mut consumer = EventConsumer::new(ConsumerConfig {
        num_workers: 3,
        process_timeout: Duration::from_secs(5),
    });
    consumer.register_processor(counter.clone());
    let consumer = Arc::new(consumer);
    let shutdown = consumer.shutdown_token();

    let pull = tokio::spawn({
        let cancel = shutdown.clone();
        async move { limited.run(cancel).await }
    });
    let consume = tokio::spawn(consumer.clone().run(messages));

    let stats = consumer.stats();
    while stats.processed() + stats.dropped() + stats.failed() < 17 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    shutdown.cancel();
    assert!(pull.await.unwrap().unwrap_err().is_cancelled());
    consume.await.unwrap().unwrap();

    assert_eq!(stats.processed(), 16);
    assert_eq!(stats.dropped(), 1);
    assert_eq!(stats.failed(), 0);

    assert_eq!(counter.count("env-0", EventKind::Evaluation), 4);
    assert_eq!(counter.count("env-1", EventKind::Evaluation), 4);
    assert_eq!(counter.count("env-0", EventKind::Goal), 4);

    let topic = StreamTopic::new("flag-events", PARTITIONS);
    for key in topic.stream_keys() {
        assert_eq!(streams.pending_len(&key, "event-persister"), 0, "{} has pending entries", key);
    }
}
