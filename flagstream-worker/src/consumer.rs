/// Event consumer
///
/// Reads messages from a rate-limited puller's delivery channel, decodes
/// them into events, and dispatches each event to the processors registered
/// for its kind.
///
/// # Architecture
///
/// ```text
/// EventConsumer
///   ├─> mpsc::Receiver<Message>: shared by N worker tasks
///   ├─> decode_event: bytes → Event
///   ├─> ProcessorRegistry: EventKind → [Processor]
///   └─> Message: ack on success or terminal failure, nack otherwise
/// ```
///
/// # Acknowledgement
///
/// | Outcome                          | Action |
/// |----------------------------------|--------|
/// | every processor succeeded        | ack    |
/// | undecodable payload              | ack    |
/// | no processor for the kind        | ack    |
/// | terminal processor error         | ack    |
/// | retryable error or timeout       | nack   |
///
/// Nacked stream messages stay pending and are redelivered by the reclaim
/// loop once their idle time passes.
///
/// # Example
///
/// ```no_run
/// use flagstream_worker::consumer::{ConsumerConfig, EventConsumer};
/// use flagstream_worker::processors::EventCounter;
/// use flagstream_shared::pubsub::message::Message;
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
///
/// # async fn example(messages: mpsc::Receiver<Message>) -> anyhow::Result<()> {
/// let mut consumer = EventConsumer::new(ConsumerConfig::default());
/// consumer.register_processor(Arc::new(EventCounter::new()));
///
/// let consumer = Arc::new(consumer);
/// consumer.run(messages).await?;
/// # Ok(())
/// # }
/// ```

use crate::processors::Processor;
use flagstream_shared::events::{decode_event, Event, EventKind};
use flagstream_shared::pubsub::message::Message;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Event consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Concurrent worker tasks reading the delivery channel
    pub num_workers: usize,

    /// Upper bound on processing one event by one processor
    pub process_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            num_workers: 4,
            process_timeout: Duration::from_secs(30),
        }
    }
}

/// Running totals of message outcomes
#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl ConsumerStats {
    /// Messages taken from the channel
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Messages every processor handled
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Messages acked without being processed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Messages nacked for redelivery
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// How a message was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Processed,
    Dropped,
    Failed,
}

/// Event consumer
///
/// Register processors, wrap in an `Arc`, then call [`EventConsumer::run`].
pub struct EventConsumer {
    /// Configuration
    config: ConsumerConfig,

    /// Processor registry
    processors: HashMap<EventKind, Vec<Arc<dyn Processor>>>,

    /// Outcome counters
    stats: Arc<ConsumerStats>,

    /// Shutdown token
    shutdown_token: CancellationToken,
}

impl EventConsumer {
    /// Creates a consumer with no processors
    pub fn new(config: ConsumerConfig) -> Self {
        EventConsumer {
            config,
            processors: HashMap::new(),
            stats: Arc::new(ConsumerStats::default()),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Registers a processor for every kind it declares
    pub fn register_processor(&mut self, processor: Arc<dyn Processor>) {
        for kind in processor.kinds() {
            tracing::info!(
                processor = %processor.name(),
                kind = %kind.as_str(),
                "Registering processor"
            );
            self.processors
                .entry(*kind)
                .or_default()
                .push(processor.clone());
        }
    }

    /// Gets shutdown token
    ///
    /// Used to signal graceful shutdown from external handlers.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    /// Runs the worker tasks until shutdown or until the channel closes
    ///
    /// A message being processed when shutdown fires is settled before its
    /// worker exits.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker task panics.
    pub async fn run(self: Arc<Self>, messages: mpsc::Receiver<Message>) -> anyhow::Result<()> {
        let workers = self.config.num_workers.max(1);
        tracing::info!(workers, "Event consumer starting");

        let messages = Arc::new(Mutex::new(messages));
        let mut tasks = JoinSet::new();

        for worker in 0..workers {
            let consumer = self.clone();
            let messages = messages.clone();
            tasks.spawn(async move { consumer.worker_loop(worker, messages).await });
        }

        while let Some(joined) = tasks.join_next().await {
            joined?;
        }

        tracing::info!(
            received = self.stats.received(),
            processed = self.stats.processed(),
            dropped = self.stats.dropped(),
            failed = self.stats.failed(),
            "Event consumer stopped"
        );

        Ok(())
    }

    async fn worker_loop(&self, worker: usize, messages: Arc<Mutex<mpsc::Receiver<Message>>>) {
        loop {
            let next = {
                let mut messages = messages.lock().await;
                tokio::select! {
                    biased;
                    _ = self.shutdown_token.cancelled() => None,
                    msg = messages.recv() => msg,
                }
            };

            let Some(msg) = next else {
                tracing::debug!(worker, "Worker exiting");
                return;
            };

            self.stats.received.fetch_add(1, Ordering::Relaxed);

            let counter = match self.handle_message(&msg).await {
                Outcome::Processed => {
                    msg.ack().await;
                    &self.stats.processed
                }
                Outcome::Dropped => {
                    msg.ack().await;
                    &self.stats.dropped
                }
                Outcome::Failed => {
                    msg.nack().await;
                    &self.stats.failed
                }
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn handle_message(&self, msg: &Message) -> Outcome {
        let event = match decode_event(&msg.data) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(message_id = %msg.id, error = %e, "Dropping undecodable message");
                return Outcome::Dropped;
            }
        };

        let Some(processors) = self.processors.get(&event.kind) else {
            tracing::debug!(
                event_id = %event.id,
                kind = %event.kind.as_str(),
                "No processor registered for event kind"
            );
            return Outcome::Dropped;
        };

        for processor in processors {
            if let Some(outcome) = self.run_processor(processor.as_ref(), &event, msg).await {
                return outcome;
            }
        }

        Outcome::Processed
    }

    /// Runs one processor; `None` means it succeeded
    async fn run_processor(
        &self,
        processor: &dyn Processor,
        event: &Event,
        msg: &Message,
    ) -> Option<Outcome> {
        let cancel = self.shutdown_token.child_token();
        let result = tokio::time::timeout(
            self.config.process_timeout,
            processor.process(event, &cancel),
        )
        .await;

        match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) if e.is_terminal() => {
                tracing::warn!(
                    processor = %processor.name(),
                    event_id = %event.id,
                    error = %e,
                    "Dropping event"
                );
                Some(Outcome::Dropped)
            }
            Ok(Err(e)) => {
                tracing::error!(
                    processor = %processor.name(),
                    event_id = %event.id,
                    claimed = msg.is_claimed(),
                    error = %e,
                    "Event processing failed"
                );
                Some(Outcome::Failed)
            }
            Err(_) => {
                cancel.cancel();
                tracing::error!(
                    processor = %processor.name(),
                    event_id = %event.id,
                    timeout_secs = self.config.process_timeout.as_secs(),
                    "Event processing timed out"
                );
                Some(Outcome::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::{EventCounter, ProcessorError, ProcessorResult};
    use async_trait::async_trait;
    use bytes::Bytes;
    use flagstream_shared::events::encode_event;
    use flagstream_shared::pubsub::message::Acknowledger;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Settled {
        acks: AtomicUsize,
        nacks: AtomicUsize,
    }

    struct RecordingAck(Arc<Settled>);

    #[async_trait]
    impl Acknowledger for RecordingAck {
        async fn ack(&self) {
            self.0.acks.fetch_add(1, Ordering::SeqCst);
        }

        async fn nack(&self) {
            self.0.nacks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn message(data: Vec<u8>, settled: &Arc<Settled>) -> Message {
        Message::new(
            "1-0",
            Bytes::from(data),
            HashMap::new(),
            Arc::new(RecordingAck(settled.clone())),
        )
    }

    fn event_message(event: &Event, settled: &Arc<Settled>) -> Message {
        message(encode_event(event).unwrap(), settled)
    }

    /// Fails every goal event with a retryable error
    struct FlakyGoals;

    #[async_trait]
    impl Processor for FlakyGoals {
        fn name(&self) -> &str {
            "flaky_goals"
        }

        fn kinds(&self) -> &[EventKind] {
            &[EventKind::Goal]
        }

        async fn process(&self, _event: &Event, _cancel: &CancellationToken) -> ProcessorResult<()> {
            Err(ProcessorError::Failed("downstream unavailable".to_string()))
        }
    }

    /// Never finishes unless cancelled
    struct Stuck;

    #[async_trait]
    impl Processor for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        fn kinds(&self) -> &[EventKind] {
            &[EventKind::Audit]
        }

        async fn process(&self, _event: &Event, cancel: &CancellationToken) -> ProcessorResult<()> {
            cancel.cancelled().await;
            Err(ProcessorError::Cancelled)
        }
    }

    fn consumer_with(processors: Vec<Arc<dyn Processor>>) -> EventConsumer {
        let mut consumer = EventConsumer::new(ConsumerConfig {
            num_workers: 2,
            process_timeout: Duration::from_secs(5),
        });
        for processor in processors {
            consumer.register_processor(processor);
        }
        consumer
    }

    #[test]
    fn test_default_config() {
        let config = ConsumerConfig::default();
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.process_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_processed_event_is_acked() {
        let counter = Arc::new(EventCounter::new());
        let consumer = consumer_with(vec![counter.clone() as Arc<dyn Processor>]);
        let settled = Arc::new(Settled::default());

        let event = Event::new(EventKind::Evaluation, "env-a", json!({"feature_id": "f1"}));
        let outcome = consumer.handle_message(&event_message(&event, &settled)).await;

        assert_eq!(outcome, Outcome::Processed);
        assert_eq!(counter.count("env-a", EventKind::Evaluation), 1);
    }

    #[tokio::test]
    async fn test_undecodable_and_unhandled_are_dropped() {
        let consumer = consumer_with(vec![Arc::new(FlakyGoals) as Arc<dyn Processor>]);
        let settled = Arc::new(Settled::default());

        let garbage = consumer
            .handle_message(&message(b"not json".to_vec(), &settled))
            .await;
        assert_eq!(garbage, Outcome::Dropped);

        let user = Event::new(EventKind::User, "env-a", json!({}));
        let unhandled = consumer.handle_message(&event_message(&user, &settled)).await;
        assert_eq!(unhandled, Outcome::Dropped);
    }

    #[tokio::test]
    async fn test_terminal_error_drops_retryable_error_fails() {
        let consumer = consumer_with(vec![
            Arc::new(EventCounter::new()) as Arc<dyn Processor>,
            Arc::new(FlakyGoals),
        ]);
        let settled = Arc::new(Settled::default());

        let invalid = Event::new(EventKind::Evaluation, "env-a", json!({}));
        assert_eq!(
            consumer.handle_message(&event_message(&invalid, &settled)).await,
            Outcome::Dropped
        );

        let goal = Event::new(EventKind::Goal, "env-a", json!({"goal_id": "checkout"}));
        assert_eq!(
            consumer.handle_message(&event_message(&goal, &settled)).await,
            Outcome::Failed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_processor() {
        let consumer = consumer_with(vec![Arc::new(Stuck) as Arc<dyn Processor>]);
        let settled = Arc::new(Settled::default());

        let audit = Event::new(EventKind::Audit, "env-a", json!({"action": "flag.update"}));
        let outcome = consumer.handle_message(&event_message(&audit, &settled)).await;

        assert_eq!(outcome, Outcome::Failed);
    }

    #[tokio::test]
    async fn test_run_settles_every_message() {
        let counter = Arc::new(EventCounter::new());
        let consumer = Arc::new(consumer_with(vec![
            counter.clone() as Arc<dyn Processor>,
            Arc::new(FlakyGoals),
        ]));
        let settled = Arc::new(Settled::default());
        let (tx, rx) = mpsc::channel(16);

        for i in 0..6 {
            let event = Event::new(EventKind::User, format!("env-{}", i % 2), json!({}));
            tx.send(event_message(&event, &settled)).await.unwrap();
        }
        let goal = Event::new(EventKind::Goal, "env-0", json!({"goal_id": "checkout"}));
        tx.send(event_message(&goal, &settled)).await.unwrap();
        tx.send(message(b"{}".to_vec(), &settled)).await.unwrap();
        drop(tx);

        consumer.clone().run(rx).await.unwrap();

        let stats = consumer.stats();
        assert_eq!(stats.received(), 8);
        assert_eq!(stats.processed(), 6);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.dropped(), 1);
        assert_eq!(settled.acks.load(Ordering::SeqCst), 7);
        assert_eq!(settled.nacks.load(Ordering::SeqCst), 1);
        assert_eq!(counter.count("env-0", EventKind::User), 3);
    }

    #[tokio::test]
    async fn test_shutdown_stops_workers() {
        let consumer = Arc::new(consumer_with(vec![]));
        let (_tx, rx) = mpsc::channel::<Message>(1);

        let run = tokio::spawn(consumer.clone().run(rx));
        consumer.shutdown_token().cancel();

        run.await.unwrap().unwrap();
        assert_eq!(consumer.stats().received(), 0);
    }
}
