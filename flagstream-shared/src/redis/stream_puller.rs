/// Partitioned Redis Stream puller
///
/// Consumes every partition stream of a topic through one consumer group
/// (the subscription), with at-least-once delivery:
/// - **Read loop**: XREADGROUP BLOCK across every partition that has the group, handler invoked
///   inline for each entry, exponential backoff on errors
/// - **Reclaim loop**: periodically claims entries left pending longer than
///   the idle threshold and redelivers them with `claimed=true`
///
/// # Architecture
///
/// ```text
///                   ┌──────────────── StreamPuller ────────────────┐
/// {topic}-0 ─┐      │                                              │
/// {topic}-1 ─┼─XREADGROUP BLOCK──> read loop ──handler(msg)──> XACK │
///    ...     │      │                                              │
/// {topic}-N ─┘      │  every 30s: XPENDING IDLE ─> XCLAIM ─> task  │
///                   │             (bounded by max_reclaim_tasks)   │
///                   └──────────────────────────────────────────────┘
/// ```
///
/// # Lifecycle
///
/// `Idle` → `Starting` (group creation) → `Running` → `Closed`. A puller is
/// pulled at most once; cancellation and [`Puller::close`] both end in `Closed`.
///
/// # Example
///
/// ```no_run
/// use flagstream_shared::pubsub::message::{handler_fn, Message};
/// use flagstream_shared::pubsub::puller::Puller;
/// use flagstream_shared::redis::client::{RedisClient, RedisConfig};
/// use flagstream_shared::redis::stream_puller::{StreamPuller, StreamPullerConfig};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = RedisClient::new(RedisConfig::from_env()?).await?;
/// let puller = StreamPuller::new(
///     Arc::new(client),
///     "event-persister",
///     "evaluation-events",
///     StreamPullerConfig::default(),
/// );
///
/// let handler = handler_fn(|_cancel, msg: Message| async move {
///     println!("{} from {:?}", msg.id, msg.attribute("stream"));
///     msg.ack().await;
/// });
///
/// puller.pull(CancellationToken::new(), handler).await?;
/// # Ok(())
/// # }
/// ```

use crate::pubsub::backoff::Backoff;
use crate::pubsub::message::{
    Acknowledger, Message, MessageHandler, ATTR_CLAIMED, ATTR_ID, ATTR_STREAM,
};
use crate::pubsub::puller::{PullError, Puller, PullerState};
use crate::redis::client::RedisClientError;
use crate::redis::commands::{StreamBatch, StreamCommands, StreamEntry};
use crate::redis::partition::{StreamTopic, DEFAULT_PARTITION_COUNT};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Group start position: the whole backlog
const GROUP_START_ID: &str = "0";

/// Stream puller configuration
#[derive(Debug, Clone)]
pub struct StreamPullerConfig {
    /// Number of partitions of the topic (default: 16)
    pub partition_count: u32,

    /// Maximum entries per stream per read (default: 10)
    pub batch_size: usize,

    /// How long a read blocks waiting for data (default: 5s)
    pub block_time: Duration,

    /// Idle time after which a pending entry is reclaimed (default: 60s)
    pub idle_time: Duration,

    /// Interval between reclaim passes (default: 30s)
    pub reclaim_interval: Duration,

    /// Time limit for reprocessing one claimed entry (default: 30s)
    pub claim_handler_timeout: Duration,

    /// Maximum pending entries queried per partition per pass (default: 10)
    pub pending_query_count: usize,

    /// Maximum claimed entries being reprocessed at once (default: 64)
    pub max_reclaim_tasks: usize,
}

impl Default for StreamPullerConfig {
    fn default() -> Self {
        Self {
            partition_count: DEFAULT_PARTITION_COUNT,
            batch_size: 10,
            block_time: Duration::from_secs(5),
            idle_time: Duration::from_secs(60),
            reclaim_interval: Duration::from_secs(30),
            claim_handler_timeout: Duration::from_secs(30),
            pending_query_count: 10,
            max_reclaim_tasks: 64,
        }
    }
}

impl StreamPullerConfig {
    pub fn with_partition_count(mut self, partition_count: u32) -> Self {
        self.partition_count = partition_count;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_block_time(mut self, block_time: Duration) -> Self {
        self.block_time = block_time;
        self
    }

    pub fn with_idle_time(mut self, idle_time: Duration) -> Self {
        self.idle_time = idle_time;
        self
    }

    pub fn with_reclaim_interval(mut self, reclaim_interval: Duration) -> Self {
        self.reclaim_interval = reclaim_interval;
        self
    }

    pub fn with_claim_handler_timeout(mut self, claim_handler_timeout: Duration) -> Self {
        self.claim_handler_timeout = claim_handler_timeout;
        self
    }

    pub fn with_pending_query_count(mut self, pending_query_count: usize) -> Self {
        self.pending_query_count = pending_query_count;
        self
    }

    pub fn with_max_reclaim_tasks(mut self, max_reclaim_tasks: usize) -> Self {
        self.max_reclaim_tasks = max_reclaim_tasks;
        self
    }
}

/// Redis Stream puller for one subscription of one topic
#[derive(Clone)]
pub struct StreamPuller {
    inner: Arc<Inner>,
}

struct Inner {
    commands: Arc<dyn StreamCommands>,
    subscription: String,
    topic: StreamTopic,
    consumer: String,
    config: StreamPullerConfig,
    state: Mutex<PullerState>,
    done: CancellationToken,
    /// Set once when the pull starts; the reclaim loop only reads it
    handler: OnceLock<Arc<dyn MessageHandler>>,
    reclaim_slots: Arc<Semaphore>,
}

impl StreamPuller {
    /// Creates a puller
    ///
    /// # Arguments
    ///
    /// * `commands` - Command executor
    /// * `subscription` - Consumer group name
    /// * `topic` - Topic base name
    /// * `config` - Puller configuration
    pub fn new(
        commands: Arc<dyn StreamCommands>,
        subscription: impl Into<String>,
        topic: impl Into<String>,
        config: StreamPullerConfig,
    ) -> Self {
        let subscription = subscription.into();
        let topic = topic.into();

        // Unique per puller instance; not persisted
        let consumer = format!(
            "{}-{}-{}",
            subscription,
            topic,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );

        Self {
            inner: Arc::new(Inner {
                commands,
                topic: StreamTopic::new(topic, config.partition_count),
                subscription,
                consumer,
                reclaim_slots: Arc::new(Semaphore::new(config.max_reclaim_tasks)),
                config,
                state: Mutex::new(PullerState::Idle),
                done: CancellationToken::new(),
                handler: OnceLock::new(),
            }),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> PullerState {
        *self.inner.lock_state()
    }

    /// Consumer name used in the group
    pub fn consumer_name(&self) -> &str {
        &self.inner.consumer
    }

    pub fn topic(&self) -> &StreamTopic {
        &self.inner.topic
    }
}

#[async_trait]
impl Puller for StreamPuller {
    async fn pull(
        &self,
        cancel: CancellationToken,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), PullError> {
        {
            let mut state = self.inner.lock_state();
            match *state {
                PullerState::Closed => return Err(PullError::Closed),
                PullerState::Starting | PullerState::Running => {
                    return Err(PullError::AlreadyPulling)
                }
                PullerState::Idle => *state = PullerState::Starting,
            }
        }

        // Idle is left exactly once, so this is the only write
        let _ = self.inner.handler.set(handler.clone());

        tracing::info!(
            subscription = %self.inner.subscription,
            topic = %self.inner.topic.base(),
            consumer = %self.inner.consumer,
            partitions = self.inner.topic.partition_count(),
            "Starting stream puller"
        );

        let streams = match self.inner.create_groups().await {
            Ok(streams) => streams,
            Err(e) => {
                tracing::error!(
                    subscription = %self.inner.subscription,
                    topic = %self.inner.topic.base(),
                    error = %e,
                    "No consumer group could be created"
                );
                self.inner.shutdown();
                return Err(PullError::Backend(e));
            }
        };

        let reader = match self.inner.commands.dedicated().await {
            Ok(reader) => reader,
            Err(e) => {
                tracing::warn!(
                    subscription = %self.inner.subscription,
                    error = %e,
                    "No dedicated read connection, sharing the command connection"
                );
                self.inner.commands.clone()
            }
        };

        {
            let mut state = self.inner.lock_state();
            if *state == PullerState::Closed {
                return Ok(());
            }
            *state = PullerState::Running;
        }

        // Handlers observe both the caller's cancellation and close()
        let delivery = self.inner.done.child_token();
        tokio::spawn({
            let delivery = delivery.clone();
            let cancel = cancel.clone();
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => delivery.cancel(),
                    _ = delivery.cancelled() => {}
                }
            }
        });

        let reclaim = tokio::spawn(
            self.inner
                .clone()
                .reclaim_loop(delivery.clone(), streams.clone()),
        );

        let result = self
            .inner
            .read_loop(cancel, delivery, reader, handler, &streams)
            .await;

        if let Err(e) = reclaim.await {
            tracing::error!(subscription = %self.inner.subscription, error = %e, "Reclaim loop panicked");
        }

        result
    }

    async fn close(&self) -> Result<(), PullError> {
        self.inner.shutdown();
        Ok(())
    }

    fn subscription_name(&self) -> String {
        format!("{}:{}", self.inner.subscription, self.inner.topic.base())
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, PullerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn shutdown(&self) {
        let mut state = self.lock_state();
        if *state != PullerState::Closed {
            *state = PullerState::Closed;
            self.done.cancel();

            tracing::info!(
                subscription = %self.subscription,
                topic = %self.topic.base(),
                "Stream puller closed"
            );
        }
    }

    /// Creates the consumer group on every partition
    ///
    /// Returns the partitions that have the group. A partition whose group
    /// can't be created is left out of every read; fails only if none succeeded.
    async fn create_groups(&self) -> Result<Vec<String>, RedisClientError> {
        let mut active = Vec::new();
        let mut last_error = None;

        for stream in self.topic.stream_keys() {
            match self
                .commands
                .xgroup_create_mkstream(&stream, &self.subscription, GROUP_START_ID)
                .await
            {
                Ok(()) => {
                    tracing::debug!(stream = %stream, group = %self.subscription, "Created consumer group");
                    active.push(stream);
                }
                Err(RedisClientError::BusyGroup) => {
                    tracing::debug!(stream = %stream, group = %self.subscription, "Consumer group already exists");
                    active.push(stream);
                }
                Err(e) => {
                    tracing::error!(
                        stream = %stream,
                        group = %self.subscription,
                        error = %e,
                        "Failed to create consumer group, partition skipped"
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if active.is_empty() => Err(e),
            _ => Ok(active),
        }
    }

    async fn read_loop(
        &self,
        cancel: CancellationToken,
        delivery: CancellationToken,
        reader: Arc<dyn StreamCommands>,
        handler: Arc<dyn MessageHandler>,
        streams: &[String],
    ) -> Result<(), PullError> {
        let mut backoff = Backoff::default();

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(),
                _ = self.done.cancelled() => return Ok(()),
                read = reader.xread_group(
                    &self.subscription,
                    &self.consumer,
                    streams,
                    self.config.batch_size,
                    self.config.block_time,
                ) => read,
            };

            match read {
                Ok(batches) => {
                    backoff.reset();

                    for StreamBatch { stream, entries } in batches {
                        for entry in entries {
                            let message = self.live_message(&stream, entry);
                            handler.handle(delivery.clone(), message).await;
                        }
                    }
                }
                Err(e) if e.is_nil() => continue,
                Err(e) => {
                    let delay = backoff.next();
                    tracing::error!(
                        subscription = %self.subscription,
                        error = %e,
                        backoff_ms = delay.as_millis() as u64,
                        "Failed to read from streams"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return self.cancelled(),
                        _ = self.done.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn cancelled(&self) -> Result<(), PullError> {
        tracing::debug!(subscription = %self.subscription, "Pull cancelled");
        self.shutdown();
        Err(PullError::Cancelled)
    }

    async fn reclaim_loop(self: Arc<Self>, cancel: CancellationToken, streams: Vec<String>) {
        let interval = self.config.reclaim_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = self.done.cancelled() => return,
                _ = ticker.tick() => {}
            }

            self.reclaim_pass(&streams, &cancel).await;
        }
    }

    /// Claims idle pending entries on the given partitions and reprocesses them
    async fn reclaim_pass(&self, streams: &[String], cancel: &CancellationToken) {
        let Some(handler) = self.handler.get().cloned() else {
            tracing::debug!(subscription = %self.subscription, "No handler registered, skipping reclaim");
            return;
        };

        for stream in streams {
            // Only query what can be reprocessed now; the rest stays pending
            let available = self
                .reclaim_slots
                .available_permits()
                .min(self.config.pending_query_count);
            if available == 0 {
                tracing::warn!(
                    subscription = %self.subscription,
                    max_reclaim_tasks = self.config.max_reclaim_tasks,
                    "Reclaim tasks saturated, deferring to next pass"
                );
                return;
            }

            let pending = match self
                .commands
                .xpending_idle(&stream, &self.subscription, self.config.idle_time, available)
                .await
            {
                Ok(pending) if pending.is_empty() => continue,
                Ok(pending) => pending,
                Err(e) => {
                    tracing::error!(stream = %stream, error = %e, "Failed to query pending messages");
                    continue;
                }
            };

            let ids: Vec<String> = pending.into_iter().map(|p| p.id).collect();
            let claimed = match self
                .commands
                .xclaim(&stream, &self.subscription, &self.consumer, self.config.idle_time, &ids)
                .await
            {
                Ok(claimed) => claimed,
                Err(e) => {
                    tracing::error!(stream = %stream, error = %e, "Failed to claim pending messages");
                    continue;
                }
            };

            if claimed.is_empty() {
                continue;
            }

            tracing::info!(
                stream = %stream,
                consumer = %self.consumer,
                count = claimed.len(),
                "Claimed idle messages"
            );

            for entry in claimed {
                let Ok(permit) = self.reclaim_slots.clone().try_acquire_owned() else {
                    tracing::warn!(stream = %stream, id = %entry.id, "No reclaim slot, message left pending");
                    continue;
                };

                let message = self.claimed_message(&stream, entry);
                let handler = handler.clone();
                let timeout = self.config.claim_handler_timeout;
                let task_cancel = cancel.child_token();

                tokio::spawn(async move {
                    let _permit = permit;
                    let id = message.id.clone();

                    let handled =
                        tokio::time::timeout(timeout, handler.handle(task_cancel.clone(), message))
                            .await;

                    if handled.is_err() {
                        task_cancel.cancel();
                        tracing::warn!(
                            id = %id,
                            timeout_secs = timeout.as_secs(),
                            "Reprocessing claimed message timed out"
                        );
                    }
                });
            }
        }
    }

    fn live_message(&self, stream: &str, entry: StreamEntry) -> Message {
        let mut attributes = HashMap::new();
        attributes.insert(ATTR_ID.to_string(), entry.id.clone());
        attributes.insert(ATTR_STREAM.to_string(), stream.to_string());

        self.message(stream, entry, attributes)
    }

    fn claimed_message(&self, stream: &str, entry: StreamEntry) -> Message {
        let mut attributes = HashMap::new();
        attributes.insert(ATTR_STREAM.to_string(), stream.to_string());
        attributes.insert(ATTR_CLAIMED.to_string(), "true".to_string());

        self.message(stream, entry, attributes)
    }

    fn message(
        &self,
        stream: &str,
        entry: StreamEntry,
        attributes: HashMap<String, String>,
    ) -> Message {
        let id = entry.id.clone();
        let acker = Arc::new(StreamAck {
            commands: self.commands.clone(),
            stream: stream.to_string(),
            group: self.subscription.clone(),
            id: id.clone(),
        });

        Message::new(id, entry.into_payload(), attributes, acker)
    }
}

/// Acknowledger bound to one stream entry
struct StreamAck {
    commands: Arc<dyn StreamCommands>,
    stream: String,
    group: String,
    id: String,
}

#[async_trait]
impl Acknowledger for StreamAck {
    async fn ack(&self) {
        if let Err(e) = self.commands.xack(&self.stream, &self.group, &self.id).await {
            tracing::error!(
                stream = %self.stream,
                group = %self.group,
                id = %self.id,
                error = %e,
                "Failed to acknowledge message"
            );
        }
    }

    /// Leaving the entry pending is enough: the reclaim loop redelivers it.
    async fn nack(&self) {
        tracing::trace!(stream = %self.stream, id = %self.id, "Message nacked");
    }
}
