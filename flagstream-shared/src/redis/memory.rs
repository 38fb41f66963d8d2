/// In-process stream executor
///
/// Implements [`StreamCommands`] without a server, following Redis
/// semantics closely enough for publishers and pullers to behave the same:
/// - Consumer groups with a last-delivered cursor and a pending entries list
/// - Blocking group reads woken by appends
/// - Idle-time based pending queries and claims
/// - Fire-and-forget pub/sub channels
///
/// Time is measured with `tokio::time::Instant`, so tests running with a
/// paused clock can advance idle times deterministically.
///
/// # Example
///
/// ```no_run
/// use flagstream_shared::redis::memory::MemoryStreams;
/// use flagstream_shared::redis::commands::StreamCommands;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let streams = MemoryStreams::new();
/// streams.xgroup_create_mkstream("events-0", "workers", "0").await?;
/// streams.xadd("events-0", "evt-1", b"payload").await?;
/// assert_eq!(streams.stream_len("events-0"), 1);
/// # Ok(())
/// # }
/// ```

use crate::redis::client::RedisClientError;
use crate::redis::commands::{
    ChannelMessage, FieldValue, PendingEntry, StreamBatch, StreamCommands, StreamEntry,
    Subscription,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;

/// Capacity of the pub/sub broadcast buffer; slow subscribers skip ahead
const CHANNEL_CAPACITY: usize = 1024;

/// In-memory stream executor
///
/// Clones share the same streams, groups, and channels.
#[derive(Clone)]
pub struct MemoryStreams {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    appended: Notify,
    channels: broadcast::Sender<ChannelMessage>,
}

#[derive(Default)]
struct State {
    last_seq: u64,
    streams: HashMap<String, MemoryStream>,
}

#[derive(Default)]
struct MemoryStream {
    entries: BTreeMap<u64, Vec<(String, FieldValue)>>,
    groups: HashMap<String, Group>,
}

#[derive(Default)]
struct Group {
    last_delivered: u64,
    pending: BTreeMap<u64, Pending>,
}

struct Pending {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

impl MemoryStreams {
    /// Creates an empty executor
    pub fn new() -> Self {
        let (channels, _) = broadcast::channel(CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                appended: Notify::new(),
                channels,
            }),
        }
    }

    /// Number of entries stored in a stream (0 if it doesn't exist)
    pub fn stream_len(&self, stream: &str) -> usize {
        self.lock()
            .streams
            .get(stream)
            .map(|s| s.entries.len())
            .unwrap_or(0)
    }

    /// Number of delivered-but-unacknowledged entries for a group
    pub fn pending_len(&self, stream: &str, group: &str) -> usize {
        self.lock()
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    /// Returns true if the group exists on the stream
    pub fn has_group(&self, stream: &str, group: &str) -> bool {
        self.lock()
            .streams
            .get(stream)
            .map(|s| s.groups.contains_key(group))
            .unwrap_or(false)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves state consistent; keep going
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// One non-blocking pass of XREADGROUP with ">" ids
    fn read_new(
        &self,
        group: &str,
        consumer: &str,
        streams: &[String],
        count: usize,
    ) -> Result<Vec<StreamBatch>, RedisClientError> {
        let mut state = self.lock();
        let now = Instant::now();
        let mut batches = Vec::new();

        // NOGROUP on any key rejects the whole read before anything is delivered
        if let Some(missing) = streams.iter().find(|key| {
            !state
                .streams
                .get(key.as_str())
                .map(|s| s.groups.contains_key(group))
                .unwrap_or(false)
        }) {
            return Err(no_group(missing, group));
        }

        for key in streams {
            let MemoryStream { entries, groups } = state
                .streams
                .get_mut(key)
                .ok_or_else(|| no_group(key, group))?;
            let group_state = groups.get_mut(group).ok_or_else(|| no_group(key, group))?;

            let mut delivered = Vec::new();
            for (seq, fields) in entries
                .range(group_state.last_delivered + 1..)
                .take(count.max(1))
            {
                group_state.pending.insert(
                    *seq,
                    Pending {
                        consumer: consumer.to_string(),
                        delivered_at: now,
                        delivery_count: 1,
                    },
                );
                delivered.push(StreamEntry {
                    id: format_id(*seq),
                    fields: fields.clone(),
                });
            }

            if let Some(last) = delivered.last() {
                group_state.last_delivered = parse_id(&last.id).unwrap_or(group_state.last_delivered);
                batches.push(StreamBatch {
                    stream: key.clone(),
                    entries: delivered,
                });
            }
        }

        Ok(batches)
    }
}

impl Default for MemoryStreams {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamCommands for MemoryStreams {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<i64, RedisClientError> {
        let receivers = self
            .shared
            .channels
            .send(ChannelMessage {
                channel: channel.to_string(),
                payload: Bytes::copy_from_slice(payload),
            })
            .unwrap_or(0);

        Ok(receivers as i64)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, RedisClientError> {
        let receiver = self.shared.channels.subscribe();
        let channel = channel.to_string();

        let messages = stream::unfold((receiver, channel), |(mut receiver, channel)| async move {
            loop {
                match receiver.recv().await {
                    Ok(msg) if msg.channel == channel => return Some((msg, (receiver, channel))),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(channel = %channel, skipped, "Subscriber lagged, messages dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(messages.boxed())
    }

    async fn xadd(
        &self,
        stream: &str,
        field: &str,
        value: &[u8],
    ) -> Result<String, RedisClientError> {
        let id = {
            let mut state = self.lock();
            state.last_seq += 1;
            let seq = state.last_seq;

            state
                .streams
                .entry(stream.to_string())
                .or_default()
                .entries
                .insert(seq, vec![(field.to_string(), FieldValue::Binary(value.to_vec()))]);

            format_id(seq)
        };

        self.shared.appended.notify_waiters();
        Ok(id)
    }

    async fn xgroup_create_mkstream(
        &self,
        stream: &str,
        group: &str,
        start_id: &str,
    ) -> Result<(), RedisClientError> {
        let mut state = self.lock();
        let target = state.streams.entry(stream.to_string()).or_default();

        if target.groups.contains_key(group) {
            return Err(RedisClientError::BusyGroup);
        }

        let last_delivered = match start_id {
            "$" => target.entries.keys().next_back().copied().unwrap_or(0),
            other => parse_id(other).ok_or_else(|| {
                RedisClientError::CommandError(format!(
                    "ERR Invalid stream ID specified as stream command argument: {}",
                    other
                ))
            })?,
        };

        target.groups.insert(
            group.to_string(),
            Group {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );

        Ok(())
    }

    async fn xread_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &[String],
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamBatch>, RedisClientError> {
        let deadline = Instant::now() + block;

        loop {
            // Register for wakeups before looking, so an append between the
            // check and the wait is not missed
            let appended = self.shared.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let batches = self.read_new(group, consumer, streams, count)?;
            if !batches.is_empty() {
                return Ok(batches);
            }

            if block.is_zero() || Instant::now() >= deadline {
                return Err(RedisClientError::Nil);
            }

            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Err(RedisClientError::Nil);
            }
        }
    }

    async fn xack(&self, stream: &str, group: &str, id: &str) -> Result<(), RedisClientError> {
        let mut state = self.lock();
        if let (Some(seq), Some(group_state)) = (
            parse_id(id),
            state
                .streams
                .get_mut(stream)
                .and_then(|s| s.groups.get_mut(group)),
        ) {
            group_state.pending.remove(&seq);
        }
        Ok(())
    }

    async fn xpending_idle(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<PendingEntry>, RedisClientError> {
        let state = self.lock();
        let group_state = state
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .ok_or_else(|| no_group(stream, group))?;

        let now = Instant::now();
        Ok(group_state
            .pending
            .iter()
            .filter(|(_, pending)| now.duration_since(pending.delivered_at) >= min_idle)
            .take(count)
            .map(|(seq, pending)| PendingEntry {
                id: format_id(*seq),
                consumer: pending.consumer.clone(),
                idle: now.duration_since(pending.delivered_at),
                delivery_count: pending.delivery_count,
            })
            .collect())
    }

    async fn xclaim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> Result<Vec<StreamEntry>, RedisClientError> {
        let mut state = self.lock();
        let MemoryStream { entries, groups } = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| no_group(stream, group))?;
        let group_state = groups.get_mut(group).ok_or_else(|| no_group(stream, group))?;

        let now = Instant::now();
        let mut claimed = Vec::new();

        for seq in ids.iter().filter_map(|id| parse_id(id)) {
            let Some(pending) = group_state.pending.get_mut(&seq) else {
                continue;
            };
            if now.duration_since(pending.delivered_at) < min_idle {
                continue;
            }

            match entries.get(&seq) {
                Some(fields) => {
                    pending.consumer = consumer.to_string();
                    pending.delivered_at = now;
                    pending.delivery_count += 1;
                    claimed.push(StreamEntry {
                        id: format_id(seq),
                        fields: fields.clone(),
                    });
                }
                None => {
                    // Entry was trimmed; drop the dangling pending reference
                    group_state.pending.remove(&seq);
                }
            }
        }

        Ok(claimed)
    }

    async fn dedicated(&self) -> Result<Arc<dyn StreamCommands>, RedisClientError> {
        Ok(Arc::new(self.clone()))
    }

    async fn ping(&self) -> Result<bool, RedisClientError> {
        Ok(true)
    }
}

fn format_id(seq: u64) -> String {
    format!("{}-0", seq)
}

fn parse_id(id: &str) -> Option<u64> {
    id.split('-').next()?.parse().ok()
}

fn no_group(stream: &str, group: &str) -> RedisClientError {
    RedisClientError::CommandError(format!(
        "NOGROUP No such key '{}' or consumer group '{}'",
        stream, group
    ))
}
