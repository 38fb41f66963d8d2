/// Stream and pub/sub command executor
///
/// Publishers and pullers never talk to a connection directly. They issue
/// commands through [`StreamCommands`], which has two implementations:
/// - [`RedisClient`]: a real Redis server
/// - [`MemoryStreams`](crate::redis::memory::MemoryStreams): in-process, for local runs and tests
///
/// # Commands
///
/// ```text
/// PUBLISH / SUBSCRIBE        simple (at-most-once) mode
/// XADD                       stream publisher
/// XGROUP CREATE .. MKSTREAM  consumer group setup (idempotent via BusyGroup)
/// XREADGROUP .. BLOCK        stream puller read loop (">" ids only)
/// XACK                       message acknowledgement
/// XPENDING .. IDLE           reclaim loop: stale entry discovery
/// XCLAIM                     reclaim loop: reassignment
/// ```

use crate::redis::client::{RedisClient, RedisClientError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;

/// A single field value of a stream entry
///
/// Servers and clients disagree on whether values come back as text or raw
/// bytes; both are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Textual value
    Text(String),

    /// Binary value
    Binary(Vec<u8>),
}

impl FieldValue {
    /// Converts the value into payload bytes
    pub fn into_bytes(self) -> Bytes {
        match self {
            FieldValue::Text(text) => Bytes::from(text.into_bytes()),
            FieldValue::Binary(bytes) => Bytes::from(bytes),
        }
    }
}

/// An entry read from a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Entry ID (format: "timestamp-sequence")
    pub id: String,

    /// Field/value pairs (one pair for entries written by the stream publisher)
    pub fields: Vec<(String, FieldValue)>,
}

impl StreamEntry {
    /// Extracts the payload from the entry's first field value
    ///
    /// Returns empty bytes for an entry without fields.
    pub fn into_payload(self) -> Bytes {
        self.fields
            .into_iter()
            .next()
            .map(|(_, value)| value.into_bytes())
            .unwrap_or_default()
    }
}

/// Entries read from one stream by a group read
#[derive(Debug, Clone)]
pub struct StreamBatch {
    /// Stream key the entries came from
    pub stream: String,

    /// Entries in stream order
    pub entries: Vec<StreamEntry>,
}

/// A delivered-but-unacknowledged entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Entry ID
    pub id: String,

    /// Consumer currently owning the entry
    pub consumer: String,

    /// Time since the entry was last delivered
    pub idle: Duration,

    /// Number of times the entry has been delivered
    pub delivery_count: u64,
}

/// A message received on a pub/sub channel
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    /// Channel the message was published on
    pub channel: String,

    /// Message payload
    pub payload: Bytes,
}

/// Live pub/sub subscription; ends when the connection drops
pub type Subscription = BoxStream<'static, ChannelMessage>;

/// Command executor used by every Redis-backed publisher and puller
///
/// Implementations must be safe to share between a read loop, a reclaim
/// loop, and any number of reprocessing tasks.
#[async_trait]
pub trait StreamCommands: Send + Sync {
    /// Publishes a payload on a pub/sub channel
    ///
    /// Returns the number of subscribers that received it.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<i64, RedisClientError>;

    /// Subscribes to a pub/sub channel
    async fn subscribe(&self, channel: &str) -> Result<Subscription, RedisClientError>;

    /// Appends an entry with a single field to a stream
    ///
    /// Returns the ID assigned to the entry.
    async fn xadd(
        &self,
        stream: &str,
        field: &str,
        value: &[u8],
    ) -> Result<String, RedisClientError>;

    /// Creates a consumer group, creating the stream if it is missing
    ///
    /// Returns [`RedisClientError::BusyGroup`] when the group already exists.
    async fn xgroup_create_mkstream(
        &self,
        stream: &str,
        group: &str,
        start_id: &str,
    ) -> Result<(), RedisClientError>;

    /// Reads entries never delivered to any consumer of the group
    ///
    /// Reads up to `count` entries per stream, blocking up to `block`.
    /// Returns [`RedisClientError::Nil`] when the block expires with no data.
    async fn xread_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &[String],
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamBatch>, RedisClientError>;

    /// Acknowledges an entry
    async fn xack(&self, stream: &str, group: &str, id: &str) -> Result<(), RedisClientError>;

    /// Lists up to `count` pending entries idle for at least `min_idle`
    async fn xpending_idle(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<PendingEntry>, RedisClientError>;

    /// Reassigns pending entries idle for at least `min_idle` to `consumer`
    ///
    /// Returns the entries that were claimed.
    async fn xclaim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> Result<Vec<StreamEntry>, RedisClientError>;

    /// Returns an executor suitable for blocking reads
    async fn dedicated(&self) -> Result<Arc<dyn StreamCommands>, RedisClientError>;

    /// Checks backend health
    async fn ping(&self) -> Result<bool, RedisClientError>;
}

#[async_trait]
impl StreamCommands for RedisClient {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<i64, RedisClientError> {
        let mut conn = self.get_connection();
        let receivers: i64 = conn.publish(channel, payload).await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, RedisClientError> {
        let conn = self.raw_client().get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await?;

        tracing::debug!(channel = %channel, "Subscribed to channel");

        let messages = pubsub.into_on_message().map(|msg| ChannelMessage {
            channel: msg.get_channel_name().to_string(),
            payload: Bytes::copy_from_slice(msg.get_payload_bytes()),
        });

        Ok(messages.boxed())
    }

    async fn xadd(
        &self,
        stream: &str,
        field: &str,
        value: &[u8],
    ) -> Result<String, RedisClientError> {
        let mut conn = self.get_connection();
        let id: String = conn.xadd(stream, "*", &[(field, value)]).await?;
        Ok(id)
    }

    async fn xgroup_create_mkstream(
        &self,
        stream: &str,
        group: &str,
        start_id: &str,
    ) -> Result<(), RedisClientError> {
        let mut conn = self.get_connection();
        let _: () = conn.xgroup_create_mkstream(stream, group, start_id).await?;
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
        let mut conn = self.get_connection();

        // ">" means only entries never delivered to other consumers
        let ids = vec![">"; streams.len()];
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);

        let reply: Option<StreamReadReply> = conn.xread_options(streams, &ids, &opts).await?;

        let batches: Vec<StreamBatch> = reply
            .map(|reply| reply.keys)
            .unwrap_or_default()
            .into_iter()
            .map(|key| StreamBatch {
                stream: key.key,
                entries: key.ids.into_iter().map(stream_entry).collect(),
            })
            .collect();

        if batches.iter().all(|batch| batch.entries.is_empty()) {
            return Err(RedisClientError::Nil);
        }

        Ok(batches)
    }

    async fn xack(&self, stream: &str, group: &str, id: &str) -> Result<(), RedisClientError> {
        let mut conn = self.get_connection();
        let _: i64 = conn.xack(stream, group, &[id]).await?;
        Ok(())
    }

    async fn xpending_idle(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<PendingEntry>, RedisClientError> {
        let mut conn = self.get_connection();

        let reply: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg("IDLE")
            .arg(min_idle.as_millis() as u64)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        Ok(reply
            .ids
            .into_iter()
            .map(|pending| PendingEntry {
                id: pending.id,
                consumer: pending.consumer,
                idle: Duration::from_millis(pending.last_delivered_ms as u64),
                delivery_count: pending.times_delivered as u64,
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
        let mut conn = self.get_connection();
        let reply: StreamClaimReply = conn
            .xclaim(stream, group, consumer, min_idle.as_millis() as u64, ids)
            .await?;

        Ok(reply.ids.into_iter().map(stream_entry).collect())
    }

    async fn dedicated(&self) -> Result<Arc<dyn StreamCommands>, RedisClientError> {
        Ok(Arc::new(self.isolated().await?))
    }

    async fn ping(&self) -> Result<bool, RedisClientError> {
        RedisClient::ping(self).await
    }
}

/// Converts a redis stream ID into a [`StreamEntry`]
fn stream_entry(id: StreamId) -> StreamEntry {
    let fields = id
        .map
        .into_iter()
        .filter_map(|(field, value)| field_value(value).map(|value| (field, value)))
        .collect();

    StreamEntry { id: id.id, fields }
}

fn field_value(value: redis::Value) -> Option<FieldValue> {
    match value {
        redis::Value::Data(bytes) => Some(FieldValue::Binary(bytes)),
        redis::Value::Status(text) => Some(FieldValue::Text(text)),
        redis::Value::Int(n) => Some(FieldValue::Text(n.to_string())),
        _ => None,
    }
}
