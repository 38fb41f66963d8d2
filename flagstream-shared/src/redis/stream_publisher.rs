/// Partitioned Redis Stream publisher
///
/// Appends each message to one partition stream of its topic, chosen from the
/// message ID. Every entry holds a single field: the message ID (or
/// `"message"` for an empty ID) mapped to the encoded payload.
///
/// # Architecture
///
/// ```text
/// Producer
///     │
///     │ publish(msg)
///     ▼
/// StreamPublisher ── xxhash32(msg.id) % N ──> partition p
///     │
///     │ XADD {topic}-{p} * {msg.id} {payload}
///     ▼
/// Redis Streams ──> StreamPuller (consumer group per subscription)
/// ```
///
/// No retries happen here: backend errors are returned for the caller to
/// retry, encoding errors are terminal.
///
/// # Example
///
/// ```no_run
/// use flagstream_shared::pubsub::publisher::{Publisher, RawMessage};
/// use flagstream_shared::redis::client::{RedisClient, RedisConfig};
/// use flagstream_shared::redis::stream_publisher::StreamPublisher;
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = RedisClient::new(RedisConfig::from_env()?).await?;
/// let publisher = StreamPublisher::new(Arc::new(client), "evaluation-events", 16);
///
/// publisher.publish(&RawMessage::new("user-42", b"{}".to_vec())).await?;
/// # Ok(())
/// # }
/// ```

use crate::pubsub::publisher::{OutgoingMessage, PublishError, Publisher};
use crate::redis::commands::StreamCommands;
use crate::redis::partition::StreamTopic;
use async_trait::async_trait;
use std::sync::Arc;

/// Field name used for messages with an empty ID
pub const FALLBACK_FIELD: &str = "message";

/// Redis Stream publisher for one topic
#[derive(Clone)]
pub struct StreamPublisher {
    commands: Arc<dyn StreamCommands>,
    topic: StreamTopic,
}

impl StreamPublisher {
    /// Creates a publisher
    ///
    /// # Arguments
    ///
    /// * `commands` - Command executor
    /// * `topic` - Topic base name
    /// * `partition_count` - Number of partitions (0 is treated as 1)
    pub fn new(
        commands: Arc<dyn StreamCommands>,
        topic: impl Into<String>,
        partition_count: u32,
    ) -> Self {
        Self {
            commands,
            topic: StreamTopic::new(topic, partition_count),
        }
    }

    /// Partition a message ID is published to
    pub fn calculate_partition(&self, id: &str) -> u32 {
        self.topic.partition_for(id)
    }

    /// Stream key a message ID is published to
    pub fn stream_key(&self, id: &str) -> String {
        self.topic.stream_key_for(id)
    }

    pub fn topic(&self) -> &StreamTopic {
        &self.topic
    }
}

#[async_trait]
impl Publisher for StreamPublisher {
    async fn publish(&self, message: &dyn OutgoingMessage) -> Result<(), PublishError> {
        let id = message.id();

        let payload = message.encode().map_err(|e| {
            tracing::warn!(id = %id, topic = %self.topic.base(), error = %e, "Failed to encode message");
            PublishError::BadMessage(e)
        })?;

        let stream = self.topic.stream_key_for(id);
        let field = if id.is_empty() { FALLBACK_FIELD } else { id };

        let entry_id = self.commands.xadd(&stream, field, &payload).await?;

        tracing::debug!(
            id = %id,
            stream = %stream,
            entry_id = %entry_id,
            bytes = payload.len(),
            "Published message"
        );

        Ok(())
    }

    async fn stop(&self) {
        tracing::debug!(topic = %self.topic.base(), "Stream publisher stopped");
    }
}
