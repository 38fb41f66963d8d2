/// Pub/sub providers
///
/// A [`Client`] hides which backend carries the messages. Services ask it for
/// publishers and pullers and never see the backend directly.
///
/// # Providers
///
/// - [`google::GoogleClient`]: managed cloud pub/sub, scoped to a project
/// - [`redis::RedisStreamClient`]: partitioned Redis Streams, at-least-once
/// - [`redis::RedisSimpleClient`]: Redis channels, at-most-once
///
/// [`factory::ClientFactory`] picks one from configuration.
///
/// # Example
///
/// ```no_run
/// use flagstream_shared::provider::factory::{ClientFactory, PubSubType};
/// use flagstream_shared::provider::{Client, PullerOptions};
/// use flagstream_shared::redis::MemoryStreams;
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = ClientFactory::new(PubSubType::RedisStream)
///     .with_redis(Arc::new(MemoryStreams::new()))
///     .with_partition_count(4)
///     .build()?;
///
/// let publisher = client.create_publisher("evaluation-events").await?;
/// let puller = client
///     .create_puller("event-persister", "evaluation-events", PullerOptions::default())
///     .await?;
/// # let _ = (publisher, puller);
/// # Ok(())
/// # }
/// ```

pub mod factory;
pub mod google;
pub mod redis;

use crate::pubsub::publisher::Publisher;
use crate::pubsub::puller::Puller;
use crate::redis::client::RedisClientError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use factory::{ClientFactory, PubSubClient, PubSubType};
pub use google::{GoogleClient, ManagedBackend, ManagedError};
pub use self::redis::{RedisSimpleClient, RedisStreamClient};

/// Provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Invalid or missing configuration
    #[error("pub/sub configuration error: {0}")]
    Config(String),

    /// Redis backend error
    #[error(transparent)]
    Backend(#[from] RedisClientError),

    /// Managed backend error
    #[error(transparent)]
    Managed(#[from] ManagedError),
}

/// Puller tuning
///
/// Managed-backend knobs are ignored by the Redis providers; stream knobs
/// override [`StreamPullerConfig`](crate::redis::stream_puller::StreamPullerConfig)
/// defaults. Unset fields keep the backend default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullerOptions {
    /// Concurrent receive workers (managed)
    pub num_workers: Option<usize>,

    /// Maximum unacknowledged messages held by the client (managed)
    pub max_outstanding_messages: Option<usize>,

    /// Maximum unacknowledged bytes held by the client (managed)
    pub max_outstanding_bytes: Option<usize>,

    /// Entries per stream per read (streams)
    pub batch_size: Option<usize>,

    /// Read block duration (streams)
    pub block_time: Option<Duration>,

    /// Idle time before reclaim (streams)
    pub idle_time: Option<Duration>,
}

impl PullerOptions {
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = Some(num_workers);
        self
    }

    pub fn with_max_outstanding_messages(mut self, max: usize) -> Self {
        self.max_outstanding_messages = Some(max);
        self
    }

    pub fn with_max_outstanding_bytes(mut self, max: usize) -> Self {
        self.max_outstanding_bytes = Some(max);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_block_time(mut self, block_time: Duration) -> Self {
        self.block_time = Some(block_time);
        self
    }

    pub fn with_idle_time(mut self, idle_time: Duration) -> Self {
        self.idle_time = Some(idle_time);
        self
    }
}

/// Pub/sub client
#[async_trait]
pub trait Client: Send + Sync {
    /// Creates a publisher for a topic
    async fn create_publisher(&self, topic: &str) -> Result<Arc<dyn Publisher>, ProviderError>;

    /// Creates a publisher for a topic owned by another project
    ///
    /// Backends without projects ignore `project`.
    async fn create_publisher_in_project(
        &self,
        topic: &str,
        project: &str,
    ) -> Result<Arc<dyn Publisher>, ProviderError>;

    /// Creates a puller for a subscription of a topic
    async fn create_puller(
        &self,
        subscription: &str,
        topic: &str,
        options: PullerOptions,
    ) -> Result<Arc<dyn Puller>, ProviderError>;

    /// Checks whether a subscription exists
    async fn subscription_exists(&self, subscription: &str) -> Result<bool, ProviderError>;

    /// Deletes a subscription
    async fn delete_subscription(&self, subscription: &str) -> Result<(), ProviderError>;

    /// Releases client resources
    async fn close(&self);
}

pub(crate) fn require(value: &str, what: &str) -> Result<(), ProviderError> {
    if value.is_empty() {
        return Err(ProviderError::Config(format!("{} must not be empty", what)));
    }
    Ok(())
}
