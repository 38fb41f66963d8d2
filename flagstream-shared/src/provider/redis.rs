/// Redis providers
///
/// Redis has no projects and no durable subscriptions: consumer groups are
/// created on demand by the puller. Project arguments are ignored and the
/// subscription calls succeed without checking anything.

use crate::provider::{require, Client, ProviderError, PullerOptions};
use crate::pubsub::publisher::Publisher;
use crate::pubsub::puller::Puller;
use crate::redis::commands::StreamCommands;
use crate::redis::simple::{SimplePublisher, SimplePuller};
use crate::redis::stream_publisher::StreamPublisher;
use crate::redis::stream_puller::{StreamPuller, StreamPullerConfig};
use async_trait::async_trait;
use std::sync::Arc;

/// Partitioned Redis Streams client
#[derive(Clone)]
pub struct RedisStreamClient {
    commands: Arc<dyn StreamCommands>,
    partition_count: u32,
}

impl RedisStreamClient {
    /// Creates a client
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if `partition_count` is 0.
    pub fn new(
        commands: Arc<dyn StreamCommands>,
        partition_count: u32,
    ) -> Result<Self, ProviderError> {
        if partition_count == 0 {
            return Err(ProviderError::Config(
                "partition count must be positive".to_string(),
            ));
        }

        Ok(Self {
            commands,
            partition_count,
        })
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    fn puller_config(&self, options: &PullerOptions) -> StreamPullerConfig {
        let mut config = StreamPullerConfig::default().with_partition_count(self.partition_count);

        if let Some(batch_size) = options.batch_size {
            config = config.with_batch_size(batch_size);
        }
        if let Some(block_time) = options.block_time {
            config = config.with_block_time(block_time);
        }
        if let Some(idle_time) = options.idle_time {
            config = config.with_idle_time(idle_time);
        }

        config
    }
}

#[async_trait]
impl Client for RedisStreamClient {
    async fn create_publisher(&self, topic: &str) -> Result<Arc<dyn Publisher>, ProviderError> {
        require(topic, "topic")?;

        Ok(Arc::new(StreamPublisher::new(
            self.commands.clone(),
            topic,
            self.partition_count,
        )))
    }

    async fn create_publisher_in_project(
        &self,
        topic: &str,
        _project: &str,
    ) -> Result<Arc<dyn Publisher>, ProviderError> {
        self.create_publisher(topic).await
    }

    async fn create_puller(
        &self,
        subscription: &str,
        topic: &str,
        options: PullerOptions,
    ) -> Result<Arc<dyn Puller>, ProviderError> {
        require(subscription, "subscription")?;
        require(topic, "topic")?;

        Ok(Arc::new(StreamPuller::new(
            self.commands.clone(),
            subscription,
            topic,
            self.puller_config(&options),
        )))
    }

    async fn subscription_exists(&self, subscription: &str) -> Result<bool, ProviderError> {
        tracing::debug!(subscription = %subscription, "Consumer groups are created on demand; assuming subscription exists");
        Ok(true)
    }

    async fn delete_subscription(&self, subscription: &str) -> Result<(), ProviderError> {
        tracing::debug!(subscription = %subscription, "Consumer groups are not deleted by the stream client");
        Ok(())
    }

    async fn close(&self) {
        tracing::debug!("Redis stream client closed");
    }
}

/// Redis channel client
#[derive(Clone)]
pub struct RedisSimpleClient {
    commands: Arc<dyn StreamCommands>,
}

impl RedisSimpleClient {
    pub fn new(commands: Arc<dyn StreamCommands>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl Client for RedisSimpleClient {
    async fn create_publisher(&self, topic: &str) -> Result<Arc<dyn Publisher>, ProviderError> {
        require(topic, "topic")?;
        Ok(Arc::new(SimplePublisher::new(self.commands.clone(), topic)))
    }

    async fn create_publisher_in_project(
        &self,
        topic: &str,
        _project: &str,
    ) -> Result<Arc<dyn Publisher>, ProviderError> {
        self.create_publisher(topic).await
    }

    async fn create_puller(
        &self,
        subscription: &str,
        topic: &str,
        _options: PullerOptions,
    ) -> Result<Arc<dyn Puller>, ProviderError> {
        require(subscription, "subscription")?;
        require(topic, "topic")?;

        Ok(Arc::new(SimplePuller::new(
            self.commands.clone(),
            subscription,
            topic,
        )))
    }

    async fn subscription_exists(&self, _subscription: &str) -> Result<bool, ProviderError> {
        Ok(true)
    }

    async fn delete_subscription(&self, _subscription: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn close(&self) {
        tracing::debug!("Redis simple client closed");
    }
}
