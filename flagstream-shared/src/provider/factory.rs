/// Provider selection
///
/// [`ClientFactory`] collects the inputs each backend needs, validates them,
/// and builds one [`PubSubClient`]. The backend is fixed once the client is
/// built.
///
/// | Type           | Requires                                    |
/// |----------------|---------------------------------------------|
/// | `google`       | project id, managed backend                 |
/// | `redis`        | command executor                            |
/// | `redis-stream` | command executor, positive partition count  |

use crate::provider::google::{GoogleClient, ManagedBackend};
use crate::provider::redis::{RedisSimpleClient, RedisStreamClient};
use crate::provider::{Client, ProviderError, PullerOptions};
use crate::pubsub::publisher::Publisher;
use crate::pubsub::puller::Puller;
use crate::redis::commands::StreamCommands;
use crate::redis::partition::DEFAULT_PARTITION_COUNT;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PubSubType {
    /// Managed cloud pub/sub
    #[default]
    Google,

    /// Redis channels (at-most-once)
    Redis,

    /// Partitioned Redis Streams (at-least-once)
    RedisStream,
}

impl PubSubType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PubSubType::Google => "google",
            PubSubType::Redis => "redis",
            PubSubType::RedisStream => "redis-stream",
        }
    }
}

impl fmt::Display for PubSubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PubSubType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(PubSubType::Google),
            "redis" => Ok(PubSubType::Redis),
            "redis-stream" => Ok(PubSubType::RedisStream),
            other => Err(ProviderError::Config(format!(
                "unknown pub/sub type '{}' (expected google, redis or redis-stream)",
                other
            ))),
        }
    }
}

/// Builds a [`PubSubClient`]
#[derive(Clone)]
pub struct ClientFactory {
    pubsub_type: PubSubType,
    project_id: Option<String>,
    managed: Option<Arc<dyn ManagedBackend>>,
    commands: Option<Arc<dyn StreamCommands>>,
    partition_count: u32,
}

impl ClientFactory {
    pub fn new(pubsub_type: PubSubType) -> Self {
        Self {
            pubsub_type,
            project_id: None,
            managed: None,
            commands: None,
            partition_count: DEFAULT_PARTITION_COUNT,
        }
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_managed_backend(mut self, backend: Arc<dyn ManagedBackend>) -> Self {
        self.managed = Some(backend);
        self
    }

    pub fn with_redis(mut self, commands: Arc<dyn StreamCommands>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn with_partition_count(mut self, partition_count: u32) -> Self {
        self.partition_count = partition_count;
        self
    }

    /// Validates the inputs and builds the client
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if an input the selected type
    /// requires is missing or invalid.
    pub fn build(self) -> Result<PubSubClient, ProviderError> {
        let client = match self.pubsub_type {
            PubSubType::Google => {
                let project_id = self.project_id.ok_or_else(|| {
                    ProviderError::Config("google pub/sub requires a project id".to_string())
                })?;
                let backend = self.managed.ok_or_else(|| {
                    ProviderError::Config(
                        "google pub/sub requires a managed backend".to_string(),
                    )
                })?;

                PubSubClient::Google(GoogleClient::new(project_id, backend)?)
            }
            PubSubType::Redis => {
                let commands = self.commands.ok_or_else(missing_redis)?;
                PubSubClient::Redis(RedisSimpleClient::new(commands))
            }
            PubSubType::RedisStream => {
                let commands = self.commands.ok_or_else(missing_redis)?;
                PubSubClient::RedisStream(RedisStreamClient::new(commands, self.partition_count)?)
            }
        };

        tracing::info!(pubsub_type = %client.pubsub_type(), "Pub/sub client created");

        Ok(client)
    }
}

fn missing_redis() -> ProviderError {
    ProviderError::Config("redis pub/sub requires a redis client".to_string())
}

/// A client for one of the supported backends
#[derive(Clone)]
pub enum PubSubClient {
    Google(GoogleClient),
    Redis(RedisSimpleClient),
    RedisStream(RedisStreamClient),
}

impl PubSubClient {
    pub fn pubsub_type(&self) -> PubSubType {
        match self {
            PubSubClient::Google(_) => PubSubType::Google,
            PubSubClient::Redis(_) => PubSubType::Redis,
            PubSubClient::RedisStream(_) => PubSubType::RedisStream,
        }
    }

    fn inner(&self) -> &dyn Client {
        match self {
            PubSubClient::Google(client) => client,
            PubSubClient::Redis(client) => client,
            PubSubClient::RedisStream(client) => client,
        }
    }
}

#[async_trait]
impl Client for PubSubClient {
    async fn create_publisher(&self, topic: &str) -> Result<Arc<dyn Publisher>, ProviderError> {
        self.inner().create_publisher(topic).await
    }

    async fn create_publisher_in_project(
        &self,
        topic: &str,
        project: &str,
    ) -> Result<Arc<dyn Publisher>, ProviderError> {
        self.inner().create_publisher_in_project(topic, project).await
    }

    async fn create_puller(
        &self,
        subscription: &str,
        topic: &str,
        options: PullerOptions,
    ) -> Result<Arc<dyn Puller>, ProviderError> {
        self.inner().create_puller(subscription, topic, options).await
    }

    async fn subscription_exists(&self, subscription: &str) -> Result<bool, ProviderError> {
        self.inner().subscription_exists(subscription).await
    }

    async fn delete_subscription(&self, subscription: &str) -> Result<(), ProviderError> {
        self.inner().delete_subscription(subscription).await
    }

    async fn close(&self) {
        self.inner().close().await
    }
}
