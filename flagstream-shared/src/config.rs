/// Pub/sub backend configuration
///
/// # Environment Variables
///
/// - `PUBSUB_TYPE`: `google` (default), `redis` or `redis-stream`
/// - `PUBSUB_PROJECT_ID`: managed pub/sub project (google)
/// - `PUBSUB_REDIS_URL`: Redis URL (redis, redis-stream)
/// - `PUBSUB_REDIS_PARTITION_COUNT`: partitions per topic (default: 16)
/// - `PUBSUB_REDIS_CONNECTION_TIMEOUT_SECS` / `PUBSUB_REDIS_COMMAND_TIMEOUT_SECS`:
///   see [`RedisConfig::from_env`]
///
/// # Example
///
/// ```no_run
/// use flagstream_shared::config::PubSubConfig;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = PubSubConfig::from_env()?;
/// let commands = config.connect_redis().await?;
///
/// let mut factory = config.factory();
/// if let Some(commands) = commands {
///     factory = factory.with_redis(commands);
/// }
/// let client = factory.build()?;
/// # let _ = client;
/// # Ok(())
/// # }
/// ```

use crate::provider::factory::{ClientFactory, PubSubType};
use crate::provider::ProviderError;
use crate::redis::client::{RedisClient, RedisConfig};
use crate::redis::commands::StreamCommands;
use crate::redis::partition::DEFAULT_PARTITION_COUNT;
use std::env;
use std::sync::Arc;

/// Backend configuration shared by the API and the worker
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    pub pubsub_type: PubSubType,
    pub project_id: Option<String>,
    pub redis: Option<RedisConfig>,
    pub partition_count: u32,
}

impl PubSubConfig {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if `PUBSUB_TYPE` is unknown, or if a Redis type is
    /// selected without `PUBSUB_REDIS_URL`.
    pub fn from_env() -> Result<Self, ProviderError> {
        // Load .env if present
        dotenvy::dotenv().ok();

        let pubsub_type = match env::var("PUBSUB_TYPE") {
            Ok(value) => value.parse()?,
            Err(_) => PubSubType::default(),
        };

        let project_id = env::var("PUBSUB_PROJECT_ID").ok().filter(|s| !s.is_empty());

        let redis = match pubsub_type {
            PubSubType::Google => None,
            PubSubType::Redis | PubSubType::RedisStream => Some(
                RedisConfig::from_env().map_err(|e| ProviderError::Config(e.to_string()))?,
            ),
        };

        let partition_count = env::var("PUBSUB_REDIS_PARTITION_COUNT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PARTITION_COUNT);

        Ok(Self {
            pubsub_type,
            project_id,
            redis,
            partition_count,
        })
    }

    /// Configuration for a Redis Streams backend at `url`
    pub fn redis_stream(url: impl Into<String>, partition_count: u32) -> Self {
        Self {
            pubsub_type: PubSubType::RedisStream,
            project_id: None,
            redis: Some(RedisConfig::with_url(url)),
            partition_count,
        }
    }

    /// Connects to Redis when a Redis type is selected
    ///
    /// # Returns
    ///
    /// `None` for the managed backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect_redis(&self) -> Result<Option<Arc<dyn StreamCommands>>, ProviderError> {
        match &self.redis {
            Some(config) => {
                let client = RedisClient::new(config.clone()).await?;
                Ok(Some(Arc::new(client)))
            }
            None => Ok(None),
        }
    }

    /// A factory preloaded with the type, project, and partition count
    pub fn factory(&self) -> ClientFactory {
        let mut factory =
            ClientFactory::new(self.pubsub_type).with_partition_count(self.partition_count);

        if let Some(project_id) = &self.project_id {
            factory = factory.with_project_id(project_id.clone());
        }

        factory
    }
}
