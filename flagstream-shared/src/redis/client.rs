/// Redis client wrapper with connection management and health checks
///
/// This module provides the Redis connection used by every Redis-backed
/// publisher and puller:
/// - Multiplexed commands via redis::aio::ConnectionManager
/// - Automatic reconnection on failure
/// - Dedicated connections for blocking reads and pub/sub subscriptions
/// - Health checks (PING command)
/// - Configuration from environment variables
///
/// # Example
///
/// ```no_run
/// use flagstream_shared::redis::client::{RedisClient, RedisConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = RedisConfig::from_env()?;
/// let client = RedisClient::new(config).await?;
///
/// // Health check
/// let healthy = client.ping().await?;
/// println!("Redis healthy: {}", healthy);
/// # Ok(())
/// # }
/// ```

use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Redis client errors
///
/// `Nil` and `BusyGroup` are sentinels: callers match on them to tell
/// "no data" and "group already exists" apart from real failures.
#[derive(Error, Debug)]
pub enum RedisClientError {
    /// Blocking read expired without data
    #[error("redis: nil")]
    Nil,

    /// Consumer group already exists
    #[error("BUSYGROUP Consumer Group name already exists")]
    BusyGroup,

    /// Connection error
    #[error("Redis connection error: {0}")]
    ConnectionError(String),

    /// Command execution error
    #[error("Redis command error: {0}")]
    CommandError(String),

    /// Configuration error
    #[error("Redis configuration error: {0}")]
    ConfigError(String),

    /// Health check failed
    #[error("Redis health check failed: {0}")]
    HealthCheckFailed(String),
}

impl RedisClientError {
    /// Returns true for the "no data available" sentinel
    pub fn is_nil(&self) -> bool {
        matches!(self, RedisClientError::Nil)
    }
}

impl From<RedisError> for RedisClientError {
    fn from(err: RedisError) -> Self {
        if err.code() == Some("BUSYGROUP") || err.to_string().contains("BUSYGROUP") {
            return RedisClientError::BusyGroup;
        }

        match err.kind() {
            redis::ErrorKind::IoError => {
                RedisClientError::ConnectionError(format!("IO error: {}", err))
            }
            redis::ErrorKind::ResponseError => {
                RedisClientError::CommandError(format!("Response error: {}", err))
            }
            _ => RedisClientError::CommandError(err.to_string()),
        }
    }
}

/// Redis configuration
///
/// Can be loaded from environment variables or constructed manually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    ///
    /// Format: redis://[username:password@]host:port[/db]
    /// Example: redis://localhost:6379
    pub url: String,

    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,

    /// Command timeout in seconds (health checks)
    pub command_timeout_secs: u64,
}

impl RedisConfig {
    /// Creates a new Redis configuration from environment variables
    ///
    /// # Environment Variables
    ///
    /// - `PUBSUB_REDIS_URL`: Redis connection URL (required)
    /// - `PUBSUB_REDIS_CONNECTION_TIMEOUT_SECS`: Connection timeout (default: 5)
    /// - `PUBSUB_REDIS_COMMAND_TIMEOUT_SECS`: Command timeout (default: 10)
    ///
    /// # Errors
    ///
    /// Returns an error if PUBSUB_REDIS_URL is not set.
    pub fn from_env() -> Result<Self, RedisClientError> {
        // Load .env if present
        dotenvy::dotenv().ok();

        let url = env::var("PUBSUB_REDIS_URL").map_err(|_| {
            RedisClientError::ConfigError(
                "PUBSUB_REDIS_URL environment variable is required".to_string(),
            )
        })?;

        let connection_timeout_secs = env::var("PUBSUB_REDIS_CONNECTION_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let command_timeout_secs = env::var("PUBSUB_REDIS_COMMAND_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            url,
            connection_timeout_secs,
            command_timeout_secs,
        })
    }

    /// Creates a configuration for the given URL with default timeouts
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_timeout_secs: 5,
            command_timeout_secs: 10,
        }
    }

    /// Creates a default configuration for testing
    ///
    /// Uses redis://localhost:6379 with default timeouts.
    pub fn default_for_test() -> Self {
        Self::with_url("redis://localhost:6379")
    }
}

/// Redis client with connection management
///
/// Wraps the redis crate's ConnectionManager to provide:
/// - Automatic reconnection on connection loss
/// - Health checking
/// - Thread-safe cloning (uses Arc internally)
///
/// All clones share one multiplexed connection. Blocking reads should go
/// through [`RedisClient::isolated`] so they don't stall other commands.
#[derive(Clone)]
pub struct RedisClient {
    client: Client,
    manager: ConnectionManager,
    config: Arc<RedisConfig>,
}

impl RedisClient {
    /// Creates a new Redis client with the given configuration
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The Redis URL is invalid
    /// - Connection to Redis fails or times out
    pub async fn new(config: RedisConfig) -> Result<Self, RedisClientError> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            RedisClientError::ConfigError(format!("Invalid Redis URL: {}", e))
        })?;

        let manager = connect(&client, config.connection_timeout_secs).await?;

        tracing::info!(
            "Redis client connected successfully to {}",
            sanitize_url(&config.url)
        );

        Ok(Self {
            client,
            manager,
            config: Arc::new(config),
        })
    }

    /// Creates a client with its own connection to the same server
    ///
    /// Used for blocking commands (XREADGROUP BLOCK) that would otherwise
    /// hold up every command multiplexed on the shared connection.
    pub async fn isolated(&self) -> Result<Self, RedisClientError> {
        let manager = connect(&self.client, self.config.connection_timeout_secs).await?;

        tracing::debug!(
            url = %sanitize_url(&self.config.url),
            "Opened dedicated Redis connection"
        );

        Ok(Self {
            client: self.client.clone(),
            manager,
            config: self.config.clone(),
        })
    }

    /// Performs a health check by sending a PING command
    ///
    /// # Returns
    ///
    /// Returns `true` if Redis responds with PONG, `false` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the PING command fails or times out.
    pub async fn ping(&self) -> Result<bool, RedisClientError> {
        let mut conn = self.manager.clone();

        let result: Result<String, RedisError> = tokio::time::timeout(
            Duration::from_secs(self.config.command_timeout_secs),
            redis::cmd("PING").query_async(&mut conn),
        )
        .await
        .map_err(|_| {
            RedisClientError::HealthCheckFailed("PING command timed out".to_string())
        })?;

        match result {
            Ok(pong) if pong == "PONG" => {
                tracing::debug!("Redis health check: PONG received");
                Ok(true)
            }
            Ok(other) => {
                tracing::warn!("Redis health check: unexpected response: {}", other);
                Ok(false)
            }
            Err(e) => {
                tracing::error!("Redis health check failed: {}", e);
                Err(RedisClientError::HealthCheckFailed(e.to_string()))
            }
        }
    }

    /// Gets a handle to the shared multiplexed connection
    ///
    /// The connection manager automatically handles reconnection,
    /// so this method will always return a valid connection handle.
    pub fn get_connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Gets the underlying redis client
    ///
    /// Pub/sub subscriptions need a connection of their own; they open it
    /// from this client.
    pub fn raw_client(&self) -> &Client {
        &self.client
    }

    /// Gets the Redis configuration
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

async fn connect(client: &Client, timeout_secs: u64) -> Result<ConnectionManager, RedisClientError> {
    tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        ConnectionManager::new(client.clone()),
    )
    .await
    .map_err(|_| RedisClientError::ConnectionError("Timed out connecting to Redis".to_string()))?
    .map_err(|e| RedisClientError::ConnectionError(format!("Failed to connect to Redis: {}", e)))
}

/// Sanitizes a Redis URL by removing credentials
///
/// Replaces username:password with ***:*** for logging.
pub(crate) fn sanitize_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(scheme_end) = url.find("://") {
            let scheme = &url[..scheme_end + 3];
            let host = &url[at_pos + 1..];
            return format!("{}***:***@{}", scheme, host);
        }
    }
    url.to_string()
}
