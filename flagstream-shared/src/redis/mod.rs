/// Redis-backed publish/subscribe
///
/// This module provides the self-hosted pub/sub backends:
/// - Connection management with automatic reconnection
/// - A command executor seam with Redis and in-memory implementations
/// - Partitioned Redis Streams publisher and puller (at-least-once)
/// - Simple channel pub/sub (at-most-once)
///
/// # Architecture
///
/// ```text
/// ┌─────────────────┐
/// │ StreamPublisher │ ──XADD──> {topic}-0 .. {topic}-N
/// └─────────────────┘                 │
///                                     │ XREADGROUP (group = subscription)
///                                     ▼
///                            ┌────────────────┐
///                            │  StreamPuller  │ ──XACK──>
///                            └────────────────┘
///                                     │ every 30s
///                                     ▼
///                            XPENDING IDLE / XCLAIM
///
/// ┌─────────────────┐  PUBLISH {topic}  ┌──────────────┐
/// │ SimplePublisher │ ────────────────> │ SimplePuller │
/// └─────────────────┘                   └──────────────┘
/// ```
///
/// # Example
///
/// ```no_run
/// use flagstream_shared::redis::client::{RedisClient, RedisConfig};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = RedisConfig::from_env()?;
/// let client = RedisClient::new(config).await?;
///
/// let healthy = client.ping().await?;
/// println!("Redis healthy: {}", healthy);
/// # Ok(())
/// # }
/// ```

pub mod client;
pub mod commands;
pub mod memory;
pub mod partition;
pub mod simple;
pub mod stream_publisher;
pub mod stream_puller;

// Re-export common types for convenience
pub use client::{RedisClient, RedisClientError, RedisConfig};
pub use commands::{FieldValue, StreamCommands, StreamEntry};
pub use memory::MemoryStreams;
pub use partition::{StreamTopic, DEFAULT_PARTITION_COUNT};
pub use simple::{SimplePublisher, SimplePuller};
pub use stream_publisher::StreamPublisher;
pub use stream_puller::{StreamPuller, StreamPullerConfig};
