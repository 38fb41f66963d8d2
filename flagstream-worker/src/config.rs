/// Worker configuration
///
/// Loaded with the `config` crate from `WORKER_`-prefixed environment
/// variables on top of built-in defaults. Backend selection lives in
/// [`PubSubConfig`](flagstream_shared::config::PubSubConfig).
///
/// # Environment Variables
///
/// - `WORKER_SUBSCRIPTION`: subscription (consumer group) name (default: event-persister)
/// - `WORKER_TOPIC`: topic to consume (default: events)
/// - `WORKER_MAX_MPS`: maximum messages per second, 0 for unlimited (default: 1000)
/// - `WORKER_NUM_WORKERS`: concurrent processing tasks (default: 4)
/// - `WORKER_PROCESS_TIMEOUT_SECS`: per-event processing timeout (default: 30)
/// - `WORKER_BATCH_SIZE`: stream entries per read (optional)
/// - `WORKER_BLOCK_TIME_MS`: stream read block time (optional)
/// - `WORKER_IDLE_TIME_SECS`: idle time before reclaim (optional)

use crate::consumer::ConsumerConfig;
use config::{Config, ConfigError, Environment};
use flagstream_shared::provider::PullerOptions;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub subscription: String,
    pub topic: String,
    pub max_mps: u32,
    pub num_workers: usize,
    pub process_timeout_secs: u64,
    pub batch_size: Option<usize>,
    pub block_time_ms: Option<u64>,
    pub idle_time_secs: Option<u64>,
}

impl WorkerConfig {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a variable fails to parse or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env if present
        dotenvy::dotenv().ok();

        Self::load(Environment::with_prefix("WORKER").try_parsing(true))
    }

    /// Loads configuration from an explicit variable map
    pub fn from_map(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::load(
            Environment::with_prefix("WORKER")
                .try_parsing(true)
                .source(Some(vars)),
        )
    }

    fn load(environment: Environment) -> Result<Self, ConfigError> {
        let config: WorkerConfig = Config::builder()
            .set_default("subscription", "event-persister")?
            .set_default("topic", "events")?
            .set_default("max_mps", 1000)?
            .set_default("num_workers", 4)?
            .set_default("process_timeout_secs", 30)?
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.subscription.is_empty() {
            return Err(ConfigError::Message("subscription must not be empty".to_string()));
        }
        if self.topic.is_empty() {
            return Err(ConfigError::Message("topic must not be empty".to_string()));
        }
        if self.num_workers == 0 {
            return Err(ConfigError::Message("num_workers must be positive".to_string()));
        }
        if self.batch_size == Some(0) {
            return Err(ConfigError::Message("batch_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Puller options for the configured backend
    pub fn puller_options(&self) -> PullerOptions {
        let mut options = PullerOptions::default().with_num_workers(self.num_workers);

        if let Some(batch_size) = self.batch_size {
            options = options.with_batch_size(batch_size);
        }
        if let Some(ms) = self.block_time_ms {
            options = options.with_block_time(Duration::from_millis(ms));
        }
        if let Some(secs) = self.idle_time_secs {
            options = options.with_idle_time(Duration::from_secs(secs));
        }

        options
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            num_workers: self.num_workers,
            process_timeout: Duration::from_secs(self.process_timeout_secs),
        }
    }
}
