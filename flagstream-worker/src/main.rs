//! # Flagstream Worker
//!
//! Pulls events from the configured pub/sub backend and processes them.
//!
//! ## Architecture
//!
//! The worker:
//! - Builds a pub/sub client from `PUBSUB_*` settings
//! - Pulls the `WORKER_SUBSCRIPTION` subscription of `WORKER_TOPIC`
//! - Caps delivery at `WORKER_MAX_MPS` messages per second
//! - Processes events on `WORKER_NUM_WORKERS` tasks
//! - Shuts down on Ctrl-C, settling in-flight messages first
//!
//! ## Usage
//!
//! ```bash
//! PUBSUB_TYPE=redis-stream PUBSUB_REDIS_URL=redis://localhost:6379 \
//!     cargo run -p flagstream-worker
//! ```

use flagstream_shared::config::PubSubConfig;
use flagstream_shared::provider::Client;
use flagstream_shared::pubsub::rate_limited::RateLimitedPuller;
use flagstream_worker::config::WorkerConfig;
use flagstream_worker::consumer::EventConsumer;
use flagstream_worker::processors::EventCounter;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flagstream_worker=debug,flagstream_shared=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Flagstream Worker v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let config = WorkerConfig::from_env()?;
    let pubsub = PubSubConfig::from_env()?;

    let mut factory = pubsub.factory();
    if let Some(commands) = pubsub.connect_redis().await? {
        factory = factory.with_redis(commands);
    }
    let client = factory.build()?;

    let puller = client
        .create_puller(&config.subscription, &config.topic, config.puller_options())
        .await?;
    let (limited, messages) = RateLimitedPuller::new(puller, config.max_mps);

    let mut consumer = EventConsumer::new(config.consumer_config());
    consumer.register_processor(Arc::new(EventCounter::new()));
    let consumer = Arc::new(consumer);
    let shutdown = consumer.shutdown_token();

    let mut pull = tokio::spawn({
        let cancel = shutdown.clone();
        async move { limited.run(cancel).await }
    });
    let consume = tokio::spawn(consumer.clone().run(messages));

    tracing::info!(
        subscription = %config.subscription,
        topic = %config.topic,
        max_mps = config.max_mps,
        pubsub_type = %pubsub.pubsub_type,
        "Worker ready and consuming events"
    );

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Shutdown signal received, exiting...");
        }
        result = &mut pull => {
            match result? {
                Ok(()) => tracing::info!("Puller closed"),
                Err(e) => tracing::error!(error = %e, "Puller stopped"),
            }
        }
    }

    shutdown.cancel();
    if !pull.is_finished() {
        let _ = pull.await;
    }
    consume.await??;
    client.close().await;

    Ok(())
}
