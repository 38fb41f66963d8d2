/// Rate-limited message delivery
///
/// Wraps a [`Puller`] and forwards its messages into a bounded channel, no
/// faster than `max_mps` messages per second. Workers read from the channel
/// instead of registering a handler, so processing can be spread over
/// several tasks.
///
/// # Architecture
///
/// ```text
/// Puller.pull ──handler──> [limiter] ──send──> mpsc channel ──recv──> workers
/// ```
///
/// Forwarding blocks the puller's handler, so a slow consumer throttles the
/// read loop instead of piling up unacknowledged messages.
///
/// # Example
///
/// ```no_run
/// use flagstream_shared::pubsub::rate_limited::RateLimitedPuller;
/// use flagstream_shared::pubsub::puller::Puller;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(puller: Arc<dyn Puller>) {
/// let (limited, mut messages) = RateLimitedPuller::new(puller, 100);
/// let cancel = CancellationToken::new();
///
/// tokio::spawn({
///     let cancel = cancel.clone();
///     async move { limited.run(cancel).await }
/// });
///
/// while let Some(msg) = messages.recv().await {
///     msg.ack().await;
/// }
/// # }
/// ```

use crate::pubsub::message::{Message, MessageHandler};
use crate::pubsub::puller::{PullError, Puller};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the delivery channel
const MESSAGE_BUFFER: usize = 1;

/// Puller wrapper enforcing a maximum delivery rate
pub struct RateLimitedPuller {
    puller: Arc<dyn Puller>,
    forwarder: Arc<Forwarder>,
}

impl RateLimitedPuller {
    /// Wraps a puller
    ///
    /// # Arguments
    ///
    /// * `puller` - Source of messages
    /// * `max_mps` - Maximum messages per second; 0 disables limiting
    ///
    /// # Returns
    ///
    /// The wrapper and the receiving end of its delivery channel.
    pub fn new(puller: Arc<dyn Puller>, max_mps: u32) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(MESSAGE_BUFFER);

        let limiter = NonZeroU32::new(max_mps)
            .map(|rate| RateLimiter::direct(Quota::per_second(rate)));

        let limited = Self {
            puller,
            forwarder: Arc::new(Forwarder { limiter, tx }),
        };

        (limited, rx)
    }

    /// Runs the inner pull, forwarding messages until `cancel` fires
    ///
    /// # Errors
    ///
    /// Returns whatever the inner [`Puller::pull`] returns.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), PullError> {
        tracing::info!(
            subscription = %self.puller.subscription_name(),
            "Starting rate-limited puller"
        );

        self.puller.pull(cancel, self.forwarder.clone()).await
    }

    /// Closes the inner puller
    pub async fn close(&self) -> Result<(), PullError> {
        self.puller.close().await
    }

    pub fn subscription_name(&self) -> String {
        self.puller.subscription_name()
    }
}

struct Forwarder {
    limiter: Option<DefaultDirectRateLimiter>,
    tx: mpsc::Sender<Message>,
}

#[async_trait]
impl MessageHandler for Forwarder {
    async fn handle(&self, cancel: CancellationToken, message: Message) {
        if let Some(limiter) = &self.limiter {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = limiter.until_ready() => {}
            }
        }

        // A message dropped here stays unacknowledged and gets redelivered
        tokio::select! {
            _ = cancel.cancelled() => {}
            sent = self.tx.send(message) => {
                if let Err(e) = sent {
                    tracing::warn!(id = %e.0.id, "Message receiver dropped, message not delivered");
                }
            }
        }
    }
}
