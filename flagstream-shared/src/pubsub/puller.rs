/// Puller contract

use crate::pubsub::message::MessageHandler;
use crate::redis::client::RedisClientError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Pull errors
#[derive(Error, Debug)]
pub enum PullError {
    /// Another pull is already running on this instance
    #[error("puller is already pulling")]
    AlreadyPulling,

    /// The puller was closed
    #[error("puller is closed")]
    Closed,

    /// The pull token was cancelled
    #[error("pull cancelled")]
    Cancelled,

    /// The pub/sub subscription ended
    #[error("subscription closed")]
    SubscriptionClosed,

    /// Backend error
    #[error(transparent)]
    Backend(#[from] RedisClientError),

    /// Managed pub/sub error
    #[error("managed pub/sub error: {0}")]
    Managed(String),
}

impl PullError {
    /// Returns true if the pull ended because its token was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PullError::Cancelled)
    }
}

/// Lifecycle of a puller
///
/// ```text
/// Idle ──pull──> Starting ──groups ready──> Running ──close/cancel──> Closed
///   └───────────────────────close───────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullerState {
    Idle,
    Starting,
    Running,
    Closed,
}

/// Pulls messages from a subscription
#[async_trait]
pub trait Puller: Send + Sync {
    /// Delivers messages to `handler` until `cancel` fires or the puller is closed
    ///
    /// Only one pull may run per instance.
    ///
    /// # Returns
    ///
    /// - `Ok(())` after [`Puller::close`]
    /// - `Err(PullError::Cancelled)` when `cancel` fires
    ///
    /// # Errors
    ///
    /// - [`PullError::AlreadyPulling`] if a pull is already running
    /// - [`PullError::Closed`] if the puller was closed before the call
    async fn pull(
        &self,
        cancel: CancellationToken,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), PullError>;

    /// Stops the puller; safe to call more than once, from any task
    async fn close(&self) -> Result<(), PullError>;

    /// Name identifying the subscription
    fn subscription_name(&self) -> String;
}
