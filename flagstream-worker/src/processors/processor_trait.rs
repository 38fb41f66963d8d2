/// Core Processor trait and types
///
/// This module defines the contract that all event processors must implement.
/// The consumer decodes each pulled message into an [`Event`] and hands it to
/// every processor registered for the event's kind.
///
/// # Processor Contract
///
/// All processors must:
/// 1. Implement the `Processor` trait (async)
/// 2. Declare the event kinds they handle
/// 3. Be idempotent: delivery is at-least-once, so an event may arrive twice
/// 4. Return promptly once the cancel token fires
///
/// # Outcome
///
/// ```text
/// Processor::process()
///   ├─> Ok(())                  every processor succeeded → message acked
///   ├─> Err(InvalidPayload)     terminal → message acked, event dropped
///   └─> Err(Failed | Cancelled) message nacked → redelivered after idle timeout
/// ```
///
/// # Example
///
/// ```no_run
/// use flagstream_worker::processors::{Processor, ProcessorResult};
/// use flagstream_shared::events::{Event, EventKind};
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
///
/// struct GoalRecorder;
///
/// #[async_trait]
/// impl Processor for GoalRecorder {
///     fn name(&self) -> &str {
///         "goal_recorder"
///     }
///
///     fn kinds(&self) -> &[EventKind] {
///         &[EventKind::Goal]
///     }
///
///     async fn process(&self, event: &Event, _cancel: &CancellationToken) -> ProcessorResult<()> {
///         println!("goal {} in {}", event.id, event.environment_id);
///         Ok(())
///     }
/// }
/// ```

use async_trait::async_trait;
use flagstream_shared::events::{Event, EventKind};
use tokio_util::sync::CancellationToken;

/// Processor error types
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The event payload can't be processed; retrying won't help
    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),

    /// Processing failed; the event may succeed on redelivery
    #[error("Processing failed: {0}")]
    Failed(String),

    /// Processing was cancelled
    #[error("Processing was cancelled")]
    Cancelled,
}

impl ProcessorError {
    /// Returns true for errors redelivery can't fix
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessorError::InvalidPayload(_))
    }
}

/// Processor result type alias
pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Event processor
#[async_trait]
pub trait Processor: Send + Sync {
    /// Processor name, for logs
    fn name(&self) -> &str;

    /// Event kinds this processor handles
    fn kinds(&self) -> &[EventKind];

    /// Processes one event
    ///
    /// # Errors
    ///
    /// See [`ProcessorError`] for how each error affects acknowledgement.
    async fn process(&self, event: &Event, cancel: &CancellationToken) -> ProcessorResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_errors() {
        assert!(ProcessorError::InvalidPayload("missing feature_id".to_string()).is_terminal());
        assert!(!ProcessorError::Failed("timeout".to_string()).is_terminal());
        assert!(!ProcessorError::Cancelled.is_terminal());
    }
}
