/// Publisher contract
///
/// Every backend publishes values implementing [`OutgoingMessage`]: anything
/// that has an ID and can encode itself to bytes.

use crate::redis::client::RedisClientError;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Message encoding error
#[derive(Error, Debug)]
#[error("failed to encode message: {0}")]
pub struct EncodeError(pub String);

impl From<serde_json::Error> for EncodeError {
    fn from(err: serde_json::Error) -> Self {
        EncodeError(err.to_string())
    }
}

/// Publish errors
#[derive(Error, Debug)]
pub enum PublishError {
    /// The message could not be encoded; retrying will not help
    #[error("bad message: {0}")]
    BadMessage(#[from] EncodeError),

    /// Backend error, returned as-is
    #[error(transparent)]
    Backend(#[from] RedisClientError),

    /// Managed pub/sub error
    #[error("managed pub/sub error: {0}")]
    Managed(String),
}

impl PublishError {
    /// Returns true for errors that a retry cannot fix
    pub fn is_terminal(&self) -> bool {
        matches!(self, PublishError::BadMessage(_))
    }
}

/// A message that can be published
pub trait OutgoingMessage: Send + Sync {
    /// Message identifier, used for partitioning
    fn id(&self) -> &str;

    /// Serializes the message
    fn encode(&self) -> Result<Vec<u8>, EncodeError>;
}

/// Raw payload with an ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: String,
    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn new(id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }
}

impl OutgoingMessage for RawMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(self.payload.clone())
    }
}

/// Publishes messages to a topic
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes one message
    ///
    /// # Errors
    ///
    /// - [`PublishError::BadMessage`] if encoding fails
    /// - [`PublishError::Backend`] / [`PublishError::Managed`] if the backend rejects it
    async fn publish(&self, message: &dyn OutgoingMessage) -> Result<(), PublishError>;

    /// Publishes messages one by one
    ///
    /// Each message succeeds or fails on its own; the returned map holds the
    /// failures keyed by message ID. Empty means everything was published.
    async fn publish_multi(
        &self,
        messages: &[&dyn OutgoingMessage],
    ) -> HashMap<String, PublishError> {
        let mut failures = HashMap::new();

        for message in messages {
            if let Err(e) = self.publish(*message).await {
                failures.insert(message.id().to_string(), e);
            }
        }

        failures
    }

    /// Releases publisher resources; safe to call more than once
    async fn stop(&self);
}
