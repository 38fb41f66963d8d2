/// Event serialization
///
/// Events travel as one JSON document per message. Decoding validates the
/// fields every consumer relies on.
///
/// # Format
///
/// ```text
/// {
///   "id": "5f0c...",
///   "kind": "evaluation",
///   "environment_id": "env-production",
///   "timestamp": "2025-01-03T12:00:00Z",
///   "payload": {"feature_id": "dark-mode", "variation": "on"}
/// }
/// ```
///
/// # Example
///
/// ```
/// use flagstream_shared::events::{decode_event, encode_event, Event, EventKind};
/// use serde_json::json;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event = Event::new(EventKind::Audit, "env-staging", json!({"actor": "ops"}));
///
/// let bytes = encode_event(&event)?;
/// let decoded = decode_event(&bytes)?;
/// assert_eq!(decoded.id, event.id);
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```

use crate::events::event::Event;
use thiserror::Error;

/// Serialization errors
#[derive(Error, Debug)]
pub enum SerializationError {
    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Serializes an event to JSON bytes
///
/// # Errors
///
/// Returns an error if the payload can't be represented as JSON.
pub fn encode_event(event: &Event) -> Result<Vec<u8>, SerializationError> {
    Ok(serde_json::to_vec(event)?)
}

/// Deserializes an event from JSON bytes
///
/// # Errors
///
/// Returns an error if:
/// - The bytes are not a valid event document
/// - `id` or `environment_id` is empty
pub fn decode_event(bytes: &[u8]) -> Result<Event, SerializationError> {
    let event: Event = serde_json::from_slice(bytes)?;

    if event.id.is_empty() {
        return Err(SerializationError::MissingField("id".to_string()));
    }
    if event.environment_id.is_empty() {
        return Err(SerializationError::MissingField("environment_id".to_string()));
    }

    Ok(event)
}
