/// Feature-flag events
///
/// - `event`: the [`Event`] envelope and its kinds
/// - `serialization`: JSON encoding and validated decoding
///
/// # Example
///
/// ```no_run
/// use flagstream_shared::events::{Event, EventKind};
/// use flagstream_shared::pubsub::Publisher;
/// use serde_json::json;
///
/// # async fn example(publisher: &dyn Publisher) -> anyhow::Result<()> {
/// let event = Event::new(EventKind::Goal, "env-production", json!({"goal_id": "checkout"}));
/// publisher.publish(&event).await?;
/// # Ok(())
/// # }
/// ```

pub mod event;
pub mod serialization;

// Re-export common types
pub use event::{Event, EventKind};
pub use serialization::{decode_event, encode_event, SerializationError};
