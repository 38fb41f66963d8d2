/// Feature-flag platform events
///
/// Services publish these envelopes; the worker consumes them. The payload is
/// free-form JSON interpreted by the processor for the event kind.
///
/// # Example
///
/// ```
/// use flagstream_shared::events::{Event, EventKind};
/// use serde_json::json;
///
/// let event = Event::new(
///     EventKind::Evaluation,
///     "env-production",
///     json!({"feature_id": "dark-mode", "variation": "on", "user_id": "user-42"}),
/// );
/// assert_eq!(event.kind.as_str(), "evaluation");
/// ```

use crate::events::serialization::encode_event;
use crate::pubsub::publisher::{EncodeError, OutgoingMessage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A flag was evaluated for a user
    Evaluation,

    /// A goal (conversion) was reached
    Goal,

    /// An administrative change was made
    Audit,

    /// A user was seen
    User,

    /// SDK metrics
    Metrics,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Evaluation => "evaluation",
            EventKind::Goal => "goal",
            EventKind::Audit => "audit",
            EventKind::User => "user",
            EventKind::Metrics => "metrics",
        }
    }

    /// Parses kind from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "evaluation" => Some(EventKind::Evaluation),
            "goal" => Some(EventKind::Goal),
            "audit" => Some(EventKind::Audit),
            "user" => Some(EventKind::User),
            "metrics" => Some(EventKind::Metrics),
            _ => None,
        }
    }
}

/// Event envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID; also the partitioning key
    pub id: String,

    /// Event category
    pub kind: EventKind,

    /// Environment the event belongs to
    pub environment_id: String,

    /// When the event happened
    pub timestamp: DateTime<Utc>,

    /// Kind-specific data
    #[serde(default)]
    pub payload: JsonValue,
}

impl Event {
    /// Creates an event with a fresh ID, timestamped now
    pub fn new(kind: EventKind, environment_id: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            environment_id: environment_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Replaces the ID
    ///
    /// Events sharing an ID land on the same partition, in publish order.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

impl OutgoingMessage for Event {
    fn id(&self) -> &str {
        &self.id
    }

    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        encode_event(self).map_err(|e| EncodeError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_as_str() {
        assert_eq!(EventKind::Evaluation.as_str(), "evaluation");
        assert_eq!(EventKind::Goal.as_str(), "goal");
        assert_eq!(EventKind::Audit.as_str(), "audit");
        assert_eq!(EventKind::User.as_str(), "user");
        assert_eq!(EventKind::Metrics.as_str(), "metrics");
    }

    #[test]
    fn test_event_kind_parse() {
        assert_eq!(EventKind::parse("goal"), Some(EventKind::Goal));
        assert_eq!(EventKind::parse("Goal"), None);
        assert_eq!(EventKind::parse("invalid"), None);
    }

    #[test]
    fn test_new_event_has_unique_id() {
        let a = Event::new(EventKind::User, "env", json!({}));
        let b = Event::new(EventKind::User, "env", json!({}));

        assert_ne!(a.id, b.id);
        assert_eq!(OutgoingMessage::id(&a), a.id);
    }

    #[test]
    fn test_encode_as_outgoing_message() {
        let event = Event::new(EventKind::Goal, "env", json!({"goal_id": "checkout"}))
            .with_id("goal-1");

        let bytes = OutgoingMessage::encode(&event).unwrap();
        let json: JsonValue = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["id"], "goal-1");
        assert_eq!(json["kind"], "goal");
        assert_eq!(json["payload"]["goal_id"], "checkout");
    }
}
