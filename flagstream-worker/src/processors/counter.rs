/// Event counting processor
///
/// Keeps running totals of events per (environment, kind) and logs every
/// event it sees. Useful for:
/// - Local runs of the worker without downstream storage
/// - Verifying end-to-end delivery
/// - Load testing
///
/// # Validation
///
/// Evaluation events must carry a `feature_id` string in their payload;
/// goal events a `goal_id`. Other kinds are counted as-is.
///
/// # Example
///
/// ```no_run
/// use flagstream_worker::processors::{EventCounter, Processor};
/// use flagstream_shared::events::{Event, EventKind};
/// use serde_json::json;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let counter = EventCounter::new();
///
/// let event = Event::new(EventKind::Goal, "env-production", json!({"goal_id": "checkout"}));
/// counter.process(&event, &CancellationToken::new()).await?;
///
/// assert_eq!(counter.count("env-production", EventKind::Goal), 1);
/// # Ok(())
/// # }
/// ```

use crate::processors::{Processor, ProcessorError, ProcessorResult};
use async_trait::async_trait;
use flagstream_shared::events::{Event, EventKind};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

const ALL_KINDS: [EventKind; 5] = [
    EventKind::Evaluation,
    EventKind::Goal,
    EventKind::Audit,
    EventKind::User,
    EventKind::Metrics,
];

/// Counts events per environment and kind
#[derive(Debug, Default)]
pub struct EventCounter {
    counts: Mutex<HashMap<(String, EventKind), u64>>,
}

impl EventCounter {
    /// Creates a new counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events counted for an environment and kind
    pub fn count(&self, environment_id: &str, kind: EventKind) -> u64 {
        self.counts
            .lock()
            .map(|counts| {
                counts
                    .get(&(environment_id.to_string(), kind))
                    .copied()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    /// Total number of events counted
    pub fn total(&self) -> u64 {
        self.counts
            .lock()
            .map(|counts| counts.values().sum())
            .unwrap_or(0)
    }
}

/// Checks that a payload carries a non-empty string field
fn require_field(event: &Event, field: &str) -> ProcessorResult<()> {
    match event.payload.get(field).and_then(|v| v.as_str()) {
        Some(value) if !value.is_empty() => Ok(()),
        _ => Err(ProcessorError::InvalidPayload(format!(
            "{} event {} has no {}",
            event.kind.as_str(),
            event.id,
            field
        ))),
    }
}

#[async_trait]
impl Processor for EventCounter {
    fn name(&self) -> &str {
        "event_counter"
    }

    fn kinds(&self) -> &[EventKind] {
        &ALL_KINDS
    }

    async fn process(&self, event: &Event, cancel: &CancellationToken) -> ProcessorResult<()> {
        if cancel.is_cancelled() {
            return Err(ProcessorError::Cancelled);
        }

        match event.kind {
            EventKind::Evaluation => require_field(event, "feature_id")?,
            EventKind::Goal => require_field(event, "goal_id")?,
            EventKind::Audit | EventKind::User | EventKind::Metrics => {}
        }

        let total = {
            let mut counts = self
                .counts
                .lock()
                .map_err(|_| ProcessorError::Failed("counter lock poisoned".to_string()))?;
            let count = counts
                .entry((event.environment_id.clone(), event.kind))
                .or_insert(0);
            *count += 1;
            *count
        };

        tracing::debug!(
            event_id = %event.id,
            kind = %event.kind.as_str(),
            environment_id = %event.environment_id,
            total,
            "Event counted"
        );

        Ok(())
    }
}
