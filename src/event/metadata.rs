//! Event metadata for tracking and correlation.

use chrono::{DateTime, Utc};
use std::time::Instant;
use uuid::Uuid;

/// Metadata associated with each event.
///
/// This includes tracking information like timestamps, correlation IDs
/// and the emitting component, used for debugging and tracing.
#[derive(Debug, Clone)]
pub struct EventMetadata {
    /// Unique identifier for this event instance
    pub event_id: Uuid,

    /// Wall-clock time the event was created
    pub timestamp: DateTime<Utc>,

    /// Monotonic time the event was created
    pub emitted_at: Instant,

    /// Correlation ID for tracing related events
    pub correlation_id: Option<Uuid>,

    /// Causation ID - the event that caused this event
    pub causation_id: Option<Uuid>,

    /// Source that generated this event
    pub source: Option<String>,
}

impl EventMetadata {
    /// Create new metadata with generated event ID and current timestamp
    pub fn new() -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            emitted_at: Instant::now(),
            correlation_id: None,
            causation_id: None,
            source: None,
        }
    }

    /// Create metadata tagged with a source
    pub fn from_source(source: impl Into<String>) -> Self {
        Self::new().set_source(source)
    }

    /// Create metadata with a specific correlation ID
    pub fn with_correlation(correlation_id: Uuid) -> Self {
        let mut metadata = Self::new();
        metadata.correlation_id = Some(correlation_id);
        metadata
    }

    /// Set the correlation ID
    pub fn set_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Set the causation ID (the event that caused this one)
    pub fn set_causation_id(mut self, id: Uuid) -> Self {
        self.causation_id = Some(id);
        self
    }

    /// Set the event source
    pub fn set_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Derive causation and correlation from the event that triggered this one
    pub fn chain_from(&mut self, parent: &EventMetadata) {
        self.causation_id = Some(parent.event_id);
        self.correlation_id = parent.correlation_id.or(Some(parent.event_id));
    }

    /// Seconds since the Unix epoch, with sub-second precision
    pub fn unix_seconds(&self) -> f64 {
        self.timestamp.timestamp_micros() as f64 / 1_000_000.0
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_creation() {
        let metadata = EventMetadata::new();
        assert_ne!(metadata.event_id, Uuid::nil());
        assert!(metadata.correlation_id.is_none());
        assert_ne!(metadata.event_id, EventMetadata::new().event_id);
    }

    #[test]
    fn test_metadata_setters() {
        let correlation_id = Uuid::new_v4();
        let metadata = EventMetadata::from_source("HotkeyBridge")
            .set_correlation_id(correlation_id);

        assert_eq!(metadata.correlation_id, Some(correlation_id));
        assert_eq!(metadata.source.as_deref(), Some("HotkeyBridge"));
    }

    #[test]
    fn test_metadata_chaining() {
        let parent = EventMetadata::new();

        let mut child = EventMetadata::new();
        child.chain_from(&parent);

        assert_eq!(child.causation_id, Some(parent.event_id));
        assert_eq!(child.correlation_id, Some(parent.event_id));

        let correlated = EventMetadata::with_correlation(Uuid::new_v4());
        let mut grandchild = EventMetadata::new();
        grandchild.chain_from(&correlated);
        assert_eq!(grandchild.correlation_id, correlated.correlation_id);
    }
}
