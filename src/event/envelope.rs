//! Event envelope: the immutable unit of traffic on the bus.

use crate::event::{Event, EventMetadata};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// An emitted event.
///
/// The envelope pairs an opaque event type string with a JSON payload and
/// its metadata. It is cheap to clone: all three parts sit behind one `Arc`,
/// so the dispatcher, the history ring and every handler share the same
/// instance and nothing can mutate it after emission.
#[derive(Clone)]
pub struct EventEnvelope {
    inner: Arc<EnvelopeInner>,
}

struct EnvelopeInner {
    event_type: String,
    payload: Value,
    metadata: EventMetadata,
}

impl EventEnvelope {
    /// Create a new envelope with fresh metadata
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self::with_metadata(event_type, payload, EventMetadata::new())
    }

    /// Create a new envelope with custom metadata
    pub fn with_metadata(
        event_type: impl Into<String>,
        payload: Value,
        metadata: EventMetadata,
    ) -> Self {
        Self {
            inner: Arc::new(EnvelopeInner {
                event_type: event_type.into(),
                payload,
                metadata,
            }),
        }
    }

    /// Wrap a typed event
    pub fn from_event<T: Event>(event: &T, metadata: EventMetadata) -> Result<Self> {
        let payload = serde_json::to_value(event)?;
        Ok(Self::with_metadata(T::event_type(), payload, metadata))
    }

    /// Get the event type string
    pub fn event_type(&self) -> &str {
        &self.inner.event_type
    }

    /// Get the raw payload
    pub fn payload(&self) -> &Value {
        &self.inner.payload
    }

    /// Get the metadata
    pub fn metadata(&self) -> &EventMetadata {
        &self.inner.metadata
    }

    /// Get the event ID
    pub fn event_id(&self) -> uuid::Uuid {
        self.inner.metadata.event_id
    }

    /// Get the correlation ID from metadata
    pub fn correlation_id(&self) -> Option<uuid::Uuid> {
        self.inner.metadata.correlation_id
    }

    /// Get the source tag from metadata
    pub fn source(&self) -> Option<&str> {
        self.inner.metadata.source.as_deref()
    }

    /// Check if this envelope carries the given event type
    pub fn is(&self, event_type: &str) -> bool {
        self.inner.event_type == event_type
    }

    /// Decode the payload into a concrete type
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.inner.payload.clone()).map_err(|e| {
            Error::SerializationError(format!(
                "payload of {} does not decode: {}",
                self.inner.event_type, e
            ))
        })
    }

    /// Look up a string field of an object payload
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.inner.payload.get(key).and_then(Value::as_str)
    }

    /// Look up a boolean field of an object payload
    pub fn bool_field(&self, key: &str) -> Option<bool> {
        self.inner.payload.get(key).and_then(Value::as_bool)
    }

    /// Metadata for an event emitted in response to this one
    pub fn chained_metadata(&self, source: impl Into<String>) -> EventMetadata {
        let mut metadata = EventMetadata::from_source(source);
        metadata.chain_from(&self.inner.metadata);
        metadata
    }

    /// Build a follow-up envelope that chains from this one
    pub fn chain<P: Serialize>(
        &self,
        event_type: impl Into<String>,
        payload: &P,
        source: impl Into<String>,
    ) -> Result<Self> {
        let payload = serde_json::to_value(payload)?;
        Ok(Self::with_metadata(
            event_type,
            payload,
            self.chained_metadata(source),
        ))
    }
}

impl fmt::Debug for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEnvelope")
            .field("event_type", &self.inner.event_type)
            .field("event_id", &self.inner.metadata.event_id)
            .field("source", &self.inner.metadata.source)
            .field("correlation_id", &self.inner.metadata.correlation_id)
            .field("payload", &self.inner.payload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    impl Event for Ping {
        fn event_type() -> &'static str {
            "test.ping"
        }
    }

    #[test]
    fn test_envelope_creation() {
        let envelope = EventEnvelope::new("x.evt", json!({"value": 1}));
        assert_eq!(envelope.event_type(), "x.evt");
        assert!(envelope.is("x.evt"));
        assert!(!envelope.is("x.other"));
        assert_eq!(envelope.payload()["value"], 1);
    }

    #[test]
    fn test_envelope_typed_roundtrip() {
        let envelope = EventEnvelope::from_event(&Ping { seq: 7 }, EventMetadata::new()).unwrap();
        assert_eq!(envelope.event_type(), "test.ping");
        assert_eq!(envelope.payload_as::<Ping>().unwrap(), Ping { seq: 7 });

        let wrong = EventEnvelope::new("test.ping", json!("nope"));
        assert!(wrong.payload_as::<Ping>().is_err());
    }

    #[test]
    fn test_envelope_field_helpers() {
        let envelope = EventEnvelope::new(
            "settings.updated",
            json!({"key": "hotkeys.overlay_toggle", "full_save": true}),
        );
        assert_eq!(envelope.str_field("key"), Some("hotkeys.overlay_toggle"));
        assert_eq!(envelope.bool_field("full_save"), Some(true));
        assert_eq!(envelope.str_field("missing"), None);
    }

    #[test]
    fn test_envelope_chaining() {
        let correlation_id = Uuid::new_v4();
        let parent = EventEnvelope::with_metadata(
            "hotkey.settings_open",
            json!({}),
            EventMetadata::with_correlation(correlation_id),
        );

        let child = parent
            .chain("ui.settings.show", &json!({"source": "hotkey"}), "Orchestrator")
            .unwrap();

        assert_eq!(child.metadata().causation_id, Some(parent.event_id()));
        assert_eq!(child.correlation_id(), Some(correlation_id));
        assert_eq!(child.source(), Some("Orchestrator"));
    }
}
