//! Core event system traits and types.
//!
//! Every event on the bus is an [`EventEnvelope`]: an opaque type string from
//! the [`names`] namespace, a JSON payload and [`EventMetadata`]. Payloads with
//! a fixed shape are described by the records in [`payloads`]; the ones that
//! belong to exactly one event type implement [`Event`] so they can be
//! published and subscribed to without touching JSON by hand.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

pub mod envelope;
pub mod metadata;
pub mod names;
pub mod payloads;

pub use envelope::EventEnvelope;
pub use metadata::EventMetadata;

/// Core trait for typed events.
///
/// # Example
///
/// ```rust
/// use overlay_events::Event;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct CaptureFinished {
///     path: String,
/// }
///
/// impl Event for CaptureFinished {
///     fn event_type() -> &'static str {
///         "screenshot.completed"
///     }
/// }
/// ```
pub trait Event: Serialize + DeserializeOwned + Send + Sync + Clone + Debug + 'static {
    /// Returns the event type string this payload travels under.
    ///
    /// It should be a stable entry of the event namespace.
    fn event_type() -> &'static str
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::payloads::{ErrorOccurred, SettingsUpdated};
    use super::*;

    #[test]
    fn test_payload_event_types() {
        assert_eq!(SettingsUpdated::event_type(), names::SETTINGS_UPDATED);
        assert_eq!(ErrorOccurred::event_type(), names::ERROR_OCCURRED);
    }

    #[test]
    fn test_namespace_prefixes() {
        assert!(names::ALL.iter().all(|name| name.contains('.')));
        assert!(names::is_hotkey_event(names::HOTKEY_OVERLAY_TOGGLE));
        assert!(!names::is_hotkey_event(names::TRAY_OVERLAY_TOGGLE));
    }
}
