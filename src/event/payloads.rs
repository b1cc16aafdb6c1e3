//! Typed payload records for the event namespace.

use super::{names, Event};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload of every `hotkey.<action>` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotkeyTriggered {
    /// Id of the triggered hotkey
    pub hotkey_id: String,
    /// Canonical display form, e.g. `Ctrl+Shift+S`
    pub combination: String,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    /// Component that saw the key press
    pub source: String,
}

/// Payload of `settings.updated`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdated {
    /// Dotted settings key
    pub key: String,
    /// New value
    pub value: Value,
    /// When the value changed
    pub timestamp: DateTime<Utc>,
    /// Set on entries of a bulk save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_save: Option<bool>,
}

impl SettingsUpdated {
    /// True when the update is one entry of a bulk save
    pub fn is_bulk(&self) -> bool {
        self.full_save.unwrap_or(false)
    }
}

impl Event for SettingsUpdated {
    fn event_type() -> &'static str {
        names::SETTINGS_UPDATED
    }
}

/// Payload of `settings.saved`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsSaved {
    /// Keys written by the save
    pub keys: Vec<String>,
    /// When the save completed
    pub timestamp: DateTime<Utc>,
}

impl Event for SettingsSaved {
    fn event_type() -> &'static str {
        names::SETTINGS_SAVED
    }
}

/// Payload of `settings.changed`, forwarded per domain by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsChanged {
    /// First segment of the key, e.g. `hotkeys`
    pub domain: String,
    /// Full dotted key
    pub key: String,
    /// New value
    pub value: Value,
}

impl Event for SettingsChanged {
    fn event_type() -> &'static str {
        names::SETTINGS_CHANGED
    }
}

/// Payload of `error.occurred`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorOccurred {
    /// Error text
    pub error: String,
    /// Component that reported it
    pub source: String,
    /// Event being handled when the error happened
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_event: Option<String>,
    /// Human-readable summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failing handler's name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    /// Panic message or error chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    /// When the error was reported
    pub timestamp: DateTime<Utc>,
}

impl ErrorOccurred {
    /// Error raised by a component rather than by a failing handler
    pub fn new(error: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            source: source.into(),
            original_event: None,
            message: None,
            handler: None,
            trace: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a human-readable summary
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Record the event that was being handled
    pub fn with_original_event(mut self, event_type: impl Into<String>) -> Self {
        self.original_event = Some(event_type.into());
        self
    }
}

impl Event for ErrorOccurred {
    fn event_type() -> &'static str {
        names::ERROR_OCCURRED
    }
}

/// Payload of `ui.overlay.show` and `ui.overlay.hide`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayRequest {
    /// Why the overlay changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Who asked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Payload of `ui.settings.show` and `ui.gallery.show`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowRequest {
    /// Who asked
    pub source: String,
}

/// Payload of `screenshot.captured`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotCaptured {
    /// Capture details from the screen-capture collaborator
    #[serde(default)]
    pub metadata: Value,
    /// What started the capture, e.g. `hotkey`
    pub trigger: String,
}

impl Event for ScreenshotCaptured {
    fn event_type() -> &'static str {
        names::SCREENSHOT_CAPTURED
    }
}

/// Payload of `hotkey.registration.success`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotkeyRegistered {
    /// Registered hotkey
    pub hotkey_id: String,
    /// Display form of the bound combo
    pub combination: String,
    /// Action the hotkey triggers
    pub action: String,
}

impl Event for HotkeyRegistered {
    fn event_type() -> &'static str {
        names::HOTKEY_REGISTRATION_SUCCESS
    }
}

/// Payload of `hotkey.registration.failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotkeyRegistrationFailed {
    /// Hotkey that could not be bound
    pub hotkey_id: String,
    /// Combo that was refused
    pub combination: String,
    /// Why it was refused
    pub reason: String,
    /// Free combos that were tried or suggested
    #[serde(default)]
    pub alternatives: Vec<String>,
}

impl Event for HotkeyRegistrationFailed {
    fn event_type() -> &'static str {
        names::HOTKEY_REGISTRATION_FAILED
    }
}

/// Payload of `hotkey.conflict.detected`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotkeyConflictDetected {
    /// Hotkey in conflict
    pub hotkey_id: String,
    /// Combo already taken
    pub combination: String,
    /// Who holds it
    pub reason: String,
}

impl Event for HotkeyConflictDetected {
    fn event_type() -> &'static str {
        names::HOTKEY_CONFLICT_DETECTED
    }
}

/// Payload of `hotkey.conflict.resolved`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotkeyConflictResolved {
    /// Hotkey that moved
    pub hotkey_id: String,
    /// Combo that was taken
    pub original: String,
    /// Combo bound instead
    pub replacement: String,
}

impl Event for HotkeyConflictResolved {
    fn event_type() -> &'static str {
        names::HOTKEY_CONFLICT_RESOLVED
    }
}

/// Payload of `hotkey.configuration.reloaded`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotkeyConfigurationReloaded {
    /// Hotkeys bound after the reload
    pub registered: Vec<String>,
    /// Hotkeys that could not be bound
    pub failed: Vec<String>,
}

impl Event for HotkeyConfigurationReloaded {
    fn event_type() -> &'static str {
        names::HOTKEY_CONFIGURATION_RELOADED
    }
}

/// Payload of `hotkey.handler.error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotkeyHandlerError {
    /// Error text
    pub error: String,
}

impl Event for HotkeyHandlerError {
    fn event_type() -> &'static str {
        names::HOTKEY_HANDLER_ERROR
    }
}
