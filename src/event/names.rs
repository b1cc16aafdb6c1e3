//! The event namespace.
//!
//! Consumers match these strings exactly; the bus itself treats them as opaque.

/// All components started
pub const APP_READY: &str = "app.ready";
/// Something asked the app to quit
pub const APP_SHUTDOWN_REQUESTED: &str = "app.shutdown_requested";
/// The core is about to stop
pub const APP_SHUTDOWN_STARTING: &str = "app.shutdown_starting";
/// Application state transition
pub const APP_STATE_CHANGED: &str = "app.state_changed";

/// The screenshot hotkey was pressed
pub const HOTKEY_SCREENSHOT_CAPTURE: &str = "hotkey.screenshot_capture";
/// The overlay hotkey was pressed
pub const HOTKEY_OVERLAY_TOGGLE: &str = "hotkey.overlay_toggle";
/// The settings hotkey was pressed
pub const HOTKEY_SETTINGS_OPEN: &str = "hotkey.settings_open";
/// A hotkey was bound
pub const HOTKEY_REGISTRATION_SUCCESS: &str = "hotkey.registration.success";
/// A hotkey could not be bound
pub const HOTKEY_REGISTRATION_FAILED: &str = "hotkey.registration.failed";
/// A combo is already taken
pub const HOTKEY_CONFLICT_DETECTED: &str = "hotkey.conflict.detected";
/// A conflicting hotkey moved to an alternative combo
pub const HOTKEY_CONFLICT_RESOLVED: &str = "hotkey.conflict.resolved";
/// Hotkeys were re-registered from settings
pub const HOTKEY_CONFIGURATION_RELOADED: &str = "hotkey.configuration.reloaded";
/// The hotkey bridge is listening
pub const HOTKEY_HANDLER_READY: &str = "hotkey.handler.ready";
/// The hotkey bridge stopped
pub const HOTKEY_HANDLER_SHUTDOWN: &str = "hotkey.handler.shutdown";
/// The keyboard listener failed
pub const HOTKEY_HANDLER_ERROR: &str = "hotkey.handler.error";

/// Tray menu: settings
pub const TRAY_SETTINGS_REQUESTED: &str = "tray.settings_requested";
/// Tray menu: gallery
pub const TRAY_GALLERY_REQUESTED: &str = "tray.gallery_requested";
/// Tray menu: toggle overlay
pub const TRAY_OVERLAY_TOGGLE: &str = "tray.overlay_toggle";
/// Tray menu: quit
pub const TRAY_QUIT_REQUESTED: &str = "tray.quit_requested";

/// Show the overlay
pub const UI_OVERLAY_SHOW: &str = "ui.overlay.show";
/// Hide the overlay
pub const UI_OVERLAY_HIDE: &str = "ui.overlay.hide";
/// Open the settings window
pub const UI_SETTINGS_SHOW: &str = "ui.settings.show";
/// Open the gallery window
pub const UI_GALLERY_SHOW: &str = "ui.gallery.show";
/// Close the gallery window
pub const UI_GALLERY_HIDE: &str = "ui.gallery.hide";

/// A capture was asked for
pub const SCREENSHOT_CAPTURE_REQUESTED: &str = "screenshot.capture_requested";
/// A capture finished
pub const SCREENSHOT_CAPTURED: &str = "screenshot.captured";
/// A capture was saved and announced
pub const SCREENSHOT_COMPLETED: &str = "screenshot.completed";

/// One settings key changed
pub const SETTINGS_UPDATED: &str = "settings.updated";
/// Per-domain change forwarded by the orchestrator
pub const SETTINGS_CHANGED: &str = "settings.changed";
/// Settings were persisted
pub const SETTINGS_SAVED: &str = "settings.saved";
/// Something asked for settings to be persisted
pub const SETTINGS_SAVE_REQUESTED: &str = "settings.save_requested";

/// A handler or component reported an error
pub const ERROR_OCCURRED: &str = "error.occurred";

/// Every stable event type, in namespace order.
pub const ALL: &[&str] = &[
    APP_READY,
    APP_SHUTDOWN_REQUESTED,
    APP_SHUTDOWN_STARTING,
    APP_STATE_CHANGED,
    HOTKEY_SCREENSHOT_CAPTURE,
    HOTKEY_OVERLAY_TOGGLE,
    HOTKEY_SETTINGS_OPEN,
    HOTKEY_REGISTRATION_SUCCESS,
    HOTKEY_REGISTRATION_FAILED,
    HOTKEY_CONFLICT_DETECTED,
    HOTKEY_CONFLICT_RESOLVED,
    HOTKEY_CONFIGURATION_RELOADED,
    HOTKEY_HANDLER_READY,
    HOTKEY_HANDLER_SHUTDOWN,
    HOTKEY_HANDLER_ERROR,
    TRAY_SETTINGS_REQUESTED,
    TRAY_GALLERY_REQUESTED,
    TRAY_OVERLAY_TOGGLE,
    TRAY_QUIT_REQUESTED,
    UI_OVERLAY_SHOW,
    UI_OVERLAY_HIDE,
    UI_SETTINGS_SHOW,
    UI_GALLERY_SHOW,
    UI_GALLERY_HIDE,
    SCREENSHOT_CAPTURE_REQUESTED,
    SCREENSHOT_CAPTURED,
    SCREENSHOT_COMPLETED,
    SETTINGS_UPDATED,
    SETTINGS_CHANGED,
    SETTINGS_SAVED,
    SETTINGS_SAVE_REQUESTED,
    ERROR_OCCURRED,
];

/// Prefix shared by all hotkey-originated events
pub const HOTKEY_PREFIX: &str = "hotkey.";

/// Whether the event type belongs to the `hotkey.*` namespace
pub fn is_hotkey_event(event_type: &str) -> bool {
    event_type.starts_with(HOTKEY_PREFIX)
}
