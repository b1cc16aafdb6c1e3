//! What the orchestrator needs from the rest of the application.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Outcome of one screen capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureResult {
    /// Whether an image was captured
    pub success: bool,
    /// Opaque description of the capture (size, path, ...)
    #[serde(default)]
    pub metadata: Option<Value>,
    /// Why the capture failed
    #[serde(default)]
    pub error: Option<String>,
}

impl CaptureResult {
    /// A successful capture
    pub fn captured(metadata: Value) -> Self {
        Self {
            success: true,
            metadata: Some(metadata),
            error: None,
        }
    }

    /// A failed capture
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            metadata: None,
            error: Some(error.into()),
        }
    }
}

/// Takes screenshots.
#[async_trait]
pub trait ScreenCapture: Send + Sync + Debug {
    /// Capture the screen
    async fn capture(&self) -> CaptureResult;
}

/// Reports whether the overlay window is on screen.
pub trait OverlayState: Send + Sync + Debug {
    /// Whether the overlay is currently visible
    fn is_visible(&self) -> bool;
}

/// The tray icon's error indicator.
pub trait IconState: Send + Sync + Debug {
    /// Switch the error indicator on or off
    fn set_error_state(&self, active: bool);
}

/// Capture stand-in that always succeeds with empty metadata
#[derive(Debug, Default, Clone, Copy)]
pub struct StubCapture;

#[async_trait]
impl ScreenCapture for StubCapture {
    async fn capture(&self) -> CaptureResult {
        CaptureResult::captured(Value::Object(Default::default()))
    }
}

/// Overlay visibility flag shared with whatever shows the window
#[derive(Debug, Default, Clone)]
pub struct SharedOverlayState {
    visible: Arc<AtomicBool>,
}

impl SharedOverlayState {
    /// A hidden overlay
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the overlay's visibility
    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Release);
    }
}

impl OverlayState for SharedOverlayState {
    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }
}

/// Icon that remembers its error indicator and counts how often it was lit
#[derive(Debug, Default)]
pub struct RecordingIcon {
    error: AtomicBool,
    flashes: AtomicUsize,
}

impl RecordingIcon {
    /// A calm icon
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the error indicator is on
    pub fn in_error(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }

    /// How many times the indicator was switched on
    pub fn flash_count(&self) -> usize {
        self.flashes.load(Ordering::Acquire)
    }
}

impl IconState for RecordingIcon {
    fn set_error_state(&self, active: bool) {
        if active {
            self.flashes.fetch_add(1, Ordering::AcqRel);
        }
        self.error.store(active, Ordering::Release);
    }
}

/// The optional collaborators handed to the orchestrator.
///
/// Any of them may be missing; the matching routes then fall back to a
/// hidden overlay, an `error.occurred` for captures, and no icon feedback.
#[derive(Debug, Clone, Default)]
pub struct Collaborators {
    /// Screen capture service
    pub screen_capture: Option<Arc<dyn ScreenCapture>>,
    /// Overlay window state
    pub overlay: Option<Arc<dyn OverlayState>>,
    /// Tray icon
    pub icon: Option<Arc<dyn IconState>>,
}

impl Collaborators {
    /// No collaborators
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the screen capture service
    pub fn screen_capture(mut self, capture: Arc<dyn ScreenCapture>) -> Self {
        self.screen_capture = Some(capture);
        self
    }

    /// Set the overlay state
    pub fn overlay(mut self, overlay: Arc<dyn OverlayState>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    /// Set the tray icon
    pub fn icon(mut self, icon: Arc<dyn IconState>) -> Self {
        self.icon = Some(icon);
        self
    }
}
