//! The application's routing table.
//!
//! The orchestrator is the one subscriber that reacts to events by emitting
//! further events. Every route runs at [`ROUTE_PRIORITY`] so it sees an
//! event before ordinary observers, and every follow-up event is chained to
//! its cause (same correlation id, causation id = cause's event id).
//! Follow-ups are queued, never dispatched recursively.

use crate::config::OrchestratorConfig;
use crate::event::names;
use crate::event::payloads::{
    ErrorOccurred, OverlayRequest, ScreenshotCaptured, SettingsChanged, WindowRequest,
};
use crate::{Event, EventBus, EventEnvelope, EventHandler, Result, SubscribeOptions, SubscriptionHandle};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, info, warn};

mod collaborators;

pub use collaborators::{
    CaptureResult, Collaborators, IconState, OverlayState, RecordingIcon, ScreenCapture,
    SharedOverlayState, StubCapture,
};

/// Priority of every route
pub const ROUTE_PRIORITY: i32 = 100;

/// Source tag of every event the orchestrator emits
pub const ORCHESTRATOR_SOURCE: &str = "Orchestrator";

const HOTKEY_SETTINGS_PREFIX: &str = "hotkeys.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    ScreenshotCapture,
    OverlayToggle,
    SettingsOpen,
    TraySettings,
    TrayOverlay,
    TrayGallery,
    TrayQuit,
    ShutdownRequested,
    SettingsUpdated,
    ErrorOccurred,
}

const ROUTES: [(&str, Route); 10] = [
    (names::HOTKEY_SCREENSHOT_CAPTURE, Route::ScreenshotCapture),
    (names::HOTKEY_OVERLAY_TOGGLE, Route::OverlayToggle),
    (names::HOTKEY_SETTINGS_OPEN, Route::SettingsOpen),
    (names::TRAY_SETTINGS_REQUESTED, Route::TraySettings),
    (names::TRAY_OVERLAY_TOGGLE, Route::TrayOverlay),
    (names::TRAY_GALLERY_REQUESTED, Route::TrayGallery),
    (names::TRAY_QUIT_REQUESTED, Route::TrayQuit),
    (names::APP_SHUTDOWN_REQUESTED, Route::ShutdownRequested),
    (names::SETTINGS_UPDATED, Route::SettingsUpdated),
    (names::ERROR_OCCURRED, Route::ErrorOccurred),
];

/// Maps cause events to effect events.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

#[derive(Debug)]
struct OrchestratorInner {
    bus: EventBus,
    collaborators: Collaborators,
    config: OrchestratorConfig,
    /// In subscription order
    handles: Mutex<Vec<SubscriptionHandle>>,
    flash_generation: Arc<AtomicU64>,
    shut_down: AtomicBool,
}

struct RouteHandler {
    route: Route,
    name: String,
    inner: Weak<OrchestratorInner>,
}

#[async_trait]
impl EventHandler for RouteHandler {
    async fn handle(&self, event: &EventEnvelope) -> Result<Value> {
        match self.inner.upgrade() {
            Some(inner) => inner.route(self.route, event).await,
            None => Ok(Value::Null),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Orchestrator {
    /// Subscribe every route on `bus`
    pub fn start(
        bus: EventBus,
        collaborators: Collaborators,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        let inner = Arc::new(OrchestratorInner {
            bus,
            collaborators,
            config,
            handles: Mutex::new(Vec::with_capacity(ROUTES.len())),
            flash_generation: Arc::new(AtomicU64::new(0)),
            shut_down: AtomicBool::new(false),
        });

        let mut handles = Vec::with_capacity(ROUTES.len());
        for (event_type, route) in ROUTES {
            let name = format!("{}::{:?}", ORCHESTRATOR_SOURCE, route);
            let handler = RouteHandler {
                route,
                name: name.clone(),
                inner: Arc::downgrade(&inner),
            };
            let handle = inner.bus.subscribe(
                event_type,
                handler,
                SubscribeOptions::new().priority(ROUTE_PRIORITY).named(name),
            )?;
            handles.push(handle);
        }
        *lock(&inner.handles) = handles;

        info!(routes = ROUTES.len(), "Orchestrator initialized");
        Ok(Self { inner })
    }

    /// Number of routes still subscribed
    pub fn route_count(&self) -> usize {
        lock(&self.inner.handles).len()
    }

    /// Unsubscribe every route, last first, then yield once so an in-flight
    /// route can finish. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let handles = std::mem::take(&mut *lock(&self.inner.handles));
        let count = handles.len();
        for handle in handles.into_iter().rev() {
            self.inner.bus.unsubscribe_handle(handle);
        }
        tokio::task::yield_now().await;
        info!(routes = count, "Orchestrator shut down");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl OrchestratorInner {
    async fn route(&self, route: Route, event: &EventEnvelope) -> Result<Value> {
        debug!(?route, event_type = %event.event_type(), "Routing event");
        match route {
            Route::ScreenshotCapture => self.capture_screenshot(event).await,
            Route::OverlayToggle => {
                let visible = self
                    .collaborators
                    .overlay
                    .as_ref()
                    .map_or(false, |overlay| overlay.is_visible());
                let effect = if visible {
                    names::UI_OVERLAY_HIDE
                } else {
                    names::UI_OVERLAY_SHOW
                };
                self.follow(
                    event,
                    effect,
                    &OverlayRequest {
                        reason: Some("hotkey_toggle".into()),
                        source: None,
                    },
                )
            }
            Route::SettingsOpen => self.follow(event, names::UI_SETTINGS_SHOW, &window("hotkey")),
            Route::TraySettings => self.follow(event, names::UI_SETTINGS_SHOW, &window("tray")),
            Route::TrayOverlay => self.follow(
                event,
                names::UI_OVERLAY_SHOW,
                &OverlayRequest {
                    reason: None,
                    source: Some("tray".into()),
                },
            ),
            Route::TrayGallery => self.follow(event, names::UI_GALLERY_SHOW, &window("tray")),
            Route::TrayQuit => self.follow(
                event,
                names::APP_SHUTDOWN_REQUESTED,
                &json!({ "source": "tray" }),
            ),
            Route::ShutdownRequested => {
                info!(source = ?event.source(), "Shutdown requested");
                self.follow(
                    event,
                    names::APP_SHUTDOWN_STARTING,
                    &json!({ "requested_by": event.source() }),
                )
            }
            Route::SettingsUpdated => self.forward_setting(event),
            Route::ErrorOccurred => {
                self.report_error(event);
                Ok(Value::Null)
            }
        }
    }

    /// Queue an effect chained to its cause
    fn follow<P: Serialize>(
        &self,
        cause: &EventEnvelope,
        event_type: &str,
        payload: &P,
    ) -> Result<Value> {
        let effect = cause.chain(event_type, payload, ORCHESTRATOR_SOURCE)?;
        self.bus.emit_envelope(effect)?;
        Ok(Value::String(event_type.to_string()))
    }

    async fn capture_screenshot(&self, event: &EventEnvelope) -> Result<Value> {
        let Some(capture) = &self.collaborators.screen_capture else {
            warn!("Screenshot requested but no capture service is available");
            let failure = ErrorOccurred::new("screen capture unavailable", ORCHESTRATOR_SOURCE)
                .with_original_event(event.event_type());
            return self.follow(event, ErrorOccurred::event_type(), &failure);
        };

        let result = capture.capture().await;
        if result.success {
            let captured = ScreenshotCaptured {
                metadata: result.metadata.unwrap_or_else(|| json!({})),
                trigger: "hotkey".into(),
            };
            self.follow(event, ScreenshotCaptured::event_type(), &captured)
        } else {
            let reason = result
                .error
                .unwrap_or_else(|| "screen capture failed".to_string());
            warn!(error = %reason, "Screenshot capture failed");
            let failure = ErrorOccurred::new(reason, ORCHESTRATOR_SOURCE)
                .with_message("Screenshot capture failed")
                .with_original_event(event.event_type());
            self.follow(event, ErrorOccurred::event_type(), &failure)
        }
    }

    /// Forward non-hotkey settings to their domain; the hotkey bridge
    /// handles `hotkeys.*` itself
    fn forward_setting(&self, event: &EventEnvelope) -> Result<Value> {
        let Some(key) = event.str_field("key") else {
            warn!(event_id = %event.event_id(), "settings.updated without a key");
            return Ok(Value::Null);
        };
        if key.starts_with(HOTKEY_SETTINGS_PREFIX) {
            return Ok(Value::Null);
        }

        let domain = key.split('.').next().unwrap_or(key);
        let changed = SettingsChanged {
            domain: domain.to_string(),
            key: key.to_string(),
            value: event.payload().get("value").cloned().unwrap_or(Value::Null),
        };
        self.follow(event, SettingsChanged::event_type(), &changed)
    }

    fn report_error(&self, event: &EventEnvelope) {
        error!(
            error = event.str_field("error").unwrap_or("unknown"),
            source = event.str_field("source").unwrap_or("unknown"),
            original_event = event.str_field("original_event"),
            handler = event.str_field("handler"),
            "Error reported"
        );

        let Some(icon) = &self.collaborators.icon else {
            return;
        };
        icon.set_error_state(true);

        // A later error restarts the window
        let generation = self.flash_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let generations = Arc::clone(&self.flash_generation);
        let icon = Arc::clone(icon);
        let period = self.config.error_flash;
        tokio::spawn(async move {
            tokio::time::sleep(period).await;
            if generations.load(Ordering::Acquire) == generation {
                icon.set_error_state(false);
            }
        });
    }
}

fn window(source: &str) -> WindowRequest {
    WindowRequest {
        source: source.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug)]
    struct FailingCapture;

    #[async_trait]
    impl ScreenCapture for FailingCapture {
        async fn capture(&self) -> CaptureResult {
            CaptureResult::failed("display asleep")
        }
    }

    fn record(bus: &EventBus, event_type: &str) -> (SubscriptionHandle, Arc<Mutex<Vec<EventEnvelope>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = bus
            .subscribe_fn(
                event_type,
                move |e: &EventEnvelope| sink.lock().unwrap().push(e.clone()),
                SubscribeOptions::new(),
            )
            .unwrap();
        (handle, seen)
    }

    fn setup(collaborators: Collaborators) -> (EventBus, Orchestrator) {
        let bus = EventBus::builder().test().build().unwrap();
        let config = OrchestratorConfig {
            error_flash: Duration::from_millis(20),
        };
        let orchestrator = Orchestrator::start(bus.clone(), collaborators, config).unwrap();
        (bus, orchestrator)
    }

    #[tokio::test]
    async fn test_overlay_toggle_follows_visibility() {
        let overlay = SharedOverlayState::new();
        let (bus, _orchestrator) = setup(Collaborators::new().overlay(Arc::new(overlay.clone())));
        let (_show, shown) = record(&bus, names::UI_OVERLAY_SHOW);
        let (_hide, hidden) = record(&bus, names::UI_OVERLAY_HIDE);

        bus.emit(names::HOTKEY_OVERLAY_TOGGLE, json!({})).unwrap();
        bus.flush().await;
        overlay.set_visible(true);
        bus.emit(names::HOTKEY_OVERLAY_TOGGLE, json!({})).unwrap();
        bus.flush().await;

        assert_eq!(shown.lock().unwrap().len(), 1);
        let hidden = hidden.lock().unwrap();
        assert_eq!(hidden.len(), 1);
        assert_eq!(hidden[0].str_field("reason"), Some("hotkey_toggle"));
        assert_eq!(hidden[0].source(), Some(ORCHESTRATOR_SOURCE));
    }

    #[tokio::test]
    async fn test_settings_windows_name_their_source() {
        let (bus, _orchestrator) = setup(Collaborators::new());
        let (_handle, seen) = record(&bus, names::UI_SETTINGS_SHOW);

        bus.emit(names::HOTKEY_SETTINGS_OPEN, json!({})).unwrap();
        bus.emit(names::TRAY_SETTINGS_REQUESTED, json!({})).unwrap();
        bus.flush().await;

        let sources: Vec<_> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.str_field("source").unwrap().to_string())
            .collect();
        assert_eq!(sources, vec!["hotkey", "tray"]);
    }

    #[tokio::test]
    async fn test_quit_chains_to_shutdown_starting() {
        let (bus, _orchestrator) = setup(Collaborators::new());
        let (_handle, seen) = record(&bus, names::APP_SHUTDOWN_STARTING);

        let id = bus.emit(names::TRAY_QUIT_REQUESTED, json!({})).unwrap();
        bus.flush().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].correlation_id(), Some(id));
    }

    #[tokio::test]
    async fn test_screenshot_routes() {
        let (bus, _orchestrator) = setup(Collaborators::new().screen_capture(Arc::new(StubCapture)));
        let (_handle, captured) = record(&bus, names::SCREENSHOT_CAPTURED);
        bus.emit(names::HOTKEY_SCREENSHOT_CAPTURE, json!({})).unwrap();
        bus.flush().await;
        assert_eq!(captured.lock().unwrap()[0].str_field("trigger"), Some("hotkey"));

        let icon = Arc::new(RecordingIcon::new());
        let (bus, _orchestrator) = setup(
            Collaborators::new()
                .screen_capture(Arc::new(FailingCapture))
                .icon(icon.clone()),
        );
        let (_handle, errors) = record(&bus, names::ERROR_OCCURRED);
        bus.emit(names::HOTKEY_SCREENSHOT_CAPTURE, json!({})).unwrap();
        bus.flush().await;

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].str_field("error"), Some("display asleep"));
        assert_eq!(errors[0].str_field("original_event"), Some(names::HOTKEY_SCREENSHOT_CAPTURE));
        assert!(icon.in_error());
        assert_eq!(icon.flash_count(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!icon.in_error());
    }

    #[tokio::test]
    async fn test_settings_forwarded_by_domain() {
        let (bus, _orchestrator) = setup(Collaborators::new());
        let (_handle, seen) = record(&bus, names::SETTINGS_CHANGED);

        bus.emit(names::SETTINGS_UPDATED, json!({"key": "ui.theme", "value": "dark"}))
            .unwrap();
        bus.emit(
            names::SETTINGS_UPDATED,
            json!({"key": "hotkeys.overlay_toggle", "value": "ctrl+alt+o"}),
        )
        .unwrap();
        bus.flush().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].str_field("domain"), Some("ui"));
        assert_eq!(seen[0].payload()["value"], json!("dark"));
    }

    #[tokio::test]
    async fn test_shutdown_unsubscribes_all_routes() {
        let (bus, orchestrator) = setup(Collaborators::new());
        assert_eq!(orchestrator.route_count(), ROUTES.len());
        assert_eq!(bus.subscription_count(names::TRAY_QUIT_REQUESTED), 1);

        orchestrator.shutdown().await;
        orchestrator.shutdown().await;
        assert_eq!(orchestrator.route_count(), 0);
        for (event_type, _) in ROUTES {
            assert_eq!(bus.subscription_count(event_type), 0);
        }
    }
}
