//! The root context of the application.
//!
//! A [`Core`] owns exactly one bus, one hotkey bridge and one orchestrator.
//! They start in dependency order (bus, bridge, orchestrator) and stop in
//! reverse.

use crate::config::CoreConfig;
use crate::event::names;
use crate::hotkey::{AcceptAllOracle, ConflictOracle, HotkeyBridge, KeyboardListener};
use crate::orchestrator::{Collaborators, Orchestrator};
use crate::settings::SettingsSource;
use crate::{EventBus, EventEnvelope, EventMetadata, Result, SubscribeOptions, SubscriptionHandle};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Source tag of lifecycle events
pub const CORE_SOURCE: &str = "Core";

/// Builder for [`Core`]
#[derive(Debug)]
pub struct CoreBuilder {
    config: CoreConfig,
    collaborators: Collaborators,
    oracle: Arc<dyn ConflictOracle>,
    settings: Option<Arc<dyn SettingsSource>>,
}

impl CoreBuilder {
    /// Collaborators used by the orchestrator
    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Conflict oracle used by the hotkey bridge
    pub fn oracle(mut self, oracle: Arc<dyn ConflictOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    /// Settings source read on hotkey reloads
    pub fn settings(mut self, settings: Arc<dyn SettingsSource>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Start everything and emit `app.ready`.
    ///
    /// If a later component fails to start, the ones already running are
    /// shut down before the error is returned.
    pub async fn start(self, listener: Box<dyn KeyboardListener>) -> Result<Core> {
        let bus = EventBus::builder().config(self.config.event_bus.clone()).build()?;

        let mut bridge = HotkeyBridge::builder(bus.clone())
            .config(self.config.hotkeys.clone())
            .oracle(self.oracle);
        if let Some(settings) = self.settings {
            bridge = bridge.settings(settings);
        }
        let bridge = match bridge.start(listener).await {
            Ok(bridge) => bridge,
            Err(e) => {
                let _ = bus.shutdown().await;
                return Err(e);
            }
        };

        let orchestrator = match Orchestrator::start(
            bus.clone(),
            self.collaborators,
            self.config.orchestrator.clone(),
        ) {
            Ok(orchestrator) => orchestrator,
            Err(e) => {
                let _ = bridge.shutdown().await;
                let _ = bus.shutdown().await;
                return Err(e);
            }
        };

        let shutdown_notice = Arc::new(Notify::new());
        let notify = Arc::clone(&shutdown_notice);
        let shutdown_watch = bus.subscribe_fn(
            names::APP_SHUTDOWN_STARTING,
            move |_: &EventEnvelope| notify.notify_one(),
            SubscribeOptions::new().named("Core.shutdown_watch"),
        )?;

        let hotkeys: Vec<String> = bridge
            .list_registered()
            .await
            .iter()
            .map(|r| r.hotkey_id().to_string())
            .collect();
        info!(?hotkeys, "Core ready");
        bus.emit_with(
            names::APP_READY,
            json!({ "hotkeys": hotkeys }),
            EventMetadata::from_source(CORE_SOURCE),
        )?;

        Ok(Core {
            bus,
            bridge,
            orchestrator,
            shutdown_notice,
            _shutdown_watch: shutdown_watch,
            shut_down: AtomicBool::new(false),
        })
    }
}

/// The running application core.
#[derive(Debug)]
pub struct Core {
    bus: EventBus,
    bridge: HotkeyBridge,
    orchestrator: Orchestrator,
    shutdown_notice: Arc<Notify>,
    _shutdown_watch: SubscriptionHandle,
    shut_down: AtomicBool,
}

impl Core {
    /// Start building a core
    pub fn builder(config: CoreConfig) -> CoreBuilder {
        CoreBuilder {
            config,
            collaborators: Collaborators::default(),
            oracle: Arc::new(AcceptAllOracle),
            settings: None,
        }
    }

    /// The application's bus
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The hotkey bridge
    pub fn bridge(&self) -> &HotkeyBridge {
        &self.bridge
    }

    /// The orchestrator
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Resolve once `app.shutdown_starting` has been dispatched
    pub async fn shutdown_requested(&self) {
        self.shutdown_notice.notified().await;
    }

    /// Stop the orchestrator, then the bridge, then the bus.
    ///
    /// Every component is stopped even if an earlier one reports an error;
    /// the first error is returned.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Shutting down core");

        self.orchestrator.shutdown().await;
        let bridge = self.bridge.shutdown().await;
        if let Err(e) = &bridge {
            warn!(error = %e, "Hotkey bridge did not shut down cleanly");
        }
        let bus = self.bus.shutdown().await;
        if let Err(e) = &bus {
            warn!(error = %e, "Event bus did not shut down cleanly");
        }

        info!("Core shut down");
        bridge.and(bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::FakeKeyboard;
    use std::time::Duration;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let (keyboard, _keys) = FakeKeyboard::new();
        let core = Core::builder(CoreConfig::test())
            .start(Box::new(keyboard))
            .await
            .unwrap();

        assert_eq!(core.bridge().list_registered().await.len(), 3);
        assert_eq!(core.orchestrator().route_count(), 10);
        core.bus().flush().await;
        assert!(core
            .bus()
            .recent_events(100)
            .iter()
            .any(|e| e.is(names::APP_READY)));

        core.shutdown().await.unwrap();
        core.shutdown().await.unwrap();
        assert!(core.bus().is_shutting_down());
        assert_eq!(core.orchestrator().route_count(), 0);
    }

    #[tokio::test]
    async fn test_tray_quit_signals_shutdown() {
        let (keyboard, _keys) = FakeKeyboard::new();
        let core = Core::builder(CoreConfig::test())
            .start(Box::new(keyboard))
            .await
            .unwrap();

        core.bus().emit(names::TRAY_QUIT_REQUESTED, json!({})).unwrap();
        tokio::time::timeout(Duration::from_secs(1), core.shutdown_requested())
            .await
            .unwrap();
        core.shutdown().await.unwrap();
    }
}
