//! Global hotkeys bridged from a keyboard-listener thread onto the bus.
//!
//! The bridge owns three things:
//!
//! - a [`KeyThread`] running a blocking [`KeyboardListener`];
//! - a bounded crossbeam queue whose only producer is that thread;
//! - a dispatcher task on the Tokio runtime that drains the queue and emits
//!   the logical hotkey events.
//!
//! Registration probes each combo through a [`ConflictOracle`] and, on a
//! conflict, tries up to three alternatives before giving up.

use crate::config::HotkeyConfig;
use crate::event::names;
use crate::event::payloads::{
    HotkeyConfigurationReloaded, HotkeyConflictDetected, HotkeyConflictResolved,
    HotkeyHandlerError, HotkeyRegistered, HotkeyRegistrationFailed, HotkeyTriggered,
};
use crate::settings::{InMemorySettings, SettingsSource};
use crate::subscription::SubscriptionHandle;
use crate::{Error, Event, EventBus, EventEnvelope, EventMetadata, Result, SubscribeOptions};
use crossbeam_channel::{Receiver, TryRecvError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

pub mod combo;
pub mod listener;
pub mod probe;
pub mod registration;

pub use combo::{Combo, Key, Modifier, NamedKey};
pub use listener::{
    ActiveBinding, BindingTable, FakeKeyboard, FakeKeyboardHandle, HotkeyEvent, KeyCallbacks,
    KeyMessage, KeySink, KeyThread, KeyboardListener, ModifierKey, RawKey,
};
pub use probe::{AcceptAllOracle, ConflictOracle, ScriptedOracle};
pub use registration::{ConflictInfo, HotkeyRegistration, RegistrationState};

/// Source tag of every event the bridge emits
pub const BRIDGE_SOURCE: &str = "HotkeyBridge";

/// Most alternatives probed when resolving a conflict
pub const MAX_ALTERNATIVES: usize = 3;

const SETTINGS_PREFIX: &str = "hotkeys.";

/// Event type emitted when a hotkey with `action` fires
pub fn event_type_for_action(action: &str) -> String {
    match action {
        "capture_screenshot" => names::HOTKEY_SCREENSHOT_CAPTURE.to_string(),
        "toggle_overlay" => names::HOTKEY_OVERLAY_TOGGLE.to_string(),
        "open_settings" => names::HOTKEY_SETTINGS_OPEN.to_string(),
        other => format!("{}{}", names::HOTKEY_PREFIX, other),
    }
}

/// Builder for [`HotkeyBridge`]
#[derive(Debug)]
pub struct HotkeyBridgeBuilder {
    bus: EventBus,
    config: HotkeyConfig,
    oracle: Arc<dyn ConflictOracle>,
    settings: Option<Arc<dyn SettingsSource>>,
}

impl HotkeyBridgeBuilder {
    /// Use a custom configuration
    pub fn config(mut self, config: HotkeyConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a conflict oracle; the default accepts every combo
    pub fn oracle(mut self, oracle: Arc<dyn ConflictOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    /// Settings source read on reload
    pub fn settings(mut self, settings: Arc<dyn SettingsSource>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Start the key thread and the dispatcher, register the configured
    /// hotkeys and subscribe to settings changes.
    ///
    /// Failing to start the key thread is fatal; individual registration
    /// failures are only reported on the bus.
    pub async fn start(self, listener: Box<dyn KeyboardListener>) -> Result<HotkeyBridge> {
        if self.bus.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        let (tx, rx) = crossbeam_channel::bounded(self.config.queue_capacity.max(1));
        let bindings = BindingTable::default();
        let key_thread = KeyThread::spawn(listener, Arc::clone(&bindings), tx)?;

        let retry = RetryPolicy::from(&self.config);
        let inner = Arc::new(BridgeInner {
            bus: self.bus,
            config: self.config,
            oracle: self.oracle,
            settings: self.settings,
            overrides: InMemorySettings::new(),
            registrations: Mutex::new(BTreeMap::new()),
            bindings,
            retry: StdMutex::new(retry),
            key_thread: StdMutex::new(Some(key_thread)),
            dispatcher: StdMutex::new(None),
            subscriptions: StdMutex::new(Vec::new()),
            reload_generation: AtomicU64::new(0),
            running: AtomicBool::new(true),
            shut_down: AtomicBool::new(false),
        });

        let task = tokio::spawn(run_dispatcher(Arc::clone(&inner), rx));
        *lock(&inner.dispatcher) = Some(task);

        let bridge = HotkeyBridge { inner };
        let summary = bridge.register_configured(&bridge.inner.config.clone()).await;
        bridge.subscribe_settings()?;

        info!(
            registered = summary.registered.len(),
            failed = summary.failed.len(),
            "Hotkey bridge ready"
        );
        bridge.inner.announce(names::HOTKEY_HANDLER_READY, &summary);
        Ok(bridge)
    }
}

/// Owns the key thread and the registrations of every global hotkey.
///
/// Cloning is cheap; clones share the same bridge.
#[derive(Debug, Clone)]
pub struct HotkeyBridge {
    inner: Arc<BridgeInner>,
}

/// How often, and how far apart, a failing oracle probe is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
}

impl From<&HotkeyConfig> for RetryPolicy {
    fn from(config: &HotkeyConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: config.retry_delay,
        }
    }
}

#[derive(Debug)]
struct BridgeInner {
    bus: EventBus,
    config: HotkeyConfig,
    oracle: Arc<dyn ConflictOracle>,
    settings: Option<Arc<dyn SettingsSource>>,

    /// Hotkey values seen on `settings.updated`, layered over `settings`
    overrides: InMemorySettings,

    /// Registration state, touched only from the runtime
    registrations: Mutex<BTreeMap<String, HotkeyRegistration>>,

    /// Active combos read by the key thread
    bindings: BindingTable,

    /// Retry policy of the configuration applied last
    retry: StdMutex<RetryPolicy>,

    key_thread: StdMutex<Option<KeyThread>>,
    dispatcher: StdMutex<Option<JoinHandle<()>>>,
    subscriptions: StdMutex<Vec<SubscriptionHandle>>,

    /// Bumped on every settings change; a delayed reload only runs if no
    /// newer change arrived in the meantime
    reload_generation: AtomicU64,

    /// Cleared to let the dispatcher drain the queue and exit
    running: AtomicBool,
    shut_down: AtomicBool,
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl HotkeyBridge {
    /// Start building a bridge on `bus`
    pub fn builder(bus: EventBus) -> HotkeyBridgeBuilder {
        HotkeyBridgeBuilder {
            bus,
            config: HotkeyConfig::default(),
            oracle: Arc::new(AcceptAllOracle),
            settings: None,
        }
    }

    /// Register (or re-register) a hotkey.
    ///
    /// Returns the combo actually bound, which differs from the requested
    /// one when a conflict was resolved with an alternative.
    pub async fn register(&self, hotkey_id: &str, combo: &str, action: &str) -> Result<Combo> {
        let retry = *lock(&self.inner.retry);
        let mut registrations = self.inner.registrations.lock().await;
        self.inner
            .register_locked(&mut registrations, hotkey_id, combo, action, retry)
            .await
    }

    /// Release a hotkey. Returns `false` if it was not known.
    pub async fn unregister(&self, hotkey_id: &str) -> bool {
        let mut registrations = self.inner.registrations.lock().await;
        self.inner.unregister_locked(&mut registrations, hotkey_id).await
    }

    /// Active registrations ordered by hotkey id
    pub async fn list_registered(&self) -> Vec<HotkeyRegistration> {
        self.inner
            .registrations
            .lock()
            .await
            .values()
            .filter(|r| r.is_active())
            .cloned()
            .collect()
    }

    /// A registration in any state
    pub async fn registration(&self, hotkey_id: &str) -> Option<HotkeyRegistration> {
        self.inner.registrations.lock().await.get(hotkey_id).cloned()
    }

    /// Re-read the hotkey settings and re-register everything
    pub async fn reload(&self) -> Result<HotkeyConfigurationReloaded> {
        self.inner.reload().await
    }

    /// Replace all registrations with those of `config`
    pub async fn reload_with(&self, config: &HotkeyConfig) -> Result<HotkeyConfigurationReloaded> {
        self.inner.reload_with(config).await
    }

    async fn register_configured(&self, config: &HotkeyConfig) -> HotkeyConfigurationReloaded {
        let mut registrations = self.inner.registrations.lock().await;
        self.inner.register_all(&mut registrations, config).await
    }

    fn subscribe_settings(&self) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        let updated = self.inner.bus.subscribe_async(
            names::SETTINGS_UPDATED,
            move |event: EventEnvelope| {
                let weak = weak.clone();
                async move { on_settings_updated(&weak, &event) }
            },
            SubscribeOptions::new().named("HotkeyBridge.settings_updated"),
        )?;

        let weak = Arc::downgrade(&self.inner);
        let saved = self.inner.bus.subscribe_async(
            names::SETTINGS_SAVED,
            move |event: EventEnvelope| {
                let weak = weak.clone();
                async move { on_settings_saved(&weak, &event) }
            },
            SubscribeOptions::new().named("HotkeyBridge.settings_saved"),
        )?;

        lock(&self.inner.subscriptions).extend([updated, saved]);
        Ok(())
    }

    /// Stop the key thread, drain the queue, release every hotkey and emit
    /// `hotkey.handler.shutdown`. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Shutting down hotkey bridge");

        // No more reloads, pending or new
        lock(&inner.subscriptions).clear();
        inner.reload_generation.fetch_add(1, Ordering::AcqRel);

        let key_thread = lock(&inner.key_thread).take();
        let joined = match key_thread {
            Some(thread) => thread.join(inner.config.join_timeout).await,
            None => true,
        };

        inner.running.store(false, Ordering::Release);
        let task = lock(&inner.dispatcher).take();
        if let Some(task) = task {
            if tokio::time::timeout(inner.config.join_timeout, task).await.is_err() {
                warn!("Hotkey dispatcher did not drain in time");
            }
        }

        let released = {
            let mut registrations = inner.registrations.lock().await;
            let ids: Vec<String> = registrations.keys().cloned().collect();
            for id in &ids {
                inner.unregister_locked(&mut registrations, id).await;
            }
            ids.len()
        };

        inner.announce(
            names::HOTKEY_HANDLER_SHUTDOWN,
            &serde_json::json!({ "released": released, "listener_joined": joined }),
        );
        info!(released, "Hotkey bridge shut down");

        if joined {
            Ok(())
        } else {
            Err(Error::Timeout {
                operation: "hotkey listener join",
                timeout: inner.config.join_timeout,
            })
        }
    }
}

fn on_settings_updated(weak: &Weak<BridgeInner>, event: &EventEnvelope) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let Some(key) = event.str_field("key") else {
        return;
    };
    if !key.starts_with(SETTINGS_PREFIX) {
        return;
    }

    if let Some(value) = event.payload().get("value") {
        inner.overrides.insert(key, value.clone());
    }
    if event.bool_field("full_save").unwrap_or(false) {
        trace!(%key, "Hotkey setting part of a bulk save, waiting for settings.saved");
        return;
    }
    inner.schedule_reload();
}

fn on_settings_saved(weak: &Weak<BridgeInner>, event: &EventEnvelope) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let touches_hotkeys = match event.payload().get("keys").and_then(|k| k.as_array()) {
        Some(keys) => keys
            .iter()
            .filter_map(|k| k.as_str())
            .any(|k| k.starts_with(SETTINGS_PREFIX)),
        None => true,
    };
    if touches_hotkeys {
        inner.schedule_reload();
    }
}

impl BridgeInner {
    fn announce<P: serde::Serialize>(&self, event_type: &str, payload: &P) {
        let metadata = EventMetadata::from_source(BRIDGE_SOURCE);
        let result = serde_json::to_value(payload)
            .map_err(Error::from)
            .and_then(|payload| self.bus.emit_with(event_type, payload, metadata));
        if let Err(e) = result {
            warn!(%event_type, error = %e, "Could not emit hotkey event");
        }
    }

    fn publish<T: Event>(&self, event: &T) {
        self.announce(T::event_type(), event);
    }

    /// Probe a combo, retrying transient oracle failures
    async fn probe(&self, combo: &Combo, retry: RetryPolicy) -> Result<bool> {
        let mut attempt = 0;
        loop {
            match self.oracle.probe(combo).await {
                Ok(available) => return Ok(available),
                Err(e) if attempt < retry.max_retries => {
                    attempt += 1;
                    warn!(%combo, attempt, error = %e, "Hotkey probe failed, retrying");
                    tokio::time::sleep(retry.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn owner_of(
        registrations: &BTreeMap<String, HotkeyRegistration>,
        combo: &Combo,
        except: &str,
    ) -> Option<String> {
        registrations
            .values()
            .find(|r| r.is_active() && r.hotkey_id() != except && r.combo() == combo)
            .map(|r| r.hotkey_id().to_string())
    }

    fn bind(&self, registration: &HotkeyRegistration) {
        self.bindings.insert(
            registration.hotkey_id().to_string(),
            ActiveBinding {
                combo: registration.combo().clone(),
                action: registration.action().to_string(),
            },
        );
        self.publish(&HotkeyRegistered {
            hotkey_id: registration.hotkey_id().to_string(),
            combination: registration.combo().display().to_string(),
            action: registration.action().to_string(),
        });
        debug!(
            hotkey_id = %registration.hotkey_id(),
            combo = %registration.combo(),
            "Hotkey registered"
        );
    }

    async fn register_locked(
        &self,
        registrations: &mut BTreeMap<String, HotkeyRegistration>,
        hotkey_id: &str,
        combo: &str,
        action: &str,
        retry: RetryPolicy,
    ) -> Result<Combo> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }

        let combo = match Combo::parse(combo) {
            Ok(combo) => combo,
            Err(e) => {
                warn!(%hotkey_id, combination = %combo, error = %e, "Invalid hotkey combination");
                self.publish(&HotkeyRegistrationFailed {
                    hotkey_id: hotkey_id.to_string(),
                    combination: combo.to_string(),
                    reason: e.to_string(),
                    alternatives: Vec::new(),
                });
                return Err(e);
            }
        };

        self.unregister_locked(registrations, hotkey_id).await;
        let mut registration = HotkeyRegistration::new(hotkey_id, combo.clone(), action);
        registration.begin()?;

        let outcome = match Self::owner_of(registrations, &combo, hotkey_id) {
            Some(owner) => Ok(Err(format!("already bound to '{}'", owner))),
            None => self
                .probe(&combo, retry)
                .await
                .map(|available| if available { Ok(()) } else { Err("taken by another application".to_string()) }),
        };

        let result = match outcome {
            Ok(Ok(())) => {
                registration.confirm()?;
                self.bind(&registration);
                Ok(combo)
            }
            Ok(Err(reason)) => {
                registration.conflict(reason)?;
                self.resolve_conflict(registrations, &mut registration, retry).await
            }
            Err(e) => {
                registration.fail()?;
                error!(%hotkey_id, %combo, error = %e, "Hotkey probe kept failing");
                self.publish(&HotkeyRegistrationFailed {
                    hotkey_id: hotkey_id.to_string(),
                    combination: combo.display().to_string(),
                    reason: e.to_string(),
                    alternatives: Vec::new(),
                });
                Err(e)
            }
        };

        registrations.insert(hotkey_id.to_string(), registration);
        result
    }

    async fn resolve_conflict(
        &self,
        registrations: &BTreeMap<String, HotkeyRegistration>,
        registration: &mut HotkeyRegistration,
        retry: RetryPolicy,
    ) -> Result<Combo> {
        let hotkey_id = registration.hotkey_id().to_string();
        let original = registration.combo().clone();
        let reason = registration
            .conflict_info()
            .map(|info| info.reason.clone())
            .unwrap_or_default();

        warn!(%hotkey_id, combo = %original, %reason, "Hotkey conflict detected");
        self.publish(&HotkeyConflictDetected {
            hotkey_id: hotkey_id.clone(),
            combination: original.display().to_string(),
            reason: reason.clone(),
        });

        let candidates: Vec<Combo> = original
            .alternatives()
            .into_iter()
            .filter(|c| Self::owner_of(registrations, c, &hotkey_id).is_none())
            .take(MAX_ALTERNATIVES)
            .collect();
        registration.record_alternatives(candidates.clone());

        for candidate in &candidates {
            match self.probe(candidate, retry).await {
                Ok(true) => {
                    registration.resolve(candidate.clone())?;
                    info!(%hotkey_id, original = %original, replacement = %candidate, "Hotkey conflict resolved");
                    self.publish(&HotkeyConflictResolved {
                        hotkey_id: hotkey_id.clone(),
                        original: original.display().to_string(),
                        replacement: candidate.display().to_string(),
                    });
                    self.bind(registration);
                    return Ok(candidate.clone());
                }
                Ok(false) => trace!(%hotkey_id, %candidate, "Alternative also taken"),
                Err(e) => warn!(%hotkey_id, %candidate, error = %e, "Could not probe alternative"),
            }
        }

        registration.fail()?;
        warn!(%hotkey_id, combo = %original, "No usable alternative for hotkey");
        self.publish(&HotkeyRegistrationFailed {
            hotkey_id,
            combination: original.display().to_string(),
            reason: reason.clone(),
            alternatives: candidates.iter().map(|c| c.display().to_string()).collect(),
        });
        Err(Error::Conflict {
            combo: original.display().to_string(),
            reason,
        })
    }

    async fn unregister_locked(
        &self,
        registrations: &mut BTreeMap<String, HotkeyRegistration>,
        hotkey_id: &str,
    ) -> bool {
        let Some(mut registration) = registrations.remove(hotkey_id) else {
            return false;
        };
        self.bindings.remove(hotkey_id);
        if registration.is_active() {
            self.oracle.release(registration.combo()).await;
        }
        registration.unregister();
        debug!(%hotkey_id, "Hotkey unregistered");
        true
    }

    async fn register_all(
        &self,
        registrations: &mut BTreeMap<String, HotkeyRegistration>,
        config: &HotkeyConfig,
    ) -> HotkeyConfigurationReloaded {
        let retry = RetryPolicy::from(config);
        *lock(&self.retry) = retry;
        let mut summary = HotkeyConfigurationReloaded {
            registered: Vec::new(),
            failed: Vec::new(),
        };
        for binding in &config.bindings {
            match self
                .register_locked(registrations, &binding.hotkey_id, &binding.combo, &binding.action, retry)
                .await
            {
                Ok(_) => summary.registered.push(binding.hotkey_id.clone()),
                Err(_) => summary.failed.push(binding.hotkey_id.clone()),
            }
        }
        summary
    }

    /// Current hotkey configuration: settings source, then values seen on
    /// the bus, over the configured defaults
    fn effective_config(&self) -> HotkeyConfig {
        let config = match &self.settings {
            Some(settings) => HotkeyConfig::from_settings_with(self.config.clone(), settings.as_ref()),
            None => self.config.clone(),
        };
        HotkeyConfig::from_settings_with(config, &self.overrides)
    }

    async fn reload(&self) -> Result<HotkeyConfigurationReloaded> {
        let config = self.effective_config();
        self.reload_with(&config).await
    }

    async fn reload_with(&self, config: &HotkeyConfig) -> Result<HotkeyConfigurationReloaded> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }

        let mut registrations = self.registrations.lock().await;
        let ids: Vec<String> = registrations.keys().cloned().collect();
        for id in &ids {
            self.unregister_locked(&mut registrations, id).await;
        }
        let summary = self.register_all(&mut registrations, config).await;
        drop(registrations);

        info!(
            registered = ?summary.registered,
            failed = ?summary.failed,
            "Hotkey configuration reloaded"
        );
        self.publish(&summary);
        Ok(summary)
    }

    fn schedule_reload(self: &Arc<Self>) {
        let generation = self.reload_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let debounce = self.config.reload_debounce;
        let weak = Arc::downgrade(self);
        trace!(generation, "Hotkey reload scheduled");

        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.reload_generation.load(Ordering::Acquire) != generation {
                trace!(generation, "Hotkey reload superseded");
                return;
            }
            if let Err(e) = inner.reload().await {
                warn!(error = %e, "Hotkey reload failed");
            }
        });
    }

    async fn handle_message(&self, message: KeyMessage) {
        match message {
            KeyMessage::Hotkey(event) => {
                {
                    let mut registrations = self.registrations.lock().await;
                    match registrations.get_mut(&event.hotkey_id) {
                        Some(registration) if registration.is_active() => {
                            registration.record_trigger(event.timestamp)
                        }
                        _ => {
                            debug!(hotkey_id = %event.hotkey_id, "Ignoring trigger of inactive hotkey");
                            return;
                        }
                    }
                }

                let payload = HotkeyTriggered {
                    hotkey_id: event.hotkey_id.clone(),
                    combination: event.combo.display().to_string(),
                    timestamp: event.timestamp.timestamp_millis() as f64 / 1000.0,
                    source: BRIDGE_SOURCE.to_string(),
                };
                let event_type = event_type_for_action(&event.action);
                debug!(hotkey_id = %event.hotkey_id, %event_type, "Hotkey triggered");
                self.announce(&event_type, &payload);
            }
            KeyMessage::ListenerError(message) => {
                error!(error = %message, "Keyboard listener failed");
                self.publish(&HotkeyHandlerError { error: message });
            }
        }
    }
}

/// Drain the key-thread queue until the bridge stops and the queue is empty
async fn run_dispatcher(inner: Arc<BridgeInner>, rx: Receiver<KeyMessage>) {
    debug!("Hotkey dispatcher started");
    loop {
        match rx.try_recv() {
            Ok(message) => {
                inner.handle_message(message).await;
                tokio::task::yield_now().await;
            }
            Err(TryRecvError::Empty) => {
                if !inner.running.load(Ordering::Acquire) {
                    break;
                }
                tokio::time::sleep(inner.config.poll_interval).await;
            }
            Err(TryRecvError::Disconnected) => {
                debug!("Key thread gone, hotkey queue closed");
                break;
            }
        }
    }
    debug!("Hotkey dispatcher stopped");
}
