//! Configuration of the whole core.
//!
//! Settings are read through a [`SettingsSource`] using the dotted keys the
//! settings feed publishes (`event_bus.queue_capacity`,
//! `hotkeys.overlay_toggle`, ...). Missing keys fall back to defaults; keys
//! holding the wrong type are logged and fall back as well.
//!
//! A configuration file is stricter: [`CoreConfig::from_json_str`]
//! deserializes its `event_bus` and `hotkeys` sections with serde and rejects
//! values of the wrong type.

use crate::bus::EventBusConfig;
use crate::settings::{InMemorySettings, SettingsSource};
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Hotkey id, default combo and action of the built-in bindings
const DEFAULT_BINDINGS: [(&str, &str, &str); 3] = [
    ("screenshot_capture", "ctrl+shift+s", "capture_screenshot"),
    ("overlay_toggle", "ctrl+shift+o", "toggle_overlay"),
    ("settings_open", "ctrl+alt+s", "open_settings"),
];

/// One configured hotkey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotkeyBindingConfig {
    /// Stable application-chosen id, also the settings key suffix
    pub hotkey_id: String,
    /// Combo as written in settings; validated at registration
    pub combo: String,
    /// Action name mapped to the emitted event type
    pub action: String,
}

impl HotkeyBindingConfig {
    /// Create a binding
    pub fn new(
        hotkey_id: impl Into<String>,
        combo: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            hotkey_id: hotkey_id.into(),
            combo: combo.into(),
            action: action.into(),
        }
    }
}

/// Configuration of the hotkey bridge
#[derive(Debug, Clone, PartialEq)]
pub struct HotkeyConfig {
    /// Hotkeys registered at start-up and on every reload
    pub bindings: Vec<HotkeyBindingConfig>,

    /// Retries of a probe that failed transiently
    pub max_retries: u32,

    /// Delay between probe retries
    pub retry_delay: Duration,

    /// Quiet period that batches rapid settings updates into one reload
    pub reload_debounce: Duration,

    /// How long the event-loop dispatcher waits between queue polls
    pub poll_interval: Duration,

    /// Capacity of the key-thread to event-loop queue
    pub queue_capacity: usize,

    /// How long shutdown waits for the key thread
    pub join_timeout: Duration,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            bindings: DEFAULT_BINDINGS
                .iter()
                .map(|(id, combo, action)| HotkeyBindingConfig::new(*id, *combo, *action))
                .collect(),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            reload_debounce: Duration::from_millis(300),
            poll_interval: Duration::from_millis(10),
            queue_capacity: 64,
            join_timeout: Duration::from_secs(2),
        }
    }
}

impl HotkeyConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for testing: short delays everywhere
    pub fn test() -> Self {
        Self {
            retry_delay: Duration::from_millis(5),
            reload_debounce: Duration::from_millis(50),
            poll_interval: Duration::from_millis(2),
            join_timeout: Duration::from_secs(1),
            ..Self::default()
        }
    }

    /// Replace the bindings
    pub fn bindings(mut self, bindings: Vec<HotkeyBindingConfig>) -> Self {
        self.bindings = bindings;
        self
    }

    /// Set maximum probe retries
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the probe retry delay
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the reload debounce window
    pub fn reload_debounce(mut self, debounce: Duration) -> Self {
        self.reload_debounce = debounce;
        self
    }

    /// Look up a binding by hotkey id
    pub fn binding(&self, hotkey_id: &str) -> Option<&HotkeyBindingConfig> {
        self.bindings.iter().find(|b| b.hotkey_id == hotkey_id)
    }

    /// Overlay the hotkey keys of a settings source onto `base`.
    ///
    /// Each binding's combo comes from `hotkeys.<hotkey_id>`.
    pub fn from_settings_with(base: HotkeyConfig, source: &dyn SettingsSource) -> Self {
        let mut config = base;
        for binding in &mut config.bindings {
            let key = format!("hotkeys.{}", binding.hotkey_id);
            binding.combo = read(source, &key, binding.combo.clone(), |v| {
                v.as_str().map(str::to_string)
            });
        }

        config.max_retries = read(source, "hotkeys.max_retries", config.max_retries, |v| {
            v.as_u64().and_then(|n| u32::try_from(n).ok())
        });
        config.retry_delay = read(
            source,
            "hotkeys.retry_delay_seconds",
            config.retry_delay,
            |v| v.as_f64().and_then(|s| Duration::try_from_secs_f64(s).ok()),
        );
        config
    }

    /// Read the hotkey keys of a settings source over the defaults
    pub fn from_settings(source: &dyn SettingsSource) -> Self {
        Self::from_settings_with(Self::default(), source)
    }
}

/// Configuration of the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// How long the tray icon shows the error state
    pub error_flash: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            error_flash: Duration::from_secs(3),
        }
    }
}

/// Configuration of the bus, the hotkey bridge and the orchestrator
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoreConfig {
    /// Event bus settings
    pub event_bus: EventBusConfig,
    /// Hotkey bridge settings
    pub hotkeys: HotkeyConfig,
    /// Orchestrator settings
    pub orchestrator: OrchestratorConfig,
}

impl CoreConfig {
    /// Configuration for testing
    pub fn test() -> Self {
        Self {
            event_bus: EventBusConfig::test(),
            hotkeys: HotkeyConfig::test(),
            orchestrator: OrchestratorConfig {
                error_flash: Duration::from_millis(10),
            },
        }
    }

    /// Read every recognised key from a settings source
    pub fn from_settings(source: &dyn SettingsSource) -> Self {
        Self::from_settings_with(Self::default(), source)
    }

    /// Overlay the recognised keys of a settings source onto `base`
    pub fn from_settings_with(base: CoreConfig, source: &dyn SettingsSource) -> Self {
        let defaults = base.event_bus;
        let event_bus = EventBusConfig {
            queue_capacity: read(source, "event_bus.queue_capacity", defaults.queue_capacity, |v| {
                v.as_u64().and_then(|n| usize::try_from(n).ok())
            }),
            history_size: read(source, "event_bus.history_size", defaults.history_size, |v| {
                v.as_u64().and_then(|n| usize::try_from(n).ok())
            }),
            metrics_enabled: read(
                source,
                "event_bus.metrics_enabled",
                defaults.metrics_enabled,
                Value::as_bool,
            ),
            ..defaults
        };

        Self {
            event_bus,
            hotkeys: HotkeyConfig::from_settings_with(base.hotkeys, source),
            orchestrator: base.orchestrator,
        }
    }

    /// Parse a JSON document such as
    /// `{"event_bus": {"queue_capacity": 500}, "hotkeys": {"overlay_toggle": "ctrl+alt+o"}}`.
    ///
    /// The sections are deserialized with serde, so a value of the wrong
    /// type is an error. Top-level dotted keys such as
    /// `"hotkeys.overlay_toggle"` are accepted too and win over the sections.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: ConfigDocument = serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("invalid configuration JSON: {}", e)))?;

        let mut config = Self::default();
        if let Some(section) = document.event_bus {
            section.apply(&mut config.event_bus);
        }
        if let Some(section) = document.hotkeys {
            section.apply(&mut config.hotkeys);
        }

        let dotted: Vec<(String, Value)> = document
            .dotted
            .into_iter()
            .filter(|(key, _)| key.contains('.'))
            .collect();
        let config = if dotted.is_empty() {
            config
        } else {
            Self::from_settings_with(config, &InMemorySettings::new().with_values(dotted))
        };

        config.event_bus.validate()?;
        Ok(config)
    }
}

/// A configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigDocument {
    event_bus: Option<EventBusSection>,
    hotkeys: Option<HotkeysSection>,
    #[serde(flatten)]
    dotted: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct EventBusSection {
    queue_capacity: Option<usize>,
    history_size: Option<usize>,
    metrics_enabled: Option<bool>,
    shutdown_timeout_seconds: Option<f64>,
    emit_and_wait_timeout_seconds: Option<f64>,
}

impl EventBusSection {
    fn apply(self, config: &mut EventBusConfig) {
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(size) = self.history_size {
            config.history_size = size;
        }
        if let Some(enabled) = self.metrics_enabled {
            config.metrics_enabled = enabled;
        }
        if let Some(timeout) = self.shutdown_timeout_seconds.and_then(seconds) {
            config.shutdown_timeout = timeout;
        }
        if let Some(timeout) = self.emit_and_wait_timeout_seconds.and_then(seconds) {
            config.emit_and_wait_timeout = timeout;
        }
    }
}

/// The `hotkeys` section: tuning keys plus one combo per hotkey id
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HotkeysSection {
    max_retries: Option<u32>,
    retry_delay_seconds: Option<f64>,
    reload_debounce_ms: Option<u64>,
    #[serde(flatten)]
    combos: BTreeMap<String, String>,
}

impl HotkeysSection {
    fn apply(self, config: &mut HotkeyConfig) {
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if let Some(delay) = self.retry_delay_seconds.and_then(seconds) {
            config.retry_delay = delay;
        }
        if let Some(debounce) = self.reload_debounce_ms {
            config.reload_debounce = Duration::from_millis(debounce);
        }
        for (hotkey_id, combo) in self.combos {
            match config.bindings.iter_mut().find(|b| b.hotkey_id == hotkey_id) {
                Some(binding) => binding.combo = combo,
                None => warn!(%hotkey_id, "Ignoring combo for unknown hotkey"),
            }
        }
    }
}

fn seconds(value: f64) -> Option<Duration> {
    let duration = Duration::try_from_secs_f64(value).ok();
    if duration.is_none() {
        warn!(value, "Ignoring invalid duration");
    }
    duration
}

fn read<T>(
    source: &dyn SettingsSource,
    key: &str,
    default: T,
    extract: impl Fn(&Value) -> Option<T>,
) -> T {
    match source.get(key) {
        None | Some(Value::Null) => default,
        Some(value) => extract(&value).unwrap_or_else(|| {
            warn!(%key, %value, "Ignoring setting with unexpected type");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.event_bus.queue_capacity, 1000);
        assert_eq!(config.hotkeys.max_retries, 3);
        assert_eq!(config.hotkeys.retry_delay, Duration::from_secs(1));
        assert_eq!(
            config.hotkeys.binding("overlay_toggle").map(|b| b.combo.as_str()),
            Some("ctrl+shift+o")
        );
        assert_eq!(config.orchestrator.error_flash, Duration::from_secs(3));
    }

    #[test]
    fn test_from_settings() {
        let settings = InMemorySettings::new().with_values([
            ("event_bus.queue_capacity", json!(50)),
            ("event_bus.metrics_enabled", json!(false)),
            ("hotkeys.settings_open", json!("ctrl+alt+p")),
            ("hotkeys.retry_delay_seconds", json!(0.25)),
            ("hotkeys.max_retries", json!("lots")),
        ]);

        let config = CoreConfig::from_settings(&settings);
        assert_eq!(config.event_bus.queue_capacity, 50);
        assert!(!config.event_bus.metrics_enabled);
        assert_eq!(config.event_bus.history_size, 100);
        assert_eq!(config.hotkeys.binding("settings_open").unwrap().combo, "ctrl+alt+p");
        assert_eq!(config.hotkeys.retry_delay, Duration::from_millis(250));
        assert_eq!(config.hotkeys.max_retries, 3);
    }

    #[test]
    fn test_from_json_str() {
        let config = CoreConfig::from_json_str(
            r#"{
                "event_bus": {"queue_capacity": 10, "history_size": 0},
                "hotkeys": {"overlay_toggle": "ctrl+alt+o", "max_retries": 1},
                "hotkeys.screenshot_capture": "alt+shift+s"
            }"#,
        )
        .unwrap();

        assert_eq!(config.event_bus.queue_capacity, 10);
        assert_eq!(config.event_bus.history_size, 0);
        assert_eq!(config.hotkeys.max_retries, 1);
        assert_eq!(config.hotkeys.binding("overlay_toggle").unwrap().combo, "ctrl+alt+o");
        assert_eq!(config.hotkeys.binding("screenshot_capture").unwrap().combo, "alt+shift+s");
    }

    #[test]
    fn test_from_json_str_errors() {
        assert!(matches!(CoreConfig::from_json_str("not json"), Err(Error::ConfigError(_))));
        assert!(matches!(CoreConfig::from_json_str("[1, 2]"), Err(Error::ConfigError(_))));
        assert!(matches!(
            CoreConfig::from_json_str(r#"{"event_bus": {"queue_capacity": 0}}"#),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_from_json_str_sections_are_typed() {
        for bad in [
            r#"{"event_bus": {"queue_capacity": "large"}}"#,
            r#"{"event_bus": {"metrics_enabled": 1}}"#,
            r#"{"event_bus": {"queue_size": 10}}"#,
            r#"{"hotkeys": {"max_retries": -1}}"#,
            r#"{"hotkeys": {"overlay_toggle": 42}}"#,
        ] {
            assert!(
                matches!(CoreConfig::from_json_str(bad), Err(Error::ConfigError(_))),
                "{} should be rejected",
                bad
            );
        }

        let config = CoreConfig::from_json_str(
            r#"{
                "event_bus": {"shutdown_timeout_seconds": 0.5, "metrics_enabled": false},
                "hotkeys": {"retry_delay_seconds": 0.1, "reload_debounce_ms": 20, "unknown_id": "ctrl+k"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.event_bus.shutdown_timeout, Duration::from_millis(500));
        assert!(!config.event_bus.metrics_enabled);
        assert_eq!(config.hotkeys.retry_delay, Duration::from_millis(100));
        assert_eq!(config.hotkeys.reload_debounce, Duration::from_millis(20));
        assert_eq!(config.hotkeys.bindings.len(), 3);
    }
}
