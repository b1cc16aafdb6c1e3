//! Settings feed consumed by the core.
//!
//! The core only reads settings. Writes go through the collaborator's own
//! API and come back as `settings.updated` events; a bulk save marks each
//! update with `full_save` and closes with a single `settings.saved`.

use crate::event::payloads::{SettingsSaved, SettingsUpdated};
use crate::{EventBus, Result};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::debug;

/// Read access to application settings.
pub trait SettingsSource: Send + Sync + Debug {
    /// Look up a dotted key such as `hotkeys.overlay_toggle`
    fn get(&self, key: &str) -> Option<Value>;

    /// Look up a key, falling back to `default`
    fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }
}

/// Settings held in memory that echo writes onto the bus.
#[derive(Debug, Default)]
pub struct InMemorySettings {
    values: DashMap<String, Value>,
    bus: Option<EventBus>,
}

impl InMemorySettings {
    /// Empty settings not connected to a bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty settings whose writes are echoed on `bus`
    pub fn with_bus(bus: EventBus) -> Self {
        Self {
            values: DashMap::new(),
            bus: Some(bus),
        }
    }

    /// Seed values without emitting anything
    pub fn with_values<K, I>(self, values: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        for (key, value) in values {
            self.values.insert(key.into(), value);
        }
        self
    }

    /// Store a value without emitting anything
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Write one key and emit `settings.updated`
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        self.values.insert(key.clone(), value.clone());
        debug!(%key, "Setting updated");

        if let Some(bus) = &self.bus {
            bus.publish(&SettingsUpdated {
                key,
                value,
                timestamp: Utc::now(),
                full_save: Some(false),
            })?;
        }
        Ok(())
    }

    /// Write many keys as one save.
    ///
    /// Each key is echoed with `full_save = true`, followed by one
    /// `settings.saved` naming all keys.
    pub fn save_all<K, I>(&self, values: I) -> Result<()>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut keys = Vec::new();
        for (key, value) in values {
            let key = key.into();
            self.values.insert(key.clone(), value.clone());
            if let Some(bus) = &self.bus {
                bus.publish(&SettingsUpdated {
                    key: key.clone(),
                    value,
                    timestamp: Utc::now(),
                    full_save: Some(true),
                })?;
            }
            keys.push(key);
        }

        debug!(count = keys.len(), "Settings saved");
        if let Some(bus) = &self.bus {
            bus.publish(&SettingsSaved {
                keys,
                timestamp: Utc::now(),
            })?;
        }
        Ok(())
    }

    /// Copy of every stored value, ordered by key
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl SettingsSource for InMemorySettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|value| value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::names;
    use crate::SubscribeOptions;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_get_with_default() {
        let settings = InMemorySettings::new().with_values([("ui.theme", json!("dark"))]);
        assert_eq!(settings.get("ui.theme"), Some(json!("dark")));
        assert_eq!(settings.get_or("ui.scale", json!(1.0)), json!(1.0));
    }

    #[tokio::test]
    async fn test_writes_are_echoed() {
        let bus = EventBus::builder().test().build().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _updated = bus
            .subscribe_event(
                move |update: SettingsUpdated| {
                    let sink = sink.clone();
                    async move {
                        let bulk = update.is_bulk();
                        sink.lock().unwrap().push((update.key, bulk));
                    }
                },
                SubscribeOptions::new(),
            )
            .unwrap();
        let saved = Arc::new(Mutex::new(0));
        let counter = saved.clone();
        let _saved = bus
            .subscribe_fn(
                names::SETTINGS_SAVED,
                move |_: &crate::EventEnvelope| *counter.lock().unwrap() += 1,
                SubscribeOptions::new(),
            )
            .unwrap();

        let settings = InMemorySettings::with_bus(bus.clone());
        settings.set("ui.theme", json!("light")).unwrap();
        settings
            .save_all([("hotkeys.overlay_toggle", json!("ctrl+alt+o")), ("ui.scale", json!(2))])
            .unwrap();
        bus.flush().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("ui.theme".to_string(), false),
                ("hotkeys.overlay_toggle".to_string(), true),
                ("ui.scale".to_string(), true),
            ]
        );
        assert_eq!(*saved.lock().unwrap(), 1);
        assert_eq!(settings.snapshot().len(), 3);
    }
}
