//! Builder pattern for constructing EventBus instances.

use crate::bus::config::EventBusConfig;
use crate::dispatcher::Dispatcher;
use crate::registry::{DashMapRegistry, EventRegistry};
use crate::{EventBus, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Builder for creating EventBus instances
#[derive(Debug, Default)]
pub struct EventBusBuilder {
    config: EventBusConfig,
    registry: Option<Arc<dyn EventRegistry>>,
}

impl EventBusBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom configuration
    pub fn config(mut self, config: EventBusConfig) -> Self {
        self.config = config;
        self
    }

    /// Configure the event bus
    pub fn configure<F>(mut self, f: F) -> Self
    where
        F: FnOnce(EventBusConfig) -> EventBusConfig,
    {
        self.config = f(self.config);
        self
    }

    /// Use a custom registry implementation
    pub fn registry(mut self, registry: Arc<dyn EventRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build with the testing configuration
    pub fn test(self) -> Self {
        self.config(EventBusConfig::test())
    }

    /// Build the EventBus
    pub fn build(self) -> Result<EventBus> {
        self.config.validate()?;

        let registry = self.registry.unwrap_or_else(|| {
            debug!("Creating default DashMapRegistry");
            Arc::new(DashMapRegistry::with_capacity(32))
        });

        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            self.config.queue_capacity,
            self.config.history_size,
            self.config.metrics_enabled,
        ));

        info!(
            queue_capacity = self.config.queue_capacity,
            history_size = self.config.history_size,
            metrics_enabled = self.config.metrics_enabled,
            "EventBus built"
        );

        Ok(EventBus::from_parts(self.config, dispatcher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_builder_default() {
        let bus = EventBusBuilder::new().build().unwrap();
        assert!(!bus.is_shutting_down());
        assert_eq!(bus.config().queue_capacity, 1000);
    }

    #[test]
    fn test_builder_configurations() {
        let bus = EventBusBuilder::new()
            .configure(|c| c.queue_capacity(3).metrics_enabled(false))
            .build()
            .unwrap();
        assert_eq!(bus.config().queue_capacity, 3);
        assert!(!bus.config().metrics_enabled);

        let bus = EventBusBuilder::new().test().build().unwrap();
        assert_eq!(bus.config(), &EventBusConfig::test());
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = EventBusBuilder::new()
            .configure(|c| c.queue_capacity(0))
            .build();
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }
}
