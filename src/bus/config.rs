//! Configuration for the event bus.

use crate::{Error, Result};
use std::time::Duration;

/// Configuration for the event bus
#[derive(Debug, Clone, PartialEq)]
pub struct EventBusConfig {
    /// Maximum number of queued events before the oldest is dropped
    pub queue_capacity: usize,

    /// Number of dispatched events kept for diagnostics (0 disables)
    pub history_size: usize,

    /// Collect counters
    pub metrics_enabled: bool,

    /// Grace window for draining the queue on shutdown
    pub shutdown_timeout: Duration,

    /// Default timeout of `emit_and_wait`
    pub emit_and_wait_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            history_size: 100,
            metrics_enabled: true,
            shutdown_timeout: Duration::from_secs(5),
            emit_and_wait_timeout: Duration::from_secs(30),
        }
    }
}

impl EventBusConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the history ring size
    pub fn history_size(mut self, size: usize) -> Self {
        self.history_size = size;
        self
    }

    /// Enable or disable counters
    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Set shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the default `emit_and_wait` timeout
    pub fn emit_and_wait_timeout(mut self, timeout: Duration) -> Self {
        self.emit_and_wait_timeout = timeout;
        self
    }

    /// Check the configuration before a bus is built from it
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::ConfigError(
                "event_bus.queue_capacity must be at least 1".into(),
            ));
        }
        if self.emit_and_wait_timeout.is_zero() {
            return Err(Error::ConfigError(
                "emit_and_wait timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Preset configurations for common use cases
impl EventBusConfig {
    /// Configuration for testing
    pub fn test() -> Self {
        Self::default()
            .queue_capacity(100)
            .history_size(20)
            .shutdown_timeout(Duration::from_secs(1))
            .emit_and_wait_timeout(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EventBusConfig::default();
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.history_size, 100);
        assert!(config.metrics_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = EventBusConfig::new().queue_capacity(0);
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }
}
