//! Bus counters and the snapshot exposed to diagnostics.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one bus.
///
/// When metrics are disabled every `record_*` call is a no-op.
#[derive(Debug)]
pub struct BusMetrics {
    enabled: bool,
    events_emitted: AtomicU64,
    events_processed: AtomicU64,
    handlers_called: AtomicU64,
    handler_errors: AtomicU64,
    drop_overflow: AtomicU64,
    drop_shutdown: AtomicU64,
}

impl BusMetrics {
    /// Create zeroed counters
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            events_emitted: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            handlers_called: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            drop_overflow: AtomicU64::new(0),
            drop_shutdown: AtomicU64::new(0),
        }
    }

    fn bump(&self, counter: &AtomicU64, by: u64) {
        if self.enabled && by > 0 {
            counter.fetch_add(by, Ordering::Relaxed);
        }
    }

    /// An event was accepted by `emit`
    pub fn record_emitted(&self) {
        self.bump(&self.events_emitted, 1);
    }

    /// An event finished its dispatch pass
    pub fn record_processed(&self) {
        self.bump(&self.events_processed, 1);
    }

    /// A handler was invoked
    pub fn record_handler_called(&self) {
        self.bump(&self.handlers_called, 1);
    }

    /// A handler returned an error or panicked
    pub fn record_handler_error(&self) {
        self.bump(&self.handler_errors, 1);
    }

    /// The queue dropped its oldest event to make room
    pub fn record_overflow_drop(&self) {
        self.bump(&self.drop_overflow, 1);
    }

    /// Events still queued when shutdown gave up
    pub fn record_shutdown_drops(&self, count: u64) {
        self.bump(&self.drop_shutdown, count);
    }

    /// Whether counters are being collected
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Read the counters
    pub fn counters(&self) -> Counters {
        Counters {
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            handlers_called: self.handlers_called.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            drop_overflow: self.drop_overflow.load(Ordering::Relaxed),
            drop_shutdown: self.drop_shutdown.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Events accepted by `emit`
    pub events_emitted: u64,
    /// Events that completed a dispatch pass
    pub events_processed: u64,
    /// Handler invocations
    pub handlers_called: u64,
    /// Handler failures, panics included
    pub handler_errors: u64,
    /// Events evicted by a full queue
    #[serde(rename = "drop.overflow")]
    pub drop_overflow: u64,
    /// Events discarded at shutdown
    #[serde(rename = "drop.shutdown")]
    pub drop_shutdown: u64,
}

impl Counters {
    /// Look a counter up by its dotted name, e.g. `drop.overflow`
    pub fn get(&self, name: &str) -> Option<u64> {
        match name {
            "events_emitted" => Some(self.events_emitted),
            "events_processed" => Some(self.events_processed),
            "handlers_called" => Some(self.handlers_called),
            "handler_errors" => Some(self.handler_errors),
            "drop.overflow" => Some(self.drop_overflow),
            "drop.shutdown" => Some(self.drop_shutdown),
            _ => None,
        }
    }
}

/// Counters plus queue and subscription gauges
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Cumulative counters
    #[serde(flatten)]
    pub counters: Counters,
    /// Events waiting to be dispatched
    pub queue_depth: usize,
    /// Live subscriptions per event type
    pub subscription_count: BTreeMap<String, usize>,
    /// Event types with at least one subscription
    pub event_types: usize,
    /// Live subscriptions overall
    pub total_subscriptions: usize,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventBus Stats: {} subscriptions, {} event types, {} events processed, {} queued, {} dropped",
            self.total_subscriptions,
            self.event_types,
            self.counters.events_processed,
            self.queue_depth,
            self.counters.drop_overflow + self.counters.drop_shutdown
        )
    }
}
