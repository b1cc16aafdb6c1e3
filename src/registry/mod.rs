//! Event registry for mapping event types to subscribers.
//!
//! The registry is responsible for maintaining the mapping between
//! event types and their subscribers in a thread-safe manner. Each type's
//! list is kept sorted by descending priority, ties in insertion order.

use crate::subscription::{HandlerRef, SubscriptionId};
use std::fmt::Debug;

mod dashmap;
pub use self::dashmap::DashMapRegistry;

/// A subscription entry in the registry
#[derive(Debug, Clone)]
pub struct SubscriptionEntry {
    /// Unique ID for this subscription
    pub id: SubscriptionId,

    /// Event type this subscription matches
    pub event_type: String,

    /// Optional name for debugging
    pub name: Option<String>,

    /// Higher runs earlier
    pub priority: i32,

    /// Remove after the first invocation
    pub once: bool,

    /// Insertion sequence, assigned by the registry
    pub seq: u64,

    /// Reference to the handler
    pub handler: HandlerRef,
}

impl SubscriptionEntry {
    /// Create a new subscription entry
    pub fn new(id: SubscriptionId, event_type: impl Into<String>, handler: HandlerRef) -> Self {
        Self {
            id,
            event_type: event_type.into(),
            name: None,
            priority: 0,
            once: false,
            seq: 0,
            handler,
        }
    }

    /// Set the name
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the once-only flag
    pub fn with_once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }

    pub(crate) fn sort_key(&self) -> (std::cmp::Reverse<i32>, u64) {
        (std::cmp::Reverse(self.priority), self.seq)
    }
}

/// Trait for event registries that map event types to subscribers.
///
/// Implementations must be thread-safe as they will be accessed
/// concurrently from multiple tasks.
pub trait EventRegistry: Send + Sync + Debug {
    /// Register a subscription; the registry assigns its insertion sequence
    fn register(&self, subscription: SubscriptionEntry);

    /// Unregister a subscription, `false` if it was not registered
    fn unregister(&self, subscription_id: SubscriptionId) -> bool;

    /// Whether a subscription is currently registered
    fn contains(&self, subscription_id: SubscriptionId) -> bool;

    /// Snapshot of the subscriptions for one event type, in dispatch order
    fn get_subscriptions(&self, event_type: &str) -> Vec<SubscriptionEntry>;

    /// Remove every subscription whose weak handler is dead; returns the count
    fn reap_dead(&self) -> usize;

    /// Get total number of subscriptions across all event types
    fn total_subscriptions(&self) -> usize;

    /// Get number of subscriptions for a specific event type
    fn subscription_count(&self, event_type: &str) -> usize;

    /// Get all event types with at least one subscription
    fn event_types(&self) -> Vec<String>;

    /// Clear all subscriptions
    fn clear(&self);
}
