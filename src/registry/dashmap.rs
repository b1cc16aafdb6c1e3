//! DashMap-based implementation of EventRegistry for concurrent access.

use super::{EventRegistry, SubscriptionEntry};
use crate::subscription::SubscriptionId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// A thread-safe event registry implementation using DashMap.
///
/// Suited to many readers (dispatch snapshots) and fewer writers
/// (subscribe/unsubscribe). Inserting into a type's list happens under that
/// entry's shard lock, so concurrent subscribes to one type are serialized.
#[derive(Debug, Clone)]
pub struct DashMapRegistry {
    /// Map from event type to its priority-sorted subscriptions
    subscriptions: Arc<DashMap<String, Vec<SubscriptionEntry>>>,

    /// Map from subscription ID to event type for faster lookups
    subscription_to_type: Arc<DashMap<SubscriptionId, String>>,

    /// Insertion counter used to break priority ties
    sequence: Arc<AtomicU64>,
}

impl DashMapRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a registry with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscriptions: Arc::new(DashMap::with_capacity(capacity)),
            subscription_to_type: Arc::new(DashMap::with_capacity(capacity * 10)), // Assume ~10 subs per type
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Default for DashMapRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistry for DashMapRegistry {
    fn register(&self, mut subscription: SubscriptionEntry) {
        subscription.seq = self.sequence.fetch_add(1, Ordering::Relaxed);

        trace!(
            subscription_id = %subscription.id,
            event_type = %subscription.event_type,
            priority = subscription.priority,
            "Registering subscription"
        );

        self.subscription_to_type
            .insert(subscription.id, subscription.event_type.clone());

        let id = subscription.id;
        let mut subs = self
            .subscriptions
            .entry(subscription.event_type.clone())
            .or_default();
        subs.push(subscription);
        subs.sort_by_key(SubscriptionEntry::sort_key);
        drop(subs);

        debug!(subscription_id = %id, "Subscription registered successfully");
    }

    fn unregister(&self, subscription_id: SubscriptionId) -> bool {
        let Some((_, event_type)) = self.subscription_to_type.remove(&subscription_id) else {
            return false;
        };

        let mut removed = false;
        self.subscriptions.remove_if_mut(&event_type, |_, subs| {
            let before = subs.len();
            subs.retain(|s| s.id != subscription_id);
            removed = subs.len() != before;
            subs.is_empty()
        });

        debug!(subscription_id = %subscription_id, %event_type, "Subscription unregistered");
        removed
    }

    fn contains(&self, subscription_id: SubscriptionId) -> bool {
        self.subscription_to_type.contains_key(&subscription_id)
    }

    fn get_subscriptions(&self, event_type: &str) -> Vec<SubscriptionEntry> {
        self.subscriptions
            .get(event_type)
            .map(|subs| subs.clone())
            .unwrap_or_default()
    }

    fn reap_dead(&self) -> usize {
        let dead: Vec<SubscriptionId> = self
            .subscriptions
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|s| !s.handler.is_alive())
                    .map(|s| s.id)
                    .collect::<Vec<_>>()
            })
            .collect();

        let reaped = dead.into_iter().filter(|id| self.unregister(*id)).count();
        if reaped > 0 {
            debug!(reaped, "Reaped dead weak subscriptions");
        }
        reaped
    }

    fn total_subscriptions(&self) -> usize {
        self.subscription_to_type.len()
    }

    fn subscription_count(&self, event_type: &str) -> usize {
        self.subscriptions
            .get(event_type)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    fn event_types(&self) -> Vec<String> {
        self.subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn clear(&self) {
        self.subscriptions.clear();
        self.subscription_to_type.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::{EventHandler, HandlerRef, SyncFunctionHandler};
    use crate::EventEnvelope;
    use uuid::Uuid;

    fn noop() -> HandlerRef {
        HandlerRef::Strong(Arc::new(SyncFunctionHandler::new(|_: &EventEnvelope| ())))
    }

    fn entry(event_type: &str, priority: i32) -> SubscriptionEntry {
        SubscriptionEntry::new(Uuid::new_v4(), event_type, noop()).with_priority(priority)
    }

    #[test]
    fn test_register_and_get() {
        let registry = DashMapRegistry::new();
        let subscription = entry("x.evt", 0);
        let sub_id = subscription.id;

        registry.register(subscription);

        let subs = registry.get_subscriptions("x.evt");
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].id, sub_id);
        assert!(registry.contains(sub_id));
    }

    #[test]
    fn test_priority_order_with_fifo_ties() {
        let registry = DashMapRegistry::new();
        let a = entry("x.evt", 10);
        let b = entry("x.evt", 10);
        let c = entry("x.evt", 5);
        let d = entry("x.evt", 20);
        let expected = vec![d.id, a.id, b.id, c.id];

        registry.register(a);
        registry.register(b);
        registry.register(c);
        registry.register(d);

        let order: Vec<_> = registry
            .get_subscriptions("x.evt")
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = DashMapRegistry::new();
        let subscription = entry("x.evt", 0);
        let sub_id = subscription.id;

        registry.register(subscription);
        assert_eq!(registry.total_subscriptions(), 1);

        assert!(registry.unregister(sub_id));
        assert!(!registry.unregister(sub_id));
        assert_eq!(registry.total_subscriptions(), 0);
        assert!(registry.get_subscriptions("x.evt").is_empty());
        assert!(registry.event_types().is_empty());
    }

    #[test]
    fn test_multiple_subscriptions() {
        let registry = DashMapRegistry::new();

        for i in 0..3 {
            registry.register(entry("x.evt", i));
        }
        registry.register(entry("y.evt", 0));

        assert_eq!(registry.subscription_count("x.evt"), 3);
        assert_eq!(registry.subscription_count("y.evt"), 1);
        assert_eq!(registry.total_subscriptions(), 4);
        assert_eq!(registry.event_types().len(), 2);
    }

    #[test]
    fn test_reap_dead() {
        let registry = DashMapRegistry::new();
        let owner: Arc<dyn EventHandler> =
            Arc::new(SyncFunctionHandler::new(|_: &EventEnvelope| ()));

        registry.register(entry("x.evt", 0));
        registry.register(SubscriptionEntry::new(
            Uuid::new_v4(),
            "x.evt",
            HandlerRef::Weak(Arc::downgrade(&owner)),
        ));

        assert_eq!(registry.reap_dead(), 0);
        drop(owner);
        assert_eq!(registry.reap_dead(), 1);
        assert_eq!(registry.subscription_count("x.evt"), 1);
    }
}
