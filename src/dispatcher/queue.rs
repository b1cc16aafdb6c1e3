//! Bounded FIFO of pending events.

use crate::EventEnvelope;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the guard if a panicking holder poisoned it
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A bounded queue that drops its oldest entry when full.
///
/// Emitters are never blocked; freshness wins over completeness.
#[derive(Debug)]
pub struct EventQueue {
    capacity: usize,
    items: Mutex<VecDeque<EventEnvelope>>,
}

impl EventQueue {
    /// Create a queue holding at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Append an event, returning the evicted oldest event on overflow
    pub fn push(&self, event: EventEnvelope) -> Option<EventEnvelope> {
        let mut items = lock_unpoisoned(&self.items);
        let evicted = if items.len() >= self.capacity {
            items.pop_front()
        } else {
            None
        };
        items.push_back(event);
        evicted
    }

    /// Take the oldest event
    pub fn pop(&self) -> Option<EventEnvelope> {
        lock_unpoisoned(&self.items).pop_front()
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.items).len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        lock_unpoisoned(&self.items).is_empty()
    }

    /// Maximum number of queued events
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard everything, returning how many events were dropped
    pub fn clear(&self) -> usize {
        let mut items = lock_unpoisoned(&self.items);
        let dropped = items.len();
        items.clear();
        dropped
    }
}
