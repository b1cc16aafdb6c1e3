//! Ring of recently dispatched events, kept for diagnostics.

use crate::dispatcher::queue::lock_unpoisoned;
use crate::EventEnvelope;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Bounded ring of the last dispatched events
#[derive(Debug)]
pub struct EventHistory {
    capacity: usize,
    ring: Mutex<VecDeque<EventEnvelope>>,
}

impl EventHistory {
    /// A capacity of zero disables the history
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ring: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Record a dispatched event, evicting the oldest when full
    pub fn push(&self, event: EventEnvelope) {
        if self.capacity == 0 {
            return;
        }
        let mut ring = lock_unpoisoned(&self.ring);
        if ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(event);
    }

    /// The most recent `limit` events, oldest first
    pub fn recent(&self, limit: usize) -> Vec<EventEnvelope> {
        let ring = lock_unpoisoned(&self.ring);
        let skip = ring.len().saturating_sub(limit);
        ring.iter().skip(skip).cloned().collect()
    }

    /// Number of events held
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.ring).len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every recorded event
    pub fn clear(&self) {
        lock_unpoisoned(&self.ring).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ring_keeps_latest() {
        let history = EventHistory::new(2);
        for i in 0..5 {
            history.push(EventEnvelope::new("x.evt", json!(i)));
        }

        let recent: Vec<_> = history.recent(10).iter().map(|e| e.payload().clone()).collect();
        assert_eq!(recent, vec![json!(3), json!(4)]);
        assert_eq!(history.recent(1)[0].payload(), &json!(4));
    }

    #[test]
    fn test_zero_capacity_disables() {
        let history = EventHistory::new(0);
        history.push(EventEnvelope::new("x.evt", json!(1)));
        assert!(history.is_empty());
    }
}
