//! Event dispatcher for routing events to handlers.
//!
//! The dispatcher owns the bounded queue of pending events and runs dispatch
//! passes over it. A pass pops the oldest event, snapshots that type's
//! subscriptions and invokes them one after another in priority order, then
//! yields to the scheduler and continues until the queue is empty. Only one
//! pass runs at a time; events enqueued while a pass runs (including those
//! emitted by handlers) are consumed by that same pass.

use crate::bus::{BusMetrics, EventHistory};
use crate::error::ErrorContext;
use crate::event::names;
use crate::event::payloads::ErrorOccurred;
use crate::registry::{EventRegistry, SubscriptionEntry};
use crate::subscription::SubscriptionId;
use crate::EventEnvelope;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

pub mod queue;

pub use queue::EventQueue;

/// Source tag of events synthesized by the bus itself
pub const BUS_SOURCE: &str = "EventBus";

/// What happened to a submitted event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Appended to the queue
    Queued,
    /// Appended after evicting the oldest queued event
    QueuedWithEviction,
    /// Dropped because shutdown was requested
    DroppedShutdown,
}

/// Queue plus dispatch-pass machinery of one bus.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<dyn EventRegistry>,
    queue: EventQueue,
    history: EventHistory,
    metrics: BusMetrics,

    /// Cleared once shutdown is requested; emissions are dropped afterwards
    accepting: AtomicBool,

    /// Set when the shutdown grace window expires; passes stop at once
    halted: AtomicBool,

    /// Set while a dispatch pass runs
    dispatching: AtomicBool,
}

impl Dispatcher {
    /// Create a dispatcher over a registry
    pub fn new(
        registry: Arc<dyn EventRegistry>,
        queue_capacity: usize,
        history_size: usize,
        metrics_enabled: bool,
    ) -> Self {
        Self {
            registry,
            queue: EventQueue::new(queue_capacity),
            history: EventHistory::new(history_size),
            metrics: BusMetrics::new(metrics_enabled),
            accepting: AtomicBool::new(true),
            halted: AtomicBool::new(false),
            dispatching: AtomicBool::new(false),
        }
    }

    /// Subscription registry
    pub fn registry(&self) -> &Arc<dyn EventRegistry> {
        &self.registry
    }

    /// Counters
    pub fn metrics(&self) -> &BusMetrics {
        &self.metrics
    }

    /// Recently processed events
    pub fn history(&self) -> &EventHistory {
        &self.history
    }

    /// Events waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Whether emissions are still accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Whether a pass is running
    pub fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::Acquire)
    }

    /// No pass is running and nothing is left to dispatch
    pub fn is_idle(&self) -> bool {
        !self.is_dispatching() && (self.halted.load(Ordering::Acquire) || self.queue.is_empty())
    }

    /// Enqueue an event and make sure a pass will pick it up
    pub fn submit(self: &Arc<Self>, envelope: EventEnvelope) -> Submission {
        let submission = self.enqueue(envelope);
        if submission != Submission::DroppedShutdown {
            self.schedule();
        }
        submission
    }

    /// Enqueue without scheduling; the caller guarantees a pass will follow
    fn enqueue(&self, envelope: EventEnvelope) -> Submission {
        if !self.is_accepting() {
            trace!(event_type = %envelope.event_type(), "Bus shutting down, dropping event");
            self.metrics.record_shutdown_drops(1);
            return Submission::DroppedShutdown;
        }

        self.metrics.record_emitted();
        match self.queue.push(envelope) {
            None => Submission::Queued,
            Some(evicted) => {
                self.metrics.record_overflow_drop();
                warn!(
                    dropped_event_type = %evicted.event_type(),
                    dropped_event_id = %evicted.event_id(),
                    capacity = self.queue.capacity(),
                    "Event queue full, dropping oldest event"
                );
                Submission::QueuedWithEviction
            }
        }
    }

    fn try_begin_pass(&self) -> bool {
        self.dispatching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Spawn a dispatch pass on the current runtime unless one is running.
    ///
    /// Outside a runtime the event stays queued until the next pass.
    pub fn schedule(self: &Arc<Self>) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                if self.try_begin_pass() {
                    let dispatcher = Arc::clone(self);
                    runtime.spawn(async move { dispatcher.drain().await });
                }
            }
            Err(_) => trace!("No runtime available, event stays queued"),
        }
    }

    /// Run a dispatch pass inline; returns at once if one is already running
    pub async fn run_pass(self: &Arc<Self>) {
        if self.try_begin_pass() {
            self.drain().await;
        }
    }

    /// Body of a pass. The caller must hold the dispatching flag.
    async fn drain(self: &Arc<Self>) {
        loop {
            while !self.halted.load(Ordering::Acquire) {
                let Some(event) = self.queue.pop() else {
                    break;
                };
                self.process(event).await;
                tokio::task::yield_now().await;
            }

            self.dispatching.store(false, Ordering::Release);

            // An emitter may have enqueued after our last pop but before the
            // flag cleared; it saw the flag set and did not schedule.
            if self.halted.load(Ordering::Acquire)
                || self.queue.is_empty()
                || !self.try_begin_pass()
            {
                break;
            }
        }
    }

    async fn process(&self, event: EventEnvelope) {
        let start = Instant::now();
        trace!(
            event_id = %event.event_id(),
            event_type = %event.event_type(),
            "Processing event from queue"
        );

        self.dispatch_event(&event, false).await;
        self.finish(event);

        trace!(dispatch_time_us = start.elapsed().as_micros() as u64, "Event dispatched");
    }

    /// Book-keeping after an event's handler list ran
    pub fn finish(&self, event: EventEnvelope) {
        self.metrics.record_processed();
        self.history.push(event);
    }

    /// Run one event's handler list in priority order.
    ///
    /// Returns the values of the handlers that succeeded when `collect` is set.
    pub async fn dispatch_event(&self, event: &EventEnvelope, collect: bool) -> Vec<Value> {
        let subscriptions = self.registry.get_subscriptions(event.event_type());
        if subscriptions.is_empty() {
            trace!(event_type = %event.event_type(), "No subscriptions for event type");
            return Vec::new();
        }

        let mut results = Vec::new();
        let mut dead: Vec<SubscriptionId> = Vec::new();

        for entry in subscriptions {
            let Some(handler) = entry.handler.upgrade() else {
                dead.push(entry.id);
                continue;
            };

            // A once-only subscription is claimed by removing it, so two
            // concurrent dispatches cannot both run it. Anything else removed
            // after the snapshot was taken is skipped.
            let claimed = if entry.once {
                self.registry.unregister(entry.id)
            } else {
                self.registry.contains(entry.id)
            };
            if !claimed {
                continue;
            }

            trace!(subscription_id = %entry.id, handler = handler.name(), "Executing handler");

            match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
                Ok(Ok(value)) => {
                    self.metrics.record_handler_called();
                    if collect {
                        results.push(value);
                    }
                }
                Ok(Err(e)) => {
                    self.report_handler_failure(event, &entry, handler.name(), &e.to_string(), format!("{:?}", e));
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    self.report_handler_failure(
                        event,
                        &entry,
                        handler.name(),
                        &format!("handler panicked: {}", message),
                        format!("panic: {}", message),
                    );
                }
            }
        }

        for id in dead {
            if self.registry.unregister(id) {
                debug!(subscription_id = %id, "Removed dead weak subscription");
            }
        }

        results
    }

    /// The single place that turns a handler failure into `error.occurred`.
    ///
    /// Failures while dispatching `error.occurred` itself are only logged so
    /// a failing error handler cannot feed an endless loop.
    fn report_handler_failure(
        &self,
        event: &EventEnvelope,
        entry: &SubscriptionEntry,
        handler_name: &str,
        error: &str,
        trace: String,
    ) {
        self.metrics.record_handler_error();

        let mut ctx = ErrorContext::new()
            .with_event_id(event.event_id())
            .with_event_type(event.event_type())
            .with_subscription(entry.id);
        ctx = match &entry.name {
            Some(name) => ctx.with_handler(name.clone()),
            None => ctx.with_handler(handler_name),
        };

        error!(
            subscription_id = %entry.id,
            event_type = %event.event_type(),
            error,
            "Handler execution failed: {}",
            ctx
        );

        if event.is(names::ERROR_OCCURRED) {
            warn!(
                subscription_id = %entry.id,
                "Failure inside an error.occurred handler is not re-reported"
            );
            return;
        }

        let payload = ErrorOccurred {
            error: error.to_string(),
            source: BUS_SOURCE.to_string(),
            original_event: Some(event.event_type().to_string()),
            message: Some(format!("handler {} failed", ctx.handler_description())),
            handler: Some(ctx.handler_description()),
            trace: Some(trace),
            timestamp: ctx.timestamp,
        };

        match event.chain(names::ERROR_OCCURRED, &payload, BUS_SOURCE) {
            // Either a pass is running and will drain this, or the
            // emit_and_wait caller schedules one when it returns.
            Ok(envelope) => {
                self.enqueue(envelope);
            }
            Err(e) => error!(error = %e, "Could not build error.occurred payload"),
        }
    }

    /// Stop accepting emissions. Returns `false` if already stopped.
    pub fn stop_accepting(&self) -> bool {
        self.accepting.swap(false, Ordering::AcqRel)
    }

    /// Stop dispatching and discard the queue; returns the discarded count
    pub fn halt(&self) -> usize {
        self.halted.store(true, Ordering::Release);
        let dropped = self.queue.clear();
        self.metrics.record_shutdown_drops(dropped as u64);
        dropped
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DashMapRegistry;
    use crate::subscription::{HandlerRef, SyncFunctionHandler};
    use serde_json::json;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn dispatcher(capacity: usize) -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(Arc::new(DashMapRegistry::new()), capacity, 10, true))
    }

    fn recorder(
        dispatcher: &Dispatcher,
        event_type: &str,
        priority: i32,
        label: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
    ) {
        let log = log.clone();
        let handler = SyncFunctionHandler::new(move |e: &EventEnvelope| {
            log.lock().unwrap().push(format!("{}:{}", label, e.payload()));
        });
        dispatcher.registry().register(
            SubscriptionEntry::new(Uuid::new_v4(), event_type, HandlerRef::Strong(Arc::new(handler)))
                .with_priority(priority),
        );
    }

    #[tokio::test]
    async fn test_pass_drains_in_order() {
        let dispatcher = dispatcher(100);
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&dispatcher, "x.evt", 0, "h", &log);

        for i in 1..=3 {
            dispatcher.enqueue(EventEnvelope::new("x.evt", json!(i)));
        }
        dispatcher.run_pass().await;

        assert_eq!(*log.lock().unwrap(), vec!["h:1", "h:2", "h:3"]);
        assert!(dispatcher.is_idle());
        assert_eq!(dispatcher.metrics().counters().events_processed, 3);
        assert_eq!(dispatcher.history().len(), 3);
    }

    #[tokio::test]
    async fn test_collects_handler_results() {
        let dispatcher = dispatcher(10);
        let handler = SyncFunctionHandler::new(|e: &EventEnvelope| e.payload().clone());
        dispatcher.registry().register(SubscriptionEntry::new(
            Uuid::new_v4(),
            "x.evt",
            HandlerRef::Strong(Arc::new(handler)),
        ));

        let results = dispatcher
            .dispatch_event(&EventEnvelope::new("x.evt", json!("pong")), true)
            .await;
        assert_eq!(results, vec![json!("pong")]);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let dispatcher = dispatcher(10);
        let log = Arc::new(Mutex::new(Vec::new()));
        let panicking = SyncFunctionHandler::new(|_: &EventEnvelope| -> () { panic!("kaboom") });
        dispatcher.registry().register(
            SubscriptionEntry::new(Uuid::new_v4(), "x.evt", HandlerRef::Strong(Arc::new(panicking)))
                .with_priority(10),
        );
        recorder(&dispatcher, "x.evt", 0, "ok", &log);
        recorder(&dispatcher, names::ERROR_OCCURRED, 0, "err", &log);

        dispatcher.enqueue(EventEnvelope::new("x.evt", json!(1)));
        dispatcher.run_pass().await;

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], "ok:1");
        assert!(log[1].starts_with("err:"));
        assert!(log[1].contains("kaboom"));
        assert_eq!(dispatcher.metrics().counters().handler_errors, 1);
    }

    #[tokio::test]
    async fn test_halt_discards_queue() {
        let dispatcher = dispatcher(10);
        dispatcher.enqueue(EventEnvelope::new("x.evt", json!(1)));
        dispatcher.enqueue(EventEnvelope::new("x.evt", json!(2)));

        assert!(dispatcher.stop_accepting());
        assert!(!dispatcher.stop_accepting());
        assert_eq!(
            dispatcher.submit(EventEnvelope::new("x.evt", json!(3))),
            Submission::DroppedShutdown
        );
        assert_eq!(dispatcher.halt(), 2);
        assert!(dispatcher.is_idle());
        assert_eq!(dispatcher.metrics().counters().drop_shutdown, 3);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(boxed.as_ref()), "static str");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
    }
}
