//! The main EventBus implementation.
//!
//! The EventBus is the primary interface for publishing and subscribing to events.
//! It coordinates between the registry, which holds the priority-sorted
//! subscriptions, and the dispatcher, which owns the bounded queue and runs
//! dispatch passes on the Tokio runtime.

use crate::dispatcher::Dispatcher;
use crate::registry::SubscriptionEntry;
use crate::subscription::{
    EventHandler, FunctionHandler, HandlerRef, IntoHandlerResult, SubscribeOptions,
    SubscriptionHandle, SubscriptionId, SyncFunctionHandler, TypedFunctionHandler,
};
use crate::{Error, Event, EventEnvelope, EventMetadata, Result};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

pub mod builder;
pub mod config;
pub mod history;
pub mod metrics;

pub use builder::EventBusBuilder;
pub use config::EventBusConfig;
pub use history::EventHistory;
pub use metrics::{BusMetrics, Counters, MetricsSnapshot};

/// The main event bus for publishing and subscribing to events.
///
/// Cloning is cheap; every clone refers to the same bus. Exactly one bus is
/// meant to exist per application, created at start-up and handed to the
/// components that need it.
///
/// # Example
///
/// ```rust,no_run
/// use overlay_events::{EventBus, EventEnvelope, SubscribeOptions};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let bus = EventBus::builder().build()?;
///
///     let _handle = bus.subscribe_fn(
///         "x.evt",
///         |event: &EventEnvelope| println!("Received: {}", event.payload()),
///         SubscribeOptions::new().priority(10),
///     )?;
///
///     bus.emit("x.evt", json!({"value": 1}))?;
///     bus.flush().await;
///
///     bus.shutdown().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Debug)]
struct BusInner {
    config: EventBusConfig,
    dispatcher: Arc<Dispatcher>,
}

impl EventBus {
    /// Create a new EventBus builder
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::new()
    }

    /// Create a bus with the default configuration
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub(crate) fn from_parts(config: EventBusConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            inner: Arc::new(BusInner { config, dispatcher }),
        }
    }

    fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    /// The configuration the bus was built with
    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    // ---- subscription -------------------------------------------------

    /// Subscribe a handler to an event type.
    ///
    /// With `options.weak` (the default) the returned handle owns the
    /// handler and dropping it ends the subscription.
    pub fn subscribe<H>(
        &self,
        event_type: impl Into<String>,
        handler: H,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle>
    where
        H: EventHandler,
    {
        self.subscribe_arc(event_type, Arc::new(handler), options)
    }

    /// Subscribe an already shared handler
    pub fn subscribe_arc(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle> {
        if options.weak {
            let reference = HandlerRef::Weak(Arc::downgrade(&handler));
            self.register(event_type.into(), reference, options, Some(handler))
        } else {
            self.register(event_type.into(), HandlerRef::Strong(handler), options, None)
        }
    }

    /// Subscribe a synchronous closure
    pub fn subscribe_fn<F, R>(
        &self,
        event_type: impl Into<String>,
        handler: F,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(&EventEnvelope) -> R + Send + Sync + 'static,
        R: IntoHandlerResult + 'static,
    {
        self.subscribe(event_type, SyncFunctionHandler::new(handler), options)
    }

    /// Subscribe an async closure
    pub fn subscribe_async<F, Fut>(
        &self,
        event_type: impl Into<String>,
        handler: F,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoHandlerResult,
    {
        self.subscribe(event_type, FunctionHandler::new(handler), options)
    }

    /// Subscribe to a typed event; the payload is decoded before the call
    pub fn subscribe_event<T, F, Fut>(
        &self,
        handler: F,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle>
    where
        T: Event,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoHandlerResult,
    {
        self.subscribe(T::event_type(), TypedFunctionHandler::<T, F, Fut>::new(handler), options)
    }

    /// Subscribe a handler whose lifetime is governed by an existing owner.
    ///
    /// The bus holds a weak reference (unless `options.weak` is false); once
    /// every `Arc` to the owner is dropped the subscription goes dead.
    pub fn subscribe_owned<H>(
        &self,
        event_type: impl Into<String>,
        owner: &Arc<H>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle>
    where
        H: EventHandler,
    {
        let handler: Arc<dyn EventHandler> = owner.clone();
        let reference = if options.weak {
            HandlerRef::Weak(Arc::downgrade(&handler))
        } else {
            HandlerRef::Strong(handler)
        };
        self.register(event_type.into(), reference, options, None)
    }

    /// Subscribe through a weak reference the caller already holds
    pub fn subscribe_weak(
        &self,
        event_type: impl Into<String>,
        handler: Weak<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle> {
        if handler.strong_count() == 0 {
            return Err(Error::InvalidHandler(
                "weak handler's owner has already been dropped".into(),
            ));
        }
        self.register(event_type.into(), HandlerRef::Weak(handler), options, None)
    }

    fn register(
        &self,
        event_type: String,
        handler: HandlerRef,
        options: SubscribeOptions,
        anchor: Option<Arc<dyn EventHandler>>,
    ) -> Result<SubscriptionHandle> {
        if event_type.is_empty() {
            return Err(Error::validation("event type must not be empty"));
        }
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        let id = Uuid::new_v4();
        let entry = SubscriptionEntry::new(id, event_type.clone(), handler)
            .with_name(options.name.clone())
            .with_priority(options.priority)
            .with_once(options.once);

        debug!(
            subscription_id = %id,
            %event_type,
            priority = options.priority,
            once = options.once,
            weak = options.weak,
            "Subscribing handler"
        );
        self.dispatcher().registry().register(entry);

        Ok(SubscriptionHandle::new(id, event_type, options.name, anchor))
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher().registry().unregister(id)
    }

    /// Remove the subscription behind a handle
    pub fn unsubscribe_handle(&self, handle: SubscriptionHandle) -> bool {
        self.unsubscribe(handle.id())
    }

    /// Remove subscriptions whose weak handler is gone; returns how many
    pub fn reap_dead(&self) -> usize {
        self.dispatcher().registry().reap_dead()
    }

    /// Number of live subscriptions for an event type
    pub fn subscription_count(&self, event_type: &str) -> usize {
        self.dispatcher().registry().subscription_count(event_type)
    }

    // ---- emission -----------------------------------------------------

    /// Fire-and-forget emission of a JSON payload.
    ///
    /// After shutdown the event is dropped silently and counted; the
    /// returned id is still that of the dropped event.
    pub fn emit(&self, event_type: impl Into<String>, payload: Value) -> Result<Uuid> {
        self.emit_envelope(EventEnvelope::new(event_type, payload))
    }

    /// Emit with explicit metadata (source, correlation id, ...)
    pub fn emit_with(
        &self,
        event_type: impl Into<String>,
        payload: Value,
        metadata: EventMetadata,
    ) -> Result<Uuid> {
        self.emit_envelope(EventEnvelope::with_metadata(event_type, payload, metadata))
    }

    /// Emit a typed event
    pub fn publish<T: Event>(&self, event: &T) -> Result<Uuid> {
        self.publish_with_metadata(event, EventMetadata::new())
    }

    /// Emit a typed event with custom metadata
    pub fn publish_with_metadata<T: Event>(&self, event: &T, metadata: EventMetadata) -> Result<Uuid> {
        self.emit_envelope(EventEnvelope::from_event(event, metadata)?)
    }

    /// Emit a prepared envelope
    pub fn emit_envelope(&self, envelope: EventEnvelope) -> Result<Uuid> {
        if envelope.event_type().is_empty() {
            return Err(Error::validation("event type must not be empty"));
        }

        let event_id = envelope.event_id();
        trace!(
            event_id = %event_id,
            event_type = %envelope.event_type(),
            "Emitting event"
        );
        self.dispatcher().submit(envelope);
        Ok(event_id)
    }

    /// Dispatch in-line, bypassing the queue, and collect handler results.
    ///
    /// Uses the configured default timeout.
    pub async fn emit_and_wait(
        &self,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Result<Vec<Value>> {
        let timeout = self.config().emit_and_wait_timeout;
        self.emit_and_wait_envelope(EventEnvelope::new(event_type, payload), timeout)
            .await
    }

    /// Like [`emit_and_wait`](Self::emit_and_wait) with a custom timeout
    pub async fn emit_and_wait_timeout(
        &self,
        event_type: impl Into<String>,
        payload: Value,
        timeout: Duration,
    ) -> Result<Vec<Value>> {
        self.emit_and_wait_envelope(EventEnvelope::new(event_type, payload), timeout)
            .await
    }

    /// In-line dispatch of a prepared envelope.
    ///
    /// On timeout the caller gets [`Error::Timeout`]; the handlers keep
    /// running to completion in the background.
    pub async fn emit_and_wait_envelope(
        &self,
        envelope: EventEnvelope,
        timeout: Duration,
    ) -> Result<Vec<Value>> {
        if envelope.event_type().is_empty() {
            return Err(Error::validation("event type must not be empty"));
        }
        let dispatcher = Arc::clone(self.dispatcher());
        if !dispatcher.is_accepting() {
            dispatcher.metrics().record_shutdown_drops(1);
            return Err(Error::ShuttingDown);
        }
        dispatcher.metrics().record_emitted();

        trace!(
            event_id = %envelope.event_id(),
            event_type = %envelope.event_type(),
            "Dispatching event in-line"
        );

        let task = tokio::spawn(async move {
            let results = dispatcher.dispatch_event(&envelope, true).await;
            dispatcher.finish(envelope);
            // Handler failures may have queued error.occurred
            dispatcher.schedule();
            results
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(results)) => Ok(results),
            Ok(Err(e)) => Err(Error::internal(format!("in-line dispatch task failed: {}", e))),
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "emit_and_wait timed out");
                Err(Error::Timeout {
                    operation: "emit_and_wait",
                    timeout,
                })
            }
        }
    }

    /// Wait until the queue is drained and no pass is running.
    ///
    /// Also starts a pass for events that were queued outside a runtime.
    pub async fn flush(&self) {
        let dispatcher = self.dispatcher();
        loop {
            if dispatcher.is_idle() {
                break;
            }
            if !dispatcher.is_dispatching() && dispatcher.queue_depth() > 0 {
                dispatcher.schedule();
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn wait_for_pass(&self) {
        while self.dispatcher().is_dispatching() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    // ---- diagnostics --------------------------------------------------

    /// Counters plus queue and subscription gauges
    pub fn metrics(&self) -> MetricsSnapshot {
        let dispatcher = self.dispatcher();
        let registry = dispatcher.registry();
        let subscription_count = registry
            .event_types()
            .into_iter()
            .map(|event_type| {
                let count = registry.subscription_count(&event_type);
                (event_type, count)
            })
            .collect::<std::collections::BTreeMap<_, _>>();

        MetricsSnapshot {
            counters: dispatcher.metrics().counters(),
            queue_depth: dispatcher.queue_depth(),
            event_types: subscription_count.len(),
            total_subscriptions: registry.total_subscriptions(),
            subscription_count,
        }
    }

    /// The most recently dispatched events, oldest first
    pub fn recent_events(&self, limit: usize) -> Vec<EventEnvelope> {
        self.dispatcher().history().recent(limit)
    }

    /// Number of events waiting for dispatch
    pub fn queue_depth(&self) -> usize {
        self.dispatcher().queue_depth()
    }

    /// Check if the event bus is shutting down
    pub fn is_shutting_down(&self) -> bool {
        !self.dispatcher().is_accepting()
    }

    // ---- lifecycle ----------------------------------------------------

    /// Shut down with the configured grace window
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(self.config().shutdown_timeout).await
    }

    /// Shut down the bus.
    ///
    /// New emissions are dropped at once. The queue gets up to `grace` to
    /// drain; whatever is left afterwards is discarded and the handler that
    /// is running gets one more `grace` to finish. Subscriptions and history
    /// are cleared in every case. Returns [`Error::Timeout`] if the queue
    /// could not be drained in time.
    pub async fn shutdown_with_timeout(&self, grace: Duration) -> Result<()> {
        let dispatcher = self.dispatcher();
        if !dispatcher.stop_accepting() {
            debug!("EventBus already shut down");
            return Ok(());
        }

        info!(
            queued = dispatcher.queue_depth(),
            grace_ms = grace.as_millis() as u64,
            "Shutting down EventBus"
        );

        let drained = tokio::time::timeout(grace, self.flush()).await.is_ok();
        let dropped = dispatcher.halt();
        if !drained {
            warn!(dropped, "Shutdown grace window expired, discarding queued events");
            if tokio::time::timeout(grace, self.wait_for_pass()).await.is_err() {
                warn!("Handler still running after shutdown grace window");
            }
        }

        dispatcher.registry().clear();
        dispatcher.history().clear();

        info!("EventBus shutdown complete");
        if drained {
            Ok(())
        } else {
            Err(Error::Timeout {
                operation: "shutdown",
                timeout: grace,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TestEvent {
        value: String,
    }

    impl Event for TestEvent {
        fn event_type() -> &'static str {
            "test.event"
        }
    }

    fn bus() -> EventBus {
        EventBus::builder().test().build().unwrap()
    }

    #[tokio::test]
    async fn test_event_bus_basic() {
        let bus = bus();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();

        let handle = bus
            .subscribe_event(
                move |event: TestEvent| {
                    let sink = sink.clone();
                    async move {
                        sink.lock().unwrap().push(event.value);
                    }
                },
                SubscribeOptions::new(),
            )
            .unwrap();

        bus.publish(&TestEvent { value: "first".into() }).unwrap();
        bus.publish(&TestEvent { value: "second".into() }).unwrap();
        bus.flush().await;

        assert_eq!(*received.lock().unwrap(), vec!["first", "second"]);

        assert!(bus.unsubscribe_handle(handle));
        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_emit_and_wait_collects_results() {
        let bus = bus();
        let _low = bus
            .subscribe_fn("calc", |_: &EventEnvelope| json!("low"), SubscribeOptions::new())
            .unwrap();
        let _high = bus
            .subscribe_fn(
                "calc",
                |e: &EventEnvelope| e.payload().clone(),
                SubscribeOptions::new().priority(5),
            )
            .unwrap();

        let results = bus.emit_and_wait("calc", json!(7)).await.unwrap();
        assert_eq!(results, vec![json!(7), json!("low")]);
        assert_eq!(bus.recent_events(1)[0].event_type(), "calc");
        assert_eq!(bus.queue_depth(), 0);
    }

    #[tokio::test]
    async fn test_emit_and_wait_times_out() {
        let bus = bus();
        let _slow = bus
            .subscribe_async(
                "slow",
                |_: EventEnvelope| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                },
                SubscribeOptions::new(),
            )
            .unwrap();

        let err = bus
            .emit_and_wait_timeout("slow", Value::Null, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_dropping_handle_ends_weak_subscription() {
        let bus = bus();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();

        let handle = bus
            .subscribe_fn(
                "x.evt",
                move |_: &EventEnvelope| *counter.lock().unwrap() += 1,
                SubscribeOptions::new(),
            )
            .unwrap();

        bus.emit("x.evt", Value::Null).unwrap();
        bus.flush().await;
        drop(handle);
        bus.emit("x.evt", Value::Null).unwrap();
        bus.flush().await;

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(bus.subscription_count("x.evt"), 0);
        assert_eq!(bus.reap_dead(), 0);
    }

    #[tokio::test]
    async fn test_strong_subscription_outlives_handle() {
        let bus = bus();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();

        let handle = bus
            .subscribe_fn(
                "x.evt",
                move |_: &EventEnvelope| *counter.lock().unwrap() += 1,
                SubscribeOptions::new().strong(),
            )
            .unwrap();
        assert!(!handle.is_anchor());
        drop(handle);

        bus.emit("x.evt", Value::Null).unwrap();
        bus.flush().await;
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_owned_subscription_follows_owner() {
        let bus = bus();
        let owner = Arc::new(SyncFunctionHandler::new(|_: &EventEnvelope| ()));
        let _handle = bus
            .subscribe_owned("x.evt", &owner, SubscribeOptions::new())
            .unwrap();

        assert_eq!(bus.reap_dead(), 0);
        drop(owner);
        assert_eq!(bus.reap_dead(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_validation() {
        let bus = bus();
        let err = bus
            .subscribe_fn("", |_: &EventEnvelope| (), SubscribeOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let dead: Weak<dyn EventHandler> = {
            let handler: Arc<dyn EventHandler> =
                Arc::new(SyncFunctionHandler::new(|_: &EventEnvelope| ()));
            Arc::downgrade(&handler)
        };
        let err = bus
            .subscribe_weak("x.evt", dead, SubscribeOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHandler(_)));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_and_drops() {
        let bus = bus();
        let _handle = bus
            .subscribe_fn("x.evt", |_: &EventEnvelope| (), SubscribeOptions::new())
            .unwrap();

        bus.shutdown().await.unwrap();
        assert!(bus.is_shutting_down());

        bus.emit("x.evt", Value::Null).unwrap();
        assert!(bus
            .subscribe_fn("x.evt", |_: &EventEnvelope| (), SubscribeOptions::new())
            .unwrap_err()
            .is_shutdown());
        assert!(bus.emit_and_wait("x.evt", Value::Null).await.unwrap_err().is_shutdown());

        let metrics = bus.metrics();
        assert_eq!(metrics.counters.drop_shutdown, 2);
        assert_eq!(metrics.total_subscriptions, 0);

        // Second shutdown is a no-op
        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_event_bus_stats() {
        let bus = bus();

        let _handle1 = bus
            .subscribe_fn("a.evt", |_: &EventEnvelope| (), SubscribeOptions::new())
            .unwrap();
        let _handle2 = bus
            .subscribe_fn("a.evt", |_: &EventEnvelope| (), SubscribeOptions::new())
            .unwrap();
        let _handle3 = bus
            .subscribe_fn("b.evt", |_: &EventEnvelope| (), SubscribeOptions::new())
            .unwrap();

        let stats = bus.metrics();
        assert_eq!(stats.total_subscriptions, 3);
        assert_eq!(stats.event_types, 2);
        assert_eq!(stats.subscription_count.get("a.evt"), Some(&2));
        assert!(stats.to_string().contains("3 subscriptions"));
    }
}
