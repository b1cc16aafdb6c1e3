//! Event handler traits and implementations.

use crate::{Error, Event, EventEnvelope, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::{self, Display};
use std::future::Future;
use std::marker::PhantomData;

/// Trait for event handlers that can process events asynchronously.
///
/// A handler returns a JSON value; the dispatcher discards it for queued
/// emissions and collects it for `emit_and_wait`. An `Err` (or a panic) is
/// isolated to this handler and reported as `error.occurred`.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Process an event envelope
    async fn handle(&self, event: &EventEnvelope) -> Result<Value>;

    /// Get the handler name for debugging
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Conversion of handler return values into the handler result.
pub trait IntoHandlerResult {
    /// Convert into the value collected by `emit_and_wait`
    fn into_handler_result(self) -> Result<Value>;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> Result<Value> {
        Ok(Value::Null)
    }
}

impl IntoHandlerResult for Value {
    fn into_handler_result(self) -> Result<Value> {
        Ok(self)
    }
}

impl<E: Display> IntoHandlerResult for std::result::Result<(), E> {
    fn into_handler_result(self) -> Result<Value> {
        self.map(|()| Value::Null)
            .map_err(|e| Error::handler(e.to_string()))
    }
}

impl<E: Display> IntoHandlerResult for std::result::Result<Value, E> {
    fn into_handler_result(self) -> Result<Value> {
        self.map_err(|e| Error::handler(e.to_string()))
    }
}

/// A synchronous closure handler.
pub struct SyncFunctionHandler<F, R> {
    function: F,
    name: String,
    _marker: PhantomData<fn() -> R>,
}

impl<F, R> SyncFunctionHandler<F, R>
where
    F: Fn(&EventEnvelope) -> R + Send + Sync + 'static,
    R: IntoHandlerResult + 'static,
{
    /// Create a new sync handler
    pub fn new(function: F) -> Self {
        Self::with_name(function, "SyncFunctionHandler")
    }

    /// Create a new sync handler with a custom name
    pub fn with_name(function: F, name: impl Into<String>) -> Self {
        Self {
            function,
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, R> EventHandler for SyncFunctionHandler<F, R>
where
    F: Fn(&EventEnvelope) -> R + Send + Sync + 'static,
    R: IntoHandlerResult + 'static,
{
    async fn handle(&self, event: &EventEnvelope) -> Result<Value> {
        (self.function)(event).into_handler_result()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F, R> fmt::Debug for SyncFunctionHandler<F, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncFunctionHandler").field("name", &self.name).finish()
    }
}

/// An async closure handler.
pub struct FunctionHandler<F, Fut> {
    function: F,
    name: String,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FunctionHandler<F, Fut>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    /// Create a new function handler
    pub fn new(function: F) -> Self {
        Self::with_name(function, "FunctionHandler")
    }

    /// Create a new function handler with a custom name
    pub fn with_name(function: F, name: impl Into<String>) -> Self {
        Self {
            function,
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FunctionHandler<F, Fut>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    async fn handle(&self, event: &EventEnvelope) -> Result<Value> {
        (self.function)(event.clone()).await.into_handler_result()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F, Fut> fmt::Debug for FunctionHandler<F, Fut> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionHandler").field("name", &self.name).finish()
    }
}

/// An async closure handler that receives the decoded payload.
///
/// A payload that does not decode into `T` counts as a handler failure.
pub struct TypedFunctionHandler<T, F, Fut> {
    function: F,
    name: String,
    _marker: PhantomData<fn(T) -> Fut>,
}

impl<T, F, Fut> TypedFunctionHandler<T, F, Fut>
where
    T: Event,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    /// Create a new typed handler
    pub fn new(function: F) -> Self {
        Self {
            function,
            name: format!("TypedHandler<{}>", T::event_type()),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> EventHandler for TypedFunctionHandler<T, F, Fut>
where
    T: Event,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    async fn handle(&self, event: &EventEnvelope) -> Result<Value> {
        let typed = event.payload_as::<T>()?;
        (self.function)(typed).await.into_handler_result()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<T, F, Fut> fmt::Debug for TypedFunctionHandler<T, F, Fut> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedFunctionHandler").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Sample {
        value: i32,
    }

    impl Event for Sample {
        fn event_type() -> &'static str {
            "test.sample"
        }
    }

    #[tokio::test]
    async fn test_sync_handler_outputs() {
        let unit = SyncFunctionHandler::new(|_: &EventEnvelope| ());
        let event = EventEnvelope::new("x.evt", json!(1));
        assert_eq!(unit.handle(&event).await.unwrap(), Value::Null);

        let echo = SyncFunctionHandler::with_name(|e: &EventEnvelope| e.payload().clone(), "echo");
        assert_eq!(echo.handle(&event).await.unwrap(), json!(1));
        assert_eq!(echo.name(), "echo");
        assert_eq!(format!("{:?}", echo), r#"SyncFunctionHandler { name: "echo" }"#);

        let failing = SyncFunctionHandler::new(|_: &EventEnvelope| Err::<(), _>("boom"));
        let err = failing.handle(&event).await.unwrap_err();
        assert_eq!(err.to_string(), "Handler error: boom");
    }

    #[tokio::test]
    async fn test_function_handler() {
        let handler = FunctionHandler::new(|event: EventEnvelope| async move {
            Ok::<_, Error>(json!({"seen": event.event_type()}))
        });

        let event = EventEnvelope::new("x.evt", json!(42));
        assert_eq!(handler.handle(&event).await.unwrap(), json!({"seen": "x.evt"}));
    }

    #[tokio::test]
    async fn test_typed_handler_decodes_payload() {
        let handler = TypedFunctionHandler::new(|sample: Sample| async move {
            assert_eq!(sample.value, 42);
        });

        let good = EventEnvelope::new("test.sample", json!({"value": 42}));
        assert!(handler.handle(&good).await.is_ok());

        let bad = EventEnvelope::new("test.sample", json!("not an object"));
        assert!(matches!(
            handler.handle(&bad).await,
            Err(Error::SerializationError(_))
        ));
    }
}
