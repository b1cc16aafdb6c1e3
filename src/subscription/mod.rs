//! Subscription management for event handlers.
//!
//! This module provides the pieces a subscription is made of: the handler
//! traits and closure adapters, the strong/weak reference the bus keeps to a
//! handler, the options a subscriber chooses and the handle it gets back.

use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

pub mod handle;
pub mod handler;

pub use handle::SubscriptionHandle;
pub use handler::{
    EventHandler, FunctionHandler, IntoHandlerResult, SyncFunctionHandler,
    TypedFunctionHandler,
};

/// Unique, process-lifetime identifier of a subscription
pub type SubscriptionId = Uuid;

/// How the bus refers to a handler.
#[derive(Clone)]
pub enum HandlerRef {
    /// The bus keeps the handler alive
    Strong(Arc<dyn EventHandler>),
    /// The handler lives as long as its external owner
    Weak(Weak<dyn EventHandler>),
}

impl HandlerRef {
    /// Resolve the handler, `None` if its owner is gone
    pub fn upgrade(&self) -> Option<Arc<dyn EventHandler>> {
        match self {
            HandlerRef::Strong(handler) => Some(Arc::clone(handler)),
            HandlerRef::Weak(handler) => handler.upgrade(),
        }
    }

    /// Whether the handler can still be invoked
    pub fn is_alive(&self) -> bool {
        match self {
            HandlerRef::Strong(_) => true,
            HandlerRef::Weak(handler) => handler.strong_count() > 0,
        }
    }

    /// Whether the bus holds only a weak reference
    pub fn is_weak(&self) -> bool {
        matches!(self, HandlerRef::Weak(_))
    }
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerRef::Strong(handler) => write!(f, "Strong({})", handler.name()),
            HandlerRef::Weak(_) => write!(f, "Weak(alive: {})", self.is_alive()),
        }
    }
}

/// Options chosen at subscribe time.
///
/// Defaults: priority 0, not once-only, weak.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Higher runs earlier within one event's dispatch
    pub priority: i32,

    /// Remove the subscription after its first invocation
    pub once: bool,

    /// Hold the handler weakly; the returned handle becomes its owner
    pub weak: bool,

    /// Optional name for diagnostics
    pub name: Option<String>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            once: false,
            weak: true,
            name: None,
        }
    }
}

impl SubscribeOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the priority
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Make the subscription once-only
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Let the bus own the handler
    pub fn strong(mut self) -> Self {
        self.weak = false;
        self
    }

    /// Set the weak flag explicitly
    pub fn weak(mut self, weak: bool) -> Self {
        self.weak = weak;
        self
    }

    /// Name the subscription
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
