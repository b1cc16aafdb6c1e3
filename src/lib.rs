//! # overlay-events
//!
//! The in-process async event core of a desktop overlay application, built on
//! Tokio.
//!
//! ## Features
//!
//! - **Priority-ordered** publish/subscribe with FIFO tie-breaks
//! - **Bounded queue** that drops the oldest event instead of blocking emitters
//! - **Weak subscriptions** tied to a handle or an owner's lifetime
//! - **Error isolation**: failing handlers are reported as `error.occurred`
//! - **Hotkey bridge** funnelling a blocking keyboard-listener thread into the bus
//! - **Orchestrator** routing hotkey, tray and settings events to UI effects
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use overlay_events::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct CaptureFinished {
//!     path: String,
//! }
//!
//! impl Event for CaptureFinished {
//!     fn event_type() -> &'static str {
//!         "screenshot.completed"
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     // Create event bus
//!     let bus = EventBus::builder().build()?;
//!
//!     // Subscribe to events; the handle keeps the subscription alive
//!     let handle = bus.subscribe_event(
//!         |event: CaptureFinished| async move {
//!             println!("Saved screenshot to {}", event.path);
//!         },
//!         SubscribeOptions::new(),
//!     )?;
//!
//!     // Publish events
//!     bus.publish(&CaptureFinished {
//!         path: "/tmp/shot.png".to_string(),
//!     })?;
//!     bus.flush().await;
//!
//!     // Unsubscribe when done
//!     bus.unsubscribe_handle(handle);
//!     bus.shutdown().await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    unreachable_pub
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Core event system traits and types
pub mod event;

/// Error types and result aliases
pub mod error;

/// Event registry for type-to-subscriber mapping
pub mod registry;

/// Subscription management for event handlers
pub mod subscription;

/// Event dispatcher for routing events
pub mod dispatcher;

/// The main event bus implementation
pub mod bus;

/// Settings feed consumed by the core
pub mod settings;

/// Configuration of the whole core
pub mod config;

/// Global hotkeys bridged from a keyboard-listener thread
pub mod hotkey;

/// Routing of inbound events to effects
pub mod orchestrator;

/// Root context owning the bus, the bridge and the orchestrator
pub mod app;

/// Tracing subscriber setup
pub mod telemetry;

// Re-export commonly used types
pub use bus::{EventBus, EventBusBuilder, EventBusConfig, MetricsSnapshot};
pub use error::{Error, Result};
pub use event::{Event, EventEnvelope, EventMetadata};
pub use subscription::{EventHandler, SubscribeOptions, SubscriptionHandle, SubscriptionId};

/// Prelude module for convenient imports
///
/// # Example
/// ```rust
/// use overlay_events::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bus::{EventBus, EventBusBuilder, EventBusConfig};
    pub use crate::error::{Error, Result};
    pub use crate::event::{names, Event, EventEnvelope, EventMetadata};
    pub use crate::subscription::{EventHandler, SubscribeOptions, SubscriptionHandle};
}
