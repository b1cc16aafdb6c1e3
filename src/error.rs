//! Error types for the overlay-events library.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for overlay-events
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed combo or invalid subscription arguments
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The conflict oracle refused a combo
    #[error("Hotkey {combo} is already taken: {reason}")]
    Conflict {
        /// Display form of the refused combo
        combo: String,
        /// Human-readable reason reported by the oracle
        reason: String,
    },

    /// Handler could not be bound (e.g. its owner is already gone)
    #[error("Invalid handler: {0}")]
    InvalidHandler(String),

    /// An operation did not complete within its deadline
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Name of the operation that timed out
        operation: &'static str,
        /// The deadline that was exceeded
        timeout: Duration,
    },

    /// Event bus or component is shutting down
    #[error("Event bus is shutting down")]
    ShuttingDown,

    /// Event handler error
    #[error("Handler error: {0}")]
    HandlerError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The OS keyboard listener could not be started or failed
    #[error("Keyboard listener error: {0}")]
    ListenerError(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Create a new handler error
    pub fn handler(msg: impl Into<String>) -> Self {
        Error::HandlerError(msg.into())
    }

    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Check if this error indicates the system is shutting down
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Error::ShuttingDown)
    }

    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Short machine-friendly name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Conflict { .. } => "conflict",
            Error::InvalidHandler(_) => "invalid_handler",
            Error::Timeout { .. } => "timeout",
            Error::ShuttingDown => "shutdown_rejected",
            Error::HandlerError(_) => "handler_failure",
            Error::SerializationError(_) => "serialization",
            Error::ConfigError(_) => "config",
            Error::ListenerError(_) => "listener",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

/// Context describing where a handler failure happened.
///
/// Used by the dispatcher to build the `error.occurred` payload.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Id of the event being dispatched
    pub event_id: Option<Uuid>,
    /// Type of the event being dispatched
    pub event_type: Option<String>,
    /// Name of the failing handler, if it has one
    pub handler_name: Option<String>,
    /// Subscription the handler belongs to
    pub subscription_id: Option<Uuid>,
    /// When the failure was observed
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorContext {
    /// Create a new error context
    pub fn new() -> Self {
        Self {
            event_id: None,
            event_type: None,
            handler_name: None,
            subscription_id: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Set the event ID
    pub fn with_event_id(mut self, id: Uuid) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Set the event type
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Set the handler name
    pub fn with_handler(mut self, name: impl Into<String>) -> Self {
        self.handler_name = Some(name.into());
        self
    }

    /// Set the subscription ID
    pub fn with_subscription(mut self, id: Uuid) -> Self {
        self.subscription_id = Some(id);
        self
    }

    /// Description of the failing handler: its name, else its subscription id
    pub fn handler_description(&self) -> String {
        match (&self.handler_name, &self.subscription_id) {
            (Some(name), Some(id)) => format!("{} ({})", name, id),
            (Some(name), None) => name.clone(),
            (None, Some(id)) => id.to_string(),
            (None, None) => "unknown".to_string(),
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error at {}", self.timestamp)?;
        if let Some(id) = &self.event_id {
            write!(f, " [event_id: {}]", id)?;
        }
        if let Some(event_type) = &self.event_type {
            write!(f, " [type: {}]", event_type)?;
        }
        if let Some(handler) = &self.handler_name {
            write!(f, " [handler: {}]", handler)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::validation("missing modifier");
        assert_eq!(err.to_string(), "Validation failed: missing modifier");

        let err = Error::Timeout {
            operation: "emit_and_wait",
            timeout: Duration::from_millis(50),
        };
        assert_eq!(err.to_string(), "emit_and_wait timed out after 50ms");
    }

    #[test]
    fn test_error_predicates() {
        assert!(Error::ShuttingDown.is_shutdown());
        assert!(!Error::internal("test").is_shutdown());
        assert_eq!(Error::ShuttingDown.kind(), "shutdown_rejected");
        assert!(Error::Timeout {
            operation: "shutdown",
            timeout: Duration::ZERO
        }
        .is_timeout());
    }

    #[test]
    fn test_error_context() {
        let id = Uuid::new_v4();
        let ctx = ErrorContext::new()
            .with_event_id(Uuid::new_v4())
            .with_event_type("x.evt")
            .with_handler("test_handler")
            .with_subscription(id);

        let display = ctx.to_string();
        assert!(display.contains("x.evt"));
        assert!(display.contains("test_handler"));
        assert_eq!(
            ctx.handler_description(),
            format!("test_handler ({})", id)
        );
    }
}
