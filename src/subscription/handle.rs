//! Subscription handle for managing subscription lifecycle.

use super::{EventHandler, SubscriptionId};
use std::fmt;
use std::sync::Arc;

/// A handle to an active subscription.
///
/// For weak subscriptions (the default) the handle is the only strong owner
/// of the handler: when it is dropped the bus's reference goes dead and the
/// subscription is removed on the next dispatch of its type or on
/// `reap_dead`. For strong subscriptions the handle only carries the id.
#[must_use = "dropping a weak subscription handle ends the subscription"]
pub struct SubscriptionHandle {
    /// Unique ID for this subscription
    id: SubscriptionId,

    /// Event type the subscription matches
    event_type: String,

    /// Optional name for debugging
    name: Option<String>,

    /// Keeps the handler alive for weak subscriptions
    anchor: Option<Arc<dyn EventHandler>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: SubscriptionId,
        event_type: impl Into<String>,
        name: Option<String>,
        anchor: Option<Arc<dyn EventHandler>>,
    ) -> Self {
        Self {
            id,
            event_type: event_type.into(),
            name,
            anchor,
        }
    }

    /// Get the subscription ID
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Get the event type this subscription matches
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Get the subscription name if set
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether dropping this handle ends the subscription
    pub fn is_anchor(&self) -> bool {
        self.anchor.is_some()
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("name", &self.name)
            .field("anchor", &self.anchor.is_some())
            .finish()
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "Subscription '{}' to {} ({})", name, self.event_type, self.id),
            None => write!(f, "Subscription to {} ({})", self.event_type, self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::SyncFunctionHandler;
    use crate::EventEnvelope;
    use uuid::Uuid;

    #[test]
    fn test_handle_display() {
        let id = Uuid::new_v4();
        let handle = SubscriptionHandle::new(id, "x.evt", Some("logger".into()), None);

        assert_eq!(handle.name(), Some("logger"));
        assert_eq!(handle.to_string(), format!("Subscription 'logger' to x.evt ({})", id));
        assert!(!handle.is_anchor());
    }

    #[test]
    fn test_anchor_owns_handler() {
        let handler: Arc<dyn EventHandler> = Arc::new(SyncFunctionHandler::new(|_: &EventEnvelope| ()));
        let weak = Arc::downgrade(&handler);
        let handle = SubscriptionHandle::new(Uuid::new_v4(), "x.evt", None, Some(handler));

        assert!(handle.is_anchor());
        assert!(weak.upgrade().is_some());
        drop(handle);
        assert!(weak.upgrade().is_none());
    }
}
