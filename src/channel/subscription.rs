use crate::types::ChannelMessage;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Callback invoked for every accepted message
pub type MessageHandler = Arc<dyn Fn(&ChannelMessage) + Send + Sync + 'static>;

/// Predicate deciding whether a message reaches its handler
pub type MessageFilter = Arc<dyn Fn(&ChannelMessage) -> bool + Send + Sync + 'static>;

/// Opaque identifier of a logical subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A logical subscription: channel, optional event name, optional filter, handler
#[derive(Clone)]
pub struct SubscriptionRecord {
    pub id: SubscriptionId,
    pub channel: String,
    pub event: Option<String>,
    pub filter: Option<MessageFilter>,
    pub handler: MessageHandler,
}

impl SubscriptionRecord {
    /// Whether the record listens to this event name
    pub fn accepts_event(&self, event: &str) -> bool {
        self.event.as_deref().is_none_or(|bound| bound == event)
    }
}

impl fmt::Debug for SubscriptionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRecord")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("event", &self.event)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// Releases a registration when disposed or dropped.
///
/// Call [`detach()`](Self::detach) to keep the registration for the lifetime
/// of the client instead.
#[must_use = "dropping a Disposer removes the registration"]
pub struct Disposer {
    dispose: Option<Box<dyn FnOnce() + Send + Sync + 'static>>,
}

impl Disposer {
    pub(crate) fn new(dispose: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// Removes the registration now
    pub fn dispose(mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }

    /// Leaves the registration in place
    pub fn detach(mut self) {
        self.dispose = None;
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("armed", &self.dispose.is_some())
            .finish()
    }
}
