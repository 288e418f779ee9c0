use super::{
    presence::{Member, Members, MembersChanges, PresenceSnapshot},
    registry::SubscriptionRegistry,
    state::{ChannelState, ChannelStatus},
    subscription::{Disposer, MessageHandler},
};
use crate::infrastructure::lock;
use crate::types::{ChannelMessage, PRESENCE_PREFIX, PRIVATE_PREFIX, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Channel kind, derived from the name prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Public,
    /// `private-` channels require authorization
    Private,
    /// `presence-` channels require authorization and track members
    Presence,
}

impl ChannelKind {
    pub fn from_name(name: &str) -> Self {
        if name.starts_with(PRESENCE_PREFIX) {
            Self::Presence
        } else if name.starts_with(PRIVATE_PREFIX) {
            Self::Private
        } else {
            Self::Public
        }
    }

    pub fn requires_auth(&self) -> bool {
        !matches!(self, Self::Public)
    }
}

/// Shared handle to a provider-level channel subscription.
///
/// One handle exists per live channel name. It is reference counted by the
/// registry: every subscription record and every
/// [`subscribe_to_channel()`](crate::RealtimeClient::subscribe_to_channel)
/// acquisition holds one reference, and the provider subscription is torn
/// down when the last reference goes away.
///
/// # Example
///
/// ```no_run
/// use dashboard_realtime::{RealtimeClient, RealtimeClientOptions};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RealtimeClient::new(RealtimeClientOptions {
///     key: "app-key".to_string(),
///     ..Default::default()
/// });
/// client.connect(None).await?;
///
/// let channel = client.subscribe_to_channel("presence-class-7").await;
/// let disposer = channel.bind("grade-posted", |msg| {
///     println!("grade: {}", msg.data);
/// })?;
///
/// println!("{:?} students online", channel.member_count());
/// disposer.dispose();
/// # Ok(())
/// # }
/// ```
pub struct ChannelHandle {
    name: String,
    kind: ChannelKind,
    references: AtomicUsize,
    state: Mutex<ChannelState>,
    registry: Weak<SubscriptionRegistry>,
}

impl ChannelHandle {
    pub(crate) fn new(name: impl Into<String>, registry: Weak<SubscriptionRegistry>) -> Self {
        let name = name.into();
        let kind = ChannelKind::from_name(&name);
        Self {
            name,
            kind,
            references: AtomicUsize::new(0),
            state: Mutex::new(ChannelState::new(kind == ChannelKind::Presence)),
            registry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Number of subscription records and direct acquisitions holding this handle
    pub fn reference_count(&self) -> usize {
        self.references.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ChannelStatus {
        lock(&self.state).status
    }

    pub fn is_subscribed(&self) -> bool {
        self.status() == ChannelStatus::Subscribed
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.state).last_error.clone()
    }

    /// Snapshot of the member set (presence channels only)
    pub fn members(&self) -> Option<Members> {
        lock(&self.state).members.clone()
    }

    pub fn member_count(&self) -> Option<usize> {
        lock(&self.state).members.as_ref().map(Members::count)
    }

    /// The local client's own member entry (presence channels only)
    pub fn me(&self) -> Option<Member> {
        lock(&self.state)
            .members
            .as_ref()
            .and_then(|members| members.me().cloned())
    }

    /// Registers a handler for one event name on this channel.
    ///
    /// The returned [`Disposer`] removes the handler when disposed or dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Channel`](crate::RealtimeError::Channel) if the
    /// handle has already been torn down.
    pub fn bind<F>(&self, event: impl Into<String>, handler: F) -> Result<Disposer>
    where
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        self.bind_handler(Some(event.into()), Arc::new(handler))
    }

    /// Registers a handler for every event on this channel.
    pub fn bind_all<F>(&self, handler: F) -> Result<Disposer>
    where
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        self.bind_handler(None, Arc::new(handler))
    }

    fn bind_handler(&self, event: Option<String>, handler: MessageHandler) -> Result<Disposer> {
        let registry = self.registry.upgrade().ok_or_else(|| {
            crate::RealtimeError::Channel(format!("channel '{}' is closed", self.name))
        })?;
        let id = registry.bind(&self.name, event, handler)?;

        let registry = Arc::downgrade(&registry);
        Ok(Disposer::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.dispose(id);
            }
        }))
    }

    pub(crate) fn retain(&self) -> usize {
        self.references.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn release(&self) -> usize {
        let previous = self
            .references
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                Some(count.saturating_sub(1))
            })
            .unwrap_or_default();
        previous.saturating_sub(1)
    }

    /// Claims the right to issue the provider subscribe. Only one caller wins per connection.
    pub(crate) fn try_begin_subscribe(&self) -> bool {
        let mut state = lock(&self.state);
        match state.status {
            ChannelStatus::Pending | ChannelStatus::Failed => {
                state.status = ChannelStatus::Subscribing;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn mark_subscribed(
        &self,
        presence: Option<PresenceSnapshot>,
    ) -> Option<MembersChanges> {
        let mut state = lock(&self.state);
        if state.status == ChannelStatus::Closed {
            return None;
        }
        state.status = ChannelStatus::Subscribed;
        state.last_error = None;
        match (state.members.as_mut(), presence) {
            (Some(members), Some(snapshot)) => Some(members.sync(snapshot)),
            _ => None,
        }
    }

    pub(crate) fn mark_failed(&self, message: impl Into<String>) {
        let mut state = lock(&self.state);
        if state.status != ChannelStatus::Closed {
            state.status = ChannelStatus::Failed;
            state.last_error = Some(message.into());
        }
    }

    /// The provider subscription is gone (socket lost); keep the handle for resubscription
    pub(crate) fn mark_pending(&self) {
        let mut state = lock(&self.state);
        if state.status != ChannelStatus::Closed {
            state.status = ChannelStatus::Pending;
            if let Some(members) = state.members.as_mut() {
                members.clear();
            }
        }
    }

    /// Returns the status held before closing
    pub(crate) fn mark_closed(&self) -> ChannelStatus {
        let mut state = lock(&self.state);
        let previous = state.status;
        state.status = ChannelStatus::Closed;
        if let Some(members) = state.members.as_mut() {
            members.clear();
        }
        previous
    }

    pub(crate) fn add_member(&self, member: Member) -> bool {
        lock(&self.state)
            .members
            .as_mut()
            .is_some_and(|members| members.add(member))
    }

    pub(crate) fn remove_member(&self, user_id: &str) -> Option<Member> {
        lock(&self.state)
            .members
            .as_mut()
            .and_then(|members| members.remove(user_id))
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("references", &self.reference_count())
            .field("status", &self.status())
            .finish()
    }
}
