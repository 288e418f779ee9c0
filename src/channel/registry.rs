use super::{
    handle::ChannelHandle,
    state::ChannelStatus,
    subscription::{MessageFilter, MessageHandler, SubscriptionId, SubscriptionRecord},
};
use crate::infrastructure::lock;
use crate::types::{RealtimeError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;

/// A channel handle whose last reference went away
#[derive(Debug, Clone)]
pub struct Released {
    pub handle: Arc<ChannelHandle>,
    /// True when this release tore the handle down
    pub closed: bool,
    /// Status before the teardown (decides whether the provider must be told)
    pub previous: ChannelStatus,
}

#[derive(Default)]
struct RegistryState {
    /// Kept in registration order
    records: Vec<SubscriptionRecord>,
    handles: HashMap<String, Arc<ChannelHandle>>,
}

/// Maps logical subscriptions onto shared, reference-counted channel handles.
///
/// At most one handle (and so at most one provider-level subscription) exists
/// per channel name. All operations are synchronous; the caller decides what
/// to do with the provider when a handle is opened or torn down.
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
    this: Weak<SubscriptionRegistry>,
    teardown_tx: mpsc::UnboundedSender<Released>,
}

impl SubscriptionRegistry {
    /// Creates the registry and the queue of handles torn down by disposers
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Released>) {
        let (teardown_tx, teardown_rx) = mpsc::unbounded_channel();
        let registry = Arc::new_cyclic(|this| Self {
            state: Mutex::new(RegistryState::default()),
            this: this.clone(),
            teardown_tx,
        });
        (registry, teardown_rx)
    }

    fn retain(&self, state: &mut RegistryState, channel: &str) -> (Arc<ChannelHandle>, bool) {
        let mut created = false;
        let handle = state
            .handles
            .entry(channel.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(ChannelHandle::new(channel, self.this.clone()))
            })
            .clone();
        handle.retain();
        (handle, created)
    }

    fn release_ref(&self, state: &mut RegistryState, channel: &str) -> Option<Released> {
        let handle = state.handles.get(channel)?.clone();
        if handle.release() > 0 {
            return Some(Released {
                previous: handle.status(),
                handle,
                closed: false,
            });
        }

        state.handles.remove(channel);
        let previous = handle.mark_closed();
        tracing::debug!("Channel handle '{}' released", channel);
        Some(Released {
            handle,
            closed: true,
            previous,
        })
    }

    /// Records a subscription; returns its id, the handle, and whether the handle was just created
    pub fn add(
        &self,
        channel: &str,
        event: Option<String>,
        filter: Option<MessageFilter>,
        handler: MessageHandler,
    ) -> (SubscriptionId, Arc<ChannelHandle>, bool) {
        let mut state = lock(&self.state);
        let (handle, created) = self.retain(&mut state, channel);
        let id = SubscriptionId::new();
        state.records.push(SubscriptionRecord {
            id,
            channel: channel.to_string(),
            event,
            filter,
            handler,
        });
        (id, handle, created)
    }

    /// Records a subscription on an existing live handle
    pub fn bind(
        &self,
        channel: &str,
        event: Option<String>,
        handler: MessageHandler,
    ) -> Result<SubscriptionId> {
        let mut state = lock(&self.state);
        if !state.handles.contains_key(channel) {
            return Err(RealtimeError::Channel(format!(
                "channel '{}' is closed",
                channel
            )));
        }
        self.retain(&mut state, channel);
        let id = SubscriptionId::new();
        state.records.push(SubscriptionRecord {
            id,
            channel: channel.to_string(),
            event,
            filter: None,
            handler,
        });
        Ok(id)
    }

    /// Removes a subscription record; unknown ids are ignored
    pub fn remove(&self, id: SubscriptionId) -> Option<Released> {
        let mut state = lock(&self.state);
        let position = state.records.iter().position(|record| record.id == id)?;
        let record = state.records.remove(position);
        self.release_ref(&mut state, &record.channel)
    }

    /// Removes a subscription from a synchronous context, queueing any provider teardown
    pub fn dispose(&self, id: SubscriptionId) {
        if let Some(released) = self.remove(id)
            && released.closed
            && self.teardown_tx.send(released).is_err()
        {
            tracing::debug!("Teardown queue closed, dropping channel teardown");
        }
    }

    /// Takes a direct reference on a channel handle
    pub fn acquire(&self, channel: &str) -> (Arc<ChannelHandle>, bool) {
        let mut state = lock(&self.state);
        self.retain(&mut state, channel)
    }

    /// Drops a direct reference taken with [`acquire()`](Self::acquire)
    pub fn release(&self, channel: &str) -> Option<Released> {
        let mut state = lock(&self.state);
        self.release_ref(&mut state, channel)
    }

    pub fn handle(&self, channel: &str) -> Option<Arc<ChannelHandle>> {
        lock(&self.state).handles.get(channel).cloned()
    }

    /// All live handles, ordered by name
    pub fn handles(&self) -> Vec<Arc<ChannelHandle>> {
        let mut handles: Vec<Arc<ChannelHandle>> =
            lock(&self.state).handles.values().cloned().collect();
        handles.sort_by(|a, b| a.name().cmp(b.name()));
        handles
    }

    /// Records on a channel, in registration order
    pub fn matching(&self, channel: &str) -> Vec<SubscriptionRecord> {
        lock(&self.state)
            .records
            .iter()
            .filter(|record| record.channel == channel)
            .cloned()
            .collect()
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.state).records.len()
    }

    pub fn channel_count(&self) -> usize {
        lock(&self.state).handles.len()
    }

    /// Drops every record and handle; returns the handles that were live
    pub fn clear(&self) -> Vec<Released> {
        let mut state = lock(&self.state);
        state.records.clear();
        state
            .handles
            .drain()
            .map(|(_, handle)| {
                let previous = handle.mark_closed();
                Released {
                    handle,
                    closed: true,
                    previous,
                }
            })
            .collect()
    }
}
