use crate::channel::Disposer;
use crate::infrastructure::lock;
use crate::types::Result;
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, watch};

/// Lifecycle of the realtime session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Connected,
    Reconnecting,
    PollingFallback,
    Disconnected,
    Error,
    /// No credentials configured; realtime is switched off
    Disabled,
}

impl ConnectionState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::PollingFallback => "polling-fallback",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::Disabled => "disabled",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Uninitialized, Connecting | Disabled | Disconnected)
                | (Connecting, Connected | Error | Disconnected)
                | (Connected, Reconnecting | Disconnected)
                | (Reconnecting, Connected | PollingFallback | Disconnected)
                | (PollingFallback, Connecting | Disconnected)
                | (Error, Connecting | Disconnected)
                | (Disconnected, Connecting | Disabled)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Callback invoked with the new state on every transition
pub type StateObserver = Arc<dyn Fn(ConnectionState) + Send + Sync + 'static>;

type ConnectWaiter = oneshot::Sender<Result<()>>;

/// Single authoritative connection state plus everyone watching it.
///
/// Transitions are validated; observers run outside the lock and a panicking
/// observer does not stop the others.
pub struct ConnectionManager {
    state: Mutex<ConnectionState>,
    observers: Mutex<Vec<(u64, StateObserver)>>,
    next_observer: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
    waiters: Mutex<Vec<ConnectWaiter>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Uninitialized);
        Self {
            state: Mutex::new(ConnectionState::Uninitialized),
            observers: Mutex::new(Vec::new()),
            next_observer: AtomicU64::new(0),
            state_tx,
            waiters: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Moves to `next` if allowed; returns whether the state changed
    pub fn transition(&self, next: ConnectionState) -> bool {
        {
            let mut state = lock(&self.state);
            if *state == next {
                return false;
            }
            if !state.can_transition_to(next) {
                tracing::warn!("Refusing connection state change {} -> {}", *state, next);
                return false;
            }
            tracing::debug!("Connection state {} -> {}", *state, next);
            *state = next;
        }
        self.notify(next);
        true
    }

    /// Unconditionally returns to `Uninitialized` (re-initialization)
    pub(crate) fn reset(&self) {
        {
            let mut state = lock(&self.state);
            if *state == ConnectionState::Uninitialized {
                return;
            }
            *state = ConnectionState::Uninitialized;
        }
        self.notify(ConnectionState::Uninitialized);
    }

    fn notify(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);

        let observers: Vec<StateObserver> = lock(&self.observers)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(state))).is_err() {
                tracing::error!("State observer panicked on {}", state);
            }
        }
    }

    /// Registers an observer; the disposer removes it
    pub fn on_state_change<F>(self: &Arc<Self>, observer: F) -> Disposer
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.next_observer.fetch_add(1, Ordering::SeqCst);
        lock(&self.observers).push((id, Arc::new(observer)));

        let manager = Arc::downgrade(self);
        Disposer::new(move || {
            if let Some(manager) = manager.upgrade() {
                lock(&manager.observers).retain(|(observer_id, _)| *observer_id != id);
            }
        })
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.observers).len()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// A receiver settled by the next connect outcome
    pub(crate) fn register_waiter(&self) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        lock(&self.waiters).push(tx);
        rx
    }

    /// Settles every outstanding connect with an outcome built per waiter
    pub(crate) fn settle_waiters(&self, outcome: impl Fn() -> Result<()>) -> usize {
        let waiters: Vec<ConnectWaiter> = lock(&self.waiters).drain(..).collect();
        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(outcome());
        }
        count
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RealtimeError;
    use ConnectionState::*;

    const ALL: [ConnectionState; 8] = [
        Uninitialized,
        Connecting,
        Connected,
        Reconnecting,
        PollingFallback,
        Disconnected,
        Error,
        Disabled,
    ];

    #[test]
    fn test_connected_never_jumps_to_connecting() {
        assert!(!Connected.can_transition_to(Connecting));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Connected.can_transition_to(Disconnected));
    }

    #[test]
    fn test_disabled_is_terminal() {
        assert!(ALL.iter().all(|next| !Disabled.can_transition_to(*next)));
    }

    #[test]
    fn test_disconnect_reachable_from_live_states() {
        for state in [Connecting, Connected, Reconnecting, PollingFallback, Error] {
            assert!(state.can_transition_to(Disconnected), "{}", state);
        }
    }

    #[test]
    fn test_state_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&PollingFallback).unwrap(),
            "\"polling-fallback\""
        );
        assert_eq!(PollingFallback.to_string(), "polling-fallback");
    }

    #[test]
    fn test_transition_notifies_observers() {
        let manager = Arc::new(ConnectionManager::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let disposer = manager.on_state_change(move |state| sink.lock().unwrap().push(state));

        assert!(manager.transition(Connecting));
        assert!(!manager.transition(Connecting));
        assert!(manager.transition(Connected));
        assert!(!manager.transition(Connecting));

        assert_eq!(*seen.lock().unwrap(), vec![Connecting, Connected]);
        assert_eq!(manager.state(), Connected);

        disposer.dispose();
        assert_eq!(manager.observer_count(), 0);
        manager.transition(Disconnected);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_panicking_observer_does_not_block_others() {
        let manager = Arc::new(ConnectionManager::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        manager
            .on_state_change(|_| panic!("observer bug"))
            .detach();
        manager
            .on_state_change(move |state| sink.lock().unwrap().push(state))
            .detach();

        manager.transition(Disconnected);
        assert_eq!(*seen.lock().unwrap(), vec![Disconnected]);
    }

    #[test]
    fn test_watch_follows_transitions() {
        let manager = ConnectionManager::new();
        let rx = manager.watch();
        manager.transition(Connecting);
        assert_eq!(*rx.borrow(), Connecting);

        manager.transition(Disconnected);
        manager.transition(Disabled);
        manager.reset();
        assert_eq!(*rx.borrow(), Uninitialized);
    }

    #[tokio::test]
    async fn test_waiters_settled_once() {
        let manager = ConnectionManager::new();
        let first = manager.register_waiter();
        let second = manager.register_waiter();

        let settled = manager.settle_waiters(|| Err(RealtimeError::Cancelled));
        assert_eq!(settled, 2);
        assert!(matches!(first.await, Ok(Err(RealtimeError::Cancelled))));
        assert!(matches!(second.await, Ok(Err(RealtimeError::Cancelled))));
        assert_eq!(manager.settle_waiters(|| Ok(())), 0);
    }
}
