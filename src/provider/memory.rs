use super::{EventSink, Provider, ProviderConfig};
use crate::channel::{ChannelKind, PresenceSnapshot};
use crate::infrastructure::lock;
use crate::messaging::{ProviderErrorKind, ProviderEvent};
use crate::types::{RealtimeError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// How the in-memory provider answers a connect attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectBehavior {
    /// Report `Connected`
    Accept,
    /// Report an `Error` event
    Reject {
        kind: ProviderErrorKind,
        message: String,
    },
    /// Fail the `connect` call itself
    Fail(String),
    /// Never answer
    Silent,
    /// Never return from `connect`, like a stalled handshake
    Hang,
}

impl ConnectBehavior {
    pub fn reject(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self::Reject {
            kind,
            message: message.into(),
        }
    }
}

/// A call the client made on the provider
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    Connect(ProviderConfig),
    Subscribe(String),
    Unsubscribe(String),
    Send {
        channel: String,
        event: String,
        data: Value,
    },
    Disconnect,
}

/// In-process provider that records calls and lets the host script events.
///
/// Useful for tests and for running a dashboard without a realtime backend.
///
/// # Example
///
/// ```no_run
/// use dashboard_realtime::{InMemoryProvider, RealtimeClient, RealtimeClientOptions};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = Arc::new(InMemoryProvider::new());
/// let client = RealtimeClient::with_provider(
///     RealtimeClientOptions {
///         key: "local".to_string(),
///         ..Default::default()
///     },
///     provider.clone(),
/// );
/// client.connect(None).await?;
///
/// client.subscribe("metrics", |msg| println!("{}", msg.data)).await;
/// provider.publish("metrics", "tick", serde_json::json!({"active": 12}));
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct InMemoryProvider {
    sink: Mutex<Option<EventSink>>,
    default_behavior: Mutex<Option<ConnectBehavior>>,
    scripted: Mutex<VecDeque<ConnectBehavior>>,
    calls: Mutex<Vec<ProviderCall>>,
    presence: Mutex<HashMap<String, PresenceSnapshot>>,
    connected: AtomicBool,
    sockets: AtomicU64,
}

impl InMemoryProvider {
    /// A provider that accepts every connect
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: ConnectBehavior) -> Self {
        let provider = Self::default();
        provider.set_behavior(behavior);
        provider
    }

    /// Behavior for every connect without a scripted answer
    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        *lock(&self.default_behavior) = Some(behavior);
    }

    /// One-shot behavior for the next connect
    pub fn push_behavior(&self, behavior: ConnectBehavior) {
        lock(&self.scripted).push_back(behavior);
    }

    /// Member list reported when `channel` is subscribed
    pub fn set_presence(&self, channel: impl Into<String>, snapshot: PresenceSnapshot) {
        lock(&self.presence).insert(channel.into(), snapshot);
    }

    /// Pushes an event to the bound client; false if nothing is bound
    pub fn emit(&self, event: ProviderEvent) -> bool {
        match lock(&self.sink).as_ref() {
            Some(sink) => sink.send(event).is_ok(),
            None => false,
        }
    }

    /// Delivers an application event on a channel
    pub fn publish(&self, channel: &str, event: &str, data: Value) -> bool {
        self.emit(ProviderEvent::message(channel, event, data))
    }

    /// Simulates the remote side dropping the session
    pub fn drop_connection(&self, reason: &str) -> bool {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(ProviderEvent::disconnected(reason))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        lock(&self.calls).clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.count(|call| matches!(call, ProviderCall::Connect(_)))
    }

    pub fn subscribe_calls(&self, channel: &str) -> usize {
        self.count(|call| matches!(call, ProviderCall::Subscribe(name) if name == channel))
    }

    pub fn unsubscribe_calls(&self, channel: &str) -> usize {
        self.count(|call| matches!(call, ProviderCall::Unsubscribe(name) if name == channel))
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn count(&self, predicate: impl Fn(&ProviderCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: ProviderCall) {
        lock(&self.calls).push(call);
    }

    fn next_behavior(&self) -> ConnectBehavior {
        lock(&self.scripted)
            .pop_front()
            .or_else(|| lock(&self.default_behavior).clone())
            .unwrap_or(ConnectBehavior::Accept)
    }
}

#[async_trait]
impl Provider for InMemoryProvider {
    fn bind(&self, sink: EventSink) {
        *lock(&self.sink) = Some(sink);
    }

    async fn connect(&self, config: &ProviderConfig) -> Result<()> {
        self.record(ProviderCall::Connect(config.clone()));

        match self.next_behavior() {
            ConnectBehavior::Accept => {
                self.connected.store(true, Ordering::SeqCst);
                let n = self.sockets.fetch_add(1, Ordering::SeqCst) + 1;
                self.emit(ProviderEvent::Connected {
                    socket_id: format!("{}.{}", n, n * 7),
                });
            }
            ConnectBehavior::Reject { kind, message } => {
                self.emit(ProviderEvent::Error {
                    kind,
                    message,
                    code: None,
                });
            }
            ConnectBehavior::Fail(message) => return Err(RealtimeError::Connection(message)),
            ConnectBehavior::Silent => {}
            ConnectBehavior::Hang => std::future::pending::<()>().await,
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.record(ProviderCall::Subscribe(channel.to_string()));
        if !self.is_connected() {
            return Err(RealtimeError::NotConnected);
        }

        let presence = match ChannelKind::from_name(channel) {
            ChannelKind::Presence => Some(
                lock(&self.presence)
                    .get(channel)
                    .cloned()
                    .unwrap_or_default(),
            ),
            _ => None,
        };
        self.emit(ProviderEvent::SubscriptionSucceeded {
            channel: channel.to_string(),
            presence,
        });
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.record(ProviderCall::Unsubscribe(channel.to_string()));
        Ok(())
    }

    async fn send(&self, channel: &str, event: &str, data: &Value) -> Result<usize> {
        self.record(ProviderCall::Send {
            channel: channel.to_string(),
            event: event.to_string(),
            data: data.clone(),
        });
        if !self.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        let frame = serde_json::json!({ "event": event, "channel": channel, "data": data });
        Ok(serde_json::to_string(&frame)?.len())
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(ProviderCall::Disconnect);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
