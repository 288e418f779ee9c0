//! Pub/sub provider abstraction.
//!
//! The client never talks to a vendor SDK directly. It drives a [`Provider`]
//! and listens to the [`ProviderEvent`]s the provider pushes into the sink
//! handed to [`Provider::bind`].

pub mod memory;

pub use memory::{ConnectBehavior, InMemoryProvider, ProviderCall};

use crate::messaging::ProviderEvent;
use crate::types::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// Where providers report connection, channel and message events
pub type EventSink = mpsc::UnboundedSender<ProviderEvent>;

/// Session configuration handed to the provider on every connect
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderConfig {
    pub key: String,
    pub cluster: String,
    /// Overrides the cluster host (self-hosted servers)
    pub host: Option<String>,
    pub auth_endpoint: Option<String>,
    pub force_tls: bool,
    /// Sent with channel authorization requests (`Authorization: Bearer <token>`)
    pub auth_headers: HashMap<String, String>,
    pub activity_timeout: Duration,
    pub pong_timeout: Duration,
}

impl ProviderConfig {
    /// The bearer token carried in the auth headers, if any
    pub fn bearer_token(&self) -> Option<&str> {
        self.auth_headers
            .get("Authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
    }
}

/// A hosted pub/sub service.
///
/// `connect` only initiates the session: success is reported later as
/// [`ProviderEvent::Connected`], failure as [`ProviderEvent::Error`] or
/// [`ProviderEvent::Disconnected`]. An `Err` from `connect` means the attempt
/// could not even be started.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Sets the sink that receives every provider event
    fn bind(&self, sink: EventSink);

    async fn connect(&self, config: &ProviderConfig) -> Result<()>;

    async fn subscribe(&self, channel: &str) -> Result<()>;

    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Publishes a client event; returns the number of bytes written
    async fn send(&self, channel: &str, event: &str, data: &Value) -> Result<usize>;

    async fn disconnect(&self) -> Result<()>;
}
