//! # Dashboard Realtime
//!
//! Realtime connection and subscription layer for live dashboards, speaking
//! the Pusher Channels protocol (v7) over a WebSocket.
//!
//! One [`RealtimeClient`] is constructed at the application root and shared
//! by every widget. It owns the provider session, exposes an observable
//! [`ConnectionState`], multiplexes many logical subscriptions over one
//! provider subscription per channel, and reconnects with exponential backoff
//! before falling back to polling.
//!
//! ## Example
//!
//! ```no_run
//! use dashboard_realtime::{ConnectionState, RealtimeClient, RealtimeClientOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RealtimeClient::new(RealtimeClientOptions::from_env());
//!
//!     client
//!         .on_state_change(|state| {
//!             if state == ConnectionState::PollingFallback {
//!                 println!("live updates lost, polling instead");
//!             }
//!         })
//!         .detach();
//!
//!     client.connect(None).await?;
//!     client
//!         .subscribe_filtered(
//!             "dashboard-overview",
//!             |msg| msg.event == "metrics-updated",
//!             |msg| println!("{}", msg.data),
//!         )
//!         .await;
//!     Ok(())
//! }
//! ```
//!
//! Tests and offline development can swap the WebSocket provider for an
//! [`InMemoryProvider`] through [`RealtimeClient::with_provider`].

pub mod channel;
pub mod client;
pub mod infrastructure;
pub mod messaging;
pub mod provider;
pub mod types;
pub mod websocket;

pub use channel::{
    ChannelHandle, ChannelKind, ChannelStatus, Disposer, Member, Members, SubscriptionId,
};
pub use client::{
    ConnectionState, ConnectionStats, DebugInfo, RealtimeClient, RealtimeClientBuilder,
    RealtimeClientOptions,
};
pub use messaging::{ProviderErrorKind, ProviderEvent};
pub use provider::{ConnectBehavior, InMemoryProvider, Provider, ProviderCall, ProviderConfig};
pub use types::{ChannelMessage, RealtimeError, Result};
pub use websocket::WebSocketProvider;
