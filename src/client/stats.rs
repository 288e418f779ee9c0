use super::connection::ConnectionState;
use crate::channel::ChannelStatus;
use crate::infrastructure::lock;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters exposed for UI badges. Every field is always present.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub messages_received: u64,
    pub messages_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub connected_at: Option<DateTime<Utc>>,
    pub reconnect_count: u64,
}

/// Per-channel line of the debug panel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDebug {
    pub name: String,
    pub status: ChannelStatus,
    pub references: usize,
    pub members: Option<usize>,
}

/// Reconnection bookkeeping for diagnostic panels
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub state: ConnectionState,
    pub last_error: Option<String>,
    pub connection_attempts: u64,
    /// Attempts made by the current reconnection run
    pub reconnect_attempt: u32,
    pub max_reconnect_attempts: u32,
    pub fallback_to_polling: bool,
    pub socket_id: Option<String>,
    pub last_latency_ms: Option<u64>,
    pub subscription_count: usize,
    pub channels: Vec<ChannelDebug>,
    pub stats: ConnectionStats,
}

#[derive(Debug, Default)]
struct Session {
    connected_at: Option<DateTime<Utc>>,
    socket_id: Option<String>,
    last_error: Option<String>,
    last_latency: Option<Duration>,
    reconnect_attempt: u32,
    fallback_to_polling: bool,
}

/// Collects counters from the dispatcher and the connection manager
#[derive(Debug, Default)]
pub struct StatsReporter {
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    reconnect_count: AtomicU64,
    connection_attempts: AtomicU64,
    session: Mutex<Session>,
}

impl StatsReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_connect_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self, attempt: u32) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
        lock(&self.session).reconnect_attempt = attempt;
    }

    pub fn record_connected(&self, socket_id: String) {
        let mut session = lock(&self.session);
        session.connected_at = Some(Utc::now());
        session.socket_id = Some(socket_id);
        session.reconnect_attempt = 0;
        session.fallback_to_polling = false;
    }

    pub fn record_disconnected(&self) {
        let mut session = lock(&self.session);
        session.connected_at = None;
        session.socket_id = None;
    }

    pub fn record_error(&self, message: impl Into<String>) {
        lock(&self.session).last_error = Some(message.into());
    }

    pub fn record_latency(&self, latency: Duration) {
        lock(&self.session).last_latency = Some(latency);
    }

    pub fn set_fallback_to_polling(&self, fallback: bool) {
        lock(&self.session).fallback_to_polling = fallback;
    }

    /// Current counters
    pub fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            connected_at: lock(&self.session).connected_at,
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
        }
    }

    /// Debug view; the caller supplies what the reporter does not own
    pub fn debug_info(
        &self,
        state: ConnectionState,
        max_reconnect_attempts: u32,
        subscription_count: usize,
        channels: Vec<ChannelDebug>,
    ) -> DebugInfo {
        let stats = self.snapshot();
        let session = lock(&self.session);
        DebugInfo {
            state,
            last_error: session.last_error.clone(),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            reconnect_attempt: session.reconnect_attempt,
            max_reconnect_attempts,
            fallback_to_polling: session.fallback_to_polling,
            socket_id: session.socket_id.clone(),
            last_latency_ms: session.last_latency.map(|d| d.as_millis() as u64),
            subscription_count,
            channels,
            stats,
        }
    }

    /// Zeroes everything (full re-initialization only)
    pub fn reset(&self) {
        for counter in [
            &self.messages_received,
            &self.messages_sent,
            &self.bytes_received,
            &self.bytes_sent,
            &self.reconnect_count,
            &self.connection_attempts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *lock(&self.session) = Session::default();
    }
}
