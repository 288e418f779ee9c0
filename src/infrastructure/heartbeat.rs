use crate::messaging::ProviderEvent;
use crate::provider::EventSink;
use crate::types::{DEFAULT_ACTIVITY_TIMEOUT, DEFAULT_PONG_TIMEOUT};
use crate::websocket::{SocketConnection, protocol};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{self, Instant};

/// Inbound traffic bookkeeping shared by the read loop and the heartbeat
#[derive(Debug)]
pub struct Activity {
    last_seen: RwLock<Instant>,
    ping_sent: RwLock<Option<Instant>>,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            last_seen: RwLock::new(Instant::now()),
            ping_sent: RwLock::new(None),
        }
    }

    /// Records inbound traffic
    pub async fn touch(&self) {
        *self.last_seen.write().await = Instant::now();
    }

    pub async fn idle_for(&self) -> Duration {
        self.last_seen.read().await.elapsed()
    }

    /// Whether anything arrived after `instant`
    pub async fn seen_since(&self, instant: Instant) -> bool {
        *self.last_seen.read().await > instant
    }

    async fn mark_ping(&self, at: Instant) {
        *self.ping_sent.write().await = Some(at);
    }

    /// Round trip of the outstanding ping, clearing it
    pub async fn take_round_trip(&self) -> Option<Duration> {
        self.ping_sent.write().await.take().map(|sent| sent.elapsed())
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Pings an idle socket and reports it dead when no answer arrives in time
pub struct HeartbeatManager {
    interval: Duration,
    pong_timeout: Duration,
    connection: Weak<SocketConnection>,
    activity: Arc<Activity>,
    sink: EventSink,
}

impl HeartbeatManager {
    pub fn new(
        connection: Weak<SocketConnection>,
        activity: Arc<Activity>,
        sink: EventSink,
    ) -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_ACTIVITY_TIMEOUT),
            pong_timeout: Duration::from_millis(DEFAULT_PONG_TIMEOUT),
            connection,
            activity,
            sink,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    /// Runs until the socket is gone or declared dead
    pub async fn run(self) {
        loop {
            let idle = self.activity.idle_for().await;
            if idle < self.interval {
                time::sleep(self.interval - idle).await;
                continue;
            }

            // Client dropped, exit heartbeat task
            let Some(connection) = self.connection.upgrade() else {
                break;
            };

            let sent_at = Instant::now();
            if let Err(e) = connection.send_frame(&protocol::ping_frame()).await {
                tracing::error!("[Heartbeat] Failed to send: {}", e);
                self.report_dead("heartbeat send failed");
                break;
            }
            self.activity.mark_ping(sent_at).await;
            tracing::debug!("Sent ping after {:?} idle", idle);
            drop(connection);

            time::sleep(self.pong_timeout).await;

            if !self.activity.seen_since(sent_at).await {
                tracing::warn!("[Heartbeat] Timeout detected, closing connection");
                if let Some(connection) = self.connection.upgrade() {
                    let _ = connection.close().await;
                }
                self.report_dead("pong timeout");
                break;
            }
        }
    }

    fn report_dead(&self, reason: &str) {
        let _ = self.sink.send(ProviderEvent::disconnected(reason));
    }
}
