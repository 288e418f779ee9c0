use super::connection::SocketConnection;
use super::factory::{WebSocketFactory, WsStream};
use super::protocol::{self, Inbound, PusherFrame};
use crate::channel::{ChannelKind, Member};
use crate::infrastructure::{Activity, ChannelAuthorizer, HeartbeatManager, TaskManager, lock};
use crate::messaging::ProviderEvent;
use crate::provider::{EventSink, Provider, ProviderConfig};
use crate::types::{CLIENT_EVENT_PREFIX, RealtimeError, Result};
use async_trait::async_trait;
use futures::stream::{SplitStream, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;

/// Pusher Channels provider over a WebSocket.
///
/// Private and presence channels are authorized against the configured
/// auth endpoint before the subscribe frame is written.
pub struct WebSocketProvider {
    sink: Mutex<Option<EventSink>>,
    connection: Arc<SocketConnection>,
    activity: Arc<Activity>,
    socket_id: Arc<RwLock<Option<String>>>,
    config: RwLock<Option<ProviderConfig>>,
    /// Own member entry per presence channel, from the auth response
    presence_me: Arc<RwLock<HashMap<String, Member>>>,
    tasks: tokio::sync::Mutex<TaskManager>,
}

impl WebSocketProvider {
    pub fn new() -> Self {
        Self {
            sink: Mutex::new(None),
            connection: Arc::new(SocketConnection::new()),
            activity: Arc::new(Activity::new()),
            socket_id: Arc::new(RwLock::new(None)),
            config: RwLock::new(None),
            presence_me: Arc::new(RwLock::new(HashMap::new())),
            tasks: tokio::sync::Mutex::new(TaskManager::new()),
        }
    }

    /// Socket id assigned by the server for the current session
    pub async fn socket_id(&self) -> Option<String> {
        self.socket_id.read().await.clone()
    }

    fn sink(&self) -> Result<EventSink> {
        lock(&self.sink)
            .clone()
            .ok_or_else(|| RealtimeError::Connection("provider is not bound".to_string()))
    }

    async fn authorize(&self, channel: &str) -> Result<PusherFrame> {
        let socket_id = self
            .socket_id
            .read()
            .await
            .clone()
            .ok_or(RealtimeError::NotConnected)?;
        let config = self
            .config
            .read()
            .await
            .clone()
            .ok_or(RealtimeError::NotConnected)?;
        let endpoint = config.auth_endpoint.clone().ok_or_else(|| {
            RealtimeError::Auth(format!("No auth endpoint configured for '{}'", channel))
        })?;

        let auth = ChannelAuthorizer::new(endpoint, config.auth_headers.clone())
            .authorize(&socket_id, channel)
            .await?;

        if ChannelKind::from_name(channel) == ChannelKind::Presence
            && let Some(me) = auth
                .channel_data
                .as_deref()
                .and_then(protocol::parse_channel_data)
        {
            self.presence_me
                .write()
                .await
                .insert(channel.to_string(), me);
        }

        Ok(protocol::subscribe_frame(channel, Some(&auth)))
    }
}

impl Default for WebSocketProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for WebSocketProvider {
    fn bind(&self, sink: EventSink) {
        *lock(&self.sink) = Some(sink);
    }

    async fn connect(&self, config: &ProviderConfig) -> Result<()> {
        let sink = self.sink()?;

        // A new session replaces whatever was left of the previous one
        self.tasks.lock().await.abort_all();
        self.connection.clear_writer().await;
        *self.socket_id.write().await = None;
        self.presence_me.write().await.clear();
        *self.config.write().await = Some(config.clone());

        let url = protocol::socket_url(config)?;
        tracing::info!(
            "Connecting to {}",
            url.host_str().unwrap_or("realtime host")
        );

        let ws_stream = WebSocketFactory::create(url.as_str()).await?;
        let (write_half, read_half) = ws_stream.split();
        self.connection.set_writer(write_half).await;
        self.activity.touch().await;

        let reader = ReadLoop {
            read_half,
            sink: sink.clone(),
            connection: Arc::clone(&self.connection),
            activity: Arc::clone(&self.activity),
            socket_id: Arc::clone(&self.socket_id),
            presence_me: Arc::clone(&self.presence_me),
        };

        let heartbeat = HeartbeatManager::new(
            Arc::downgrade(&self.connection),
            Arc::clone(&self.activity),
            sink,
        )
        .with_interval(config.activity_timeout)
        .with_pong_timeout(config.pong_timeout);

        let mut tasks = self.tasks.lock().await;
        tasks.spawn("read", reader.run());
        tasks.spawn("heartbeat", heartbeat.run());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        let frame = if ChannelKind::from_name(channel).requires_auth() {
            self.authorize(channel).await?
        } else {
            protocol::subscribe_frame(channel, None)
        };
        self.connection.send_frame(&frame).await?;
        tracing::debug!("Subscribe sent for {}", channel);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.presence_me.write().await.remove(channel);
        self.connection
            .send_frame(&protocol::unsubscribe_frame(channel))
            .await?;
        Ok(())
    }

    async fn send(&self, channel: &str, event: &str, data: &Value) -> Result<usize> {
        if !event.starts_with(CLIENT_EVENT_PREFIX) {
            return Err(RealtimeError::Channel(format!(
                "client events must start with '{}', got '{}'",
                CLIENT_EVENT_PREFIX, event
            )));
        }
        if !ChannelKind::from_name(channel).requires_auth() {
            return Err(RealtimeError::Channel(format!(
                "client events need a private or presence channel, got '{}'",
                channel
            )));
        }
        let frame = PusherFrame::new(event, data.clone()).with_channel(channel);
        self.connection.send_frame(&frame).await
    }

    async fn disconnect(&self) -> Result<()> {
        self.tasks.lock().await.shutdown().await;
        *self.socket_id.write().await = None;
        self.connection.close().await
    }
}

struct ReadLoop {
    read_half: SplitStream<WsStream>,
    sink: EventSink,
    connection: Arc<SocketConnection>,
    activity: Arc<Activity>,
    socket_id: Arc<RwLock<Option<String>>>,
    presence_me: Arc<RwLock<HashMap<String, Member>>>,
}

impl ReadLoop {
    async fn run(mut self) {
        tracing::info!("Starting read task");
        let mut closed = None;

        while let Some(msg_result) = self.read_half.next().await {
            self.activity.touch().await;
            match msg_result {
                Ok(Message::Text(text)) => {
                    tracing::trace!("Received text message: {}", text);
                    match serde_json::from_str::<PusherFrame>(&text) {
                        Ok(frame) => self.handle_frame(frame, text.len()).await,
                        Err(e) => {
                            tracing::error!("Failed to parse frame: {} - Raw: {}", e, text);
                        }
                    }
                }
                Ok(Message::Close(frame)) => {
                    closed = Some(match frame {
                        Some(close_frame) => {
                            tracing::warn!(
                                "Server closed connection: code={:?}, reason='{}'",
                                close_frame.code,
                                close_frame.reason
                            );
                            ProviderEvent::Disconnected {
                                reason: close_frame.reason.to_string(),
                                code: Some(u16::from(close_frame.code)),
                            }
                        }
                        None => {
                            tracing::warn!("Server closed connection without close frame");
                            ProviderEvent::disconnected("closed by server")
                        }
                    });
                    break;
                }
                Ok(Message::Binary(data)) => {
                    tracing::warn!("Received unexpected binary message ({} bytes)", data.len());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("WebSocket read error: {}", e);
                    closed = Some(ProviderEvent::disconnected(e.to_string()));
                    break;
                }
            }
        }

        self.connection.clear_writer().await;
        *self.socket_id.write().await = None;
        let _ = self
            .sink
            .send(closed.unwrap_or_else(|| ProviderEvent::disconnected("stream ended")));
        tracing::info!("Read task finished");
    }

    async fn handle_frame(&self, frame: PusherFrame, raw_len: usize) {
        match protocol::interpret(frame, raw_len) {
            Inbound::Established { socket_id } => {
                tracing::info!("Connection established with socket id {}", socket_id);
                *self.socket_id.write().await = Some(socket_id.clone());
                self.emit(ProviderEvent::Connected { socket_id });
            }
            Inbound::Ping => {
                if let Err(e) = self.connection.send_frame(&protocol::pong_frame()).await {
                    tracing::warn!("Failed to answer ping: {}", e);
                }
            }
            Inbound::Pong => {
                if let Some(rtt) = self.activity.take_round_trip().await {
                    self.emit(ProviderEvent::Latency(rtt));
                }
            }
            Inbound::Event(ProviderEvent::SubscriptionSucceeded {
                channel,
                presence: Some(mut snapshot),
            }) => {
                snapshot.me = self.presence_me.read().await.get(&channel).cloned();
                self.emit(ProviderEvent::SubscriptionSucceeded {
                    channel,
                    presence: Some(snapshot),
                });
            }
            Inbound::Event(event) => self.emit(event),
            Inbound::Ignored(reason) => tracing::debug!("Ignored frame: {}", reason),
        }
    }

    fn emit(&self, event: ProviderEvent) {
        if self.sink.send(event).is_err() {
            tracing::debug!("Event sink closed");
        }
    }
}
