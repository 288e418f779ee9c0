use super::factory::WsStream;
use super::protocol::PusherFrame;
use crate::types::{RealtimeError, Result};
use futures::SinkExt;
use futures::stream::SplitSink;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;

type WsWriter = SplitSink<WsStream, Message>;

/// Write half of the socket, shared by the provider and the heartbeat
pub struct SocketConnection {
    ws_write: RwLock<Option<WsWriter>>,
}

impl SocketConnection {
    pub fn new() -> Self {
        Self {
            ws_write: RwLock::new(None),
        }
    }

    /// Sets the WebSocket write sink (called after the handshake)
    pub async fn set_writer(&self, writer: WsWriter) {
        *self.ws_write.write().await = Some(writer);
    }

    pub async fn is_open(&self) -> bool {
        self.ws_write.read().await.is_some()
    }

    /// Serializes and writes a frame; returns the number of bytes written
    pub async fn send_frame(&self, frame: &PusherFrame) -> Result<usize> {
        let json = serde_json::to_string(frame)?;
        let len = json.len();

        let mut ws_guard = self.ws_write.write().await;
        let ws = ws_guard.as_mut().ok_or(RealtimeError::NotConnected)?;
        ws.send(Message::Text(json.into())).await?;

        tracing::trace!("Sent {} ({} bytes)", frame.event, len);
        Ok(len)
    }

    /// Closes the WebSocket connection gracefully
    pub async fn close(&self) -> Result<()> {
        let mut ws_guard = self.ws_write.write().await;
        if let Some(mut ws) = ws_guard.take() {
            ws.close().await?;
        }
        Ok(())
    }

    /// Drops the writer without a close handshake
    pub async fn clear_writer(&self) {
        *self.ws_write.write().await = None;
    }
}

impl Default for SocketConnection {
    fn default() -> Self {
        Self::new()
    }
}
