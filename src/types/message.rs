use serde::{Deserialize, Serialize};

/// An inbound event delivered on a channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelMessage {
    pub channel: String,
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Size of the message on the wire, in bytes
    #[serde(skip)]
    pub size: usize,
}

impl ChannelMessage {
    pub fn new(
        channel: impl Into<String>,
        event: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        let channel = channel.into();
        let event = event.into();
        let size = channel.len() + event.len() + data.to_string().len();
        Self {
            channel,
            event,
            data,
            user_id: None,
            size,
        }
    }

    /// Overrides the estimated size with the raw frame length
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}
