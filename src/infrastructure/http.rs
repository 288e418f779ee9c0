use crate::types::{RealtimeError, error::Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Signature returned by the auth endpoint for a private or presence channel
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelAuth {
    pub auth: String,
    /// JSON-encoded `{"user_id": ..., "user_info": ...}` for presence channels
    #[serde(default)]
    pub channel_data: Option<String>,
}

/// Obtains channel signatures from the application's auth endpoint
pub struct ChannelAuthorizer {
    endpoint: String,
    headers: HashMap<String, String>,
    http_client: reqwest::Client,
}

impl ChannelAuthorizer {
    pub fn new(endpoint: String, headers: HashMap<String, String>) -> Self {
        Self {
            endpoint,
            headers,
            http_client: reqwest::Client::new(),
        }
    }

    /// Requests a signature for `channel` on the socket `socket_id`
    pub async fn authorize(&self, socket_id: &str, channel: &str) -> Result<ChannelAuth> {
        let mut request = self
            .http_client
            .post(&self.endpoint)
            .form(&[("socket_id", socket_id), ("channel_name", channel)]);

        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RealtimeError::Auth(format!("Channel authorization failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(RealtimeError::Auth(format!(
                "Channel authorization for '{}' failed with status: {}",
                channel,
                response.status()
            )));
        }

        let auth = response.json::<ChannelAuth>().await?;
        tracing::debug!("Authorized channel {}", channel);
        Ok(auth)
    }
}
