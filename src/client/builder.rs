use super::{ClientState, ConnectionManager, RealtimeClient, StatsReporter};
use crate::channel::SubscriptionRegistry;
use crate::infrastructure::Backoff;
use crate::messaging::Dispatcher;
use crate::provider::{Provider, ProviderConfig};
use crate::types::{
    DEFAULT_ACTIVITY_TIMEOUT, DEFAULT_CLUSTER, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_PONG_TIMEOUT, DEFAULT_RECONNECT_BASE_DELAY, DEFAULT_RECONNECT_MAX_DELAY,
    DEFAULT_TIMEOUT,
};
use crate::websocket::WebSocketProvider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};

/// Client configuration.
///
/// An empty `key` is not an error: the client reports
/// [`ConnectionState::Disabled`](super::ConnectionState::Disabled) instead of connecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeClientOptions {
    pub key: String,
    pub cluster: String,
    /// Overrides `ws-<cluster>.pusher.com` (self-hosted servers)
    pub host: Option<String>,
    pub auth_endpoint: Option<String>,
    pub force_tls: bool,
    /// Extra headers for channel authorization requests
    pub auth_headers: HashMap<String, String>,
    pub timeout_ms: u64,
    pub activity_timeout_ms: u64,
    pub pong_timeout_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// Logs connection stats at this period when set
    pub stats_interval_ms: Option<u64>,
}

impl Default for RealtimeClientOptions {
    fn default() -> Self {
        Self {
            key: String::new(),
            cluster: DEFAULT_CLUSTER.to_string(),
            host: None,
            auth_endpoint: None,
            force_tls: true,
            auth_headers: HashMap::new(),
            timeout_ms: DEFAULT_TIMEOUT,
            activity_timeout_ms: DEFAULT_ACTIVITY_TIMEOUT,
            pong_timeout_ms: DEFAULT_PONG_TIMEOUT,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY,
            reconnect_max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY,
            stats_interval_ms: None,
        }
    }
}

impl RealtimeClientOptions {
    /// Reads `REALTIME_*` variables on top of the defaults.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();

        if let Some(key) = lookup("REALTIME_KEY") {
            options.key = key;
        }
        if let Some(cluster) = lookup("REALTIME_CLUSTER").filter(|c| !c.is_empty()) {
            options.cluster = cluster;
        }
        options.host = lookup("REALTIME_HOST").filter(|h| !h.is_empty());
        options.auth_endpoint = lookup("REALTIME_AUTH_ENDPOINT").filter(|e| !e.is_empty());
        if let Some(force_tls) = parse_var(&lookup, "REALTIME_FORCE_TLS") {
            options.force_tls = force_tls;
        }
        if let Some(attempts) = parse_var(&lookup, "REALTIME_MAX_RECONNECT_ATTEMPTS") {
            options.max_reconnect_attempts = attempts;
        }

        options
    }

    /// Whether credentials are present at all
    pub fn is_configured(&self) -> bool {
        !self.key.trim().is_empty()
    }

    /// Session configuration for the provider, with the bearer token if any
    pub fn provider_config(&self, auth_token: Option<&str>) -> ProviderConfig {
        let mut auth_headers = self.auth_headers.clone();
        if let Some(token) = auth_token {
            auth_headers.insert("Authorization".to_string(), format!("Bearer {}", token));
        }

        ProviderConfig {
            key: self.key.clone(),
            cluster: self.cluster.clone(),
            host: self.host.clone(),
            auth_endpoint: self.auth_endpoint.clone(),
            force_tls: self.force_tls,
            auth_headers,
            activity_timeout: Duration::from_millis(self.activity_timeout_ms),
            pong_timeout: Duration::from_millis(self.pong_timeout_ms),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            self.max_reconnect_attempts,
            Duration::from_millis(self.reconnect_base_delay_ms),
            Duration::from_millis(self.reconnect_max_delay_ms),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={:?}", name, raw);
            None
        }
    }
}

/// Builder for RealtimeClient that handles initialization
pub struct RealtimeClientBuilder {
    options: RealtimeClientOptions,
    provider: Option<Arc<dyn Provider>>,
}

impl RealtimeClientBuilder {
    pub fn new(options: RealtimeClientOptions) -> Self {
        Self {
            options,
            provider: None,
        }
    }

    /// Uses `provider` instead of the WebSocket provider
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Build the client and spawn its event pump.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> RealtimeClient {
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(WebSocketProvider::new()));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        provider.bind(events_tx);

        let (registry, teardown_rx) = SubscriptionRegistry::new();
        let stats = Arc::new(StatsReporter::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), Arc::clone(&stats)));

        let client = RealtimeClient {
            options: Arc::new(Mutex::new(self.options)),
            connection: Arc::new(ConnectionManager::new()),
            registry,
            dispatcher,
            stats,
            provider,
            state: Arc::new(RwLock::new(ClientState::new())),
        };

        // Nobody else holds the freshly built state yet
        if let Ok(mut state) = client.state.try_write() {
            state
                .task_manager
                .spawn("pump", client.clone().run_pump(events_rx, teardown_rx));
        }

        client
    }
}
