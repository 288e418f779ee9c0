use super::{
    ChannelDebug, ClientState, ConnectionManager, ConnectionState, ConnectionStats, DebugInfo,
    RealtimeClientBuilder, RealtimeClientOptions, StatsReporter,
};
use crate::channel::{
    ChannelHandle, Disposer, MessageFilter, MessageHandler, Released, SubscriptionId,
    SubscriptionRegistry,
};
use crate::infrastructure::lock;
use crate::messaging::{Dispatcher, ProviderErrorKind, ProviderEvent};
use crate::provider::{Provider, ProviderConfig};
use crate::types::{
    ChannelMessage, FATAL_ERROR_CODES, RealtimeError, Result, presence_events,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tokio::time;

/// The application-root handle to the realtime layer.
///
/// `RealtimeClient` owns the provider session, tracks the connection state,
/// multiplexes logical subscriptions over shared channel handles, and
/// dispatches inbound messages to their handlers. Clones share everything.
///
/// Unexpected disconnects trigger reconnection with exponential backoff; once
/// the attempts are exhausted the client settles in
/// [`ConnectionState::PollingFallback`] and callers refresh over REST.
///
/// # Example
///
/// ```no_run
/// use dashboard_realtime::{RealtimeClient, RealtimeClientOptions};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RealtimeClient::new(RealtimeClientOptions {
///     key: "app-key".to_string(),
///     cluster: "eu".to_string(),
///     auth_endpoint: Some("https://api.example.com/broadcasting/auth".to_string()),
///     ..Default::default()
/// });
///
/// client.connect(Some("user-jwt")).await?;
///
/// let id = client
///     .subscribe("dashboard-overview", |msg| println!("{}: {}", msg.event, msg.data))
///     .await;
///
/// // Later, when the widget unmounts
/// client.unsubscribe(id).await;
/// client.disconnect(None).await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RealtimeClient {
    pub(crate) options: Arc<Mutex<RealtimeClientOptions>>,
    pub(crate) connection: Arc<ConnectionManager>,
    pub(crate) registry: Arc<SubscriptionRegistry>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) stats: Arc<StatsReporter>,
    pub(crate) provider: Arc<dyn Provider>,

    // Consolidated mutable state
    pub(crate) state: Arc<RwLock<ClientState>>,
}

impl RealtimeClient {
    /// Creates a client backed by the WebSocket provider.
    ///
    /// No connection is made until [`connect()`](Self::connect). Must be
    /// called from within a tokio runtime.
    pub fn new(options: RealtimeClientOptions) -> Self {
        RealtimeClientBuilder::new(options).build()
    }

    /// Creates a client backed by a custom provider
    pub fn with_provider(options: RealtimeClientOptions, provider: Arc<dyn Provider>) -> Self {
        RealtimeClientBuilder::new(options)
            .provider(provider)
            .build()
    }

    pub fn options(&self) -> RealtimeClientOptions {
        lock(&self.options).clone()
    }

    async fn provider_config(&self) -> ProviderConfig {
        let token = self.state.read().await.auth_token.clone();
        self.options().provider_config(token.as_deref())
    }

    /// Starts the session and waits for the provider to confirm it.
    ///
    /// A missing key is not an error: the client moves to
    /// [`ConnectionState::Disabled`] and this returns `Ok(())`. Calling
    /// `connect` while already connected returns immediately; calling it
    /// while a connect is in flight waits for that one.
    ///
    /// # Errors
    ///
    /// - [`RealtimeError::Auth`] if the provider rejects the credentials
    /// - [`RealtimeError::Connection`] on network failure before the first connection
    /// - [`RealtimeError::Timeout`] if the provider does not answer in time
    /// - [`RealtimeError::Cancelled`] if [`disconnect()`](Self::disconnect) is called meanwhile
    pub async fn connect(&self, auth_token: Option<&str>) -> Result<()> {
        let options = self.options();

        match self.connection.state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Disabled => {
                tracing::debug!("Realtime is disabled; connect ignored");
                return Ok(());
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                let outcome = self.connection.register_waiter();
                return self.await_outcome(outcome, options.connect_timeout()).await;
            }
            _ => {}
        }

        {
            let mut state = self.state.write().await;
            state.was_manual_disconnect = false;
            if let Some(token) = auth_token {
                state.auth_token = Some(token.to_string());
            }
        }

        if !options.is_configured() {
            tracing::warn!("No realtime key configured; realtime features are disabled");
            if !self.connection.transition(ConnectionState::Disabled) {
                self.connection.transition(ConnectionState::Disconnected);
            }
            return Ok(());
        }

        let outcome = self.connection.register_waiter();
        self.connection.transition(ConnectionState::Connecting);
        self.stats.record_connect_attempt();
        tracing::info!("Connecting to realtime cluster {}", options.cluster);

        let result = self.start_session(outcome, options.connect_timeout()).await;
        // Failures the event pump has not already turned into a state change
        if let Err(e) = &result
            && self.connection.state() == ConnectionState::Connecting
        {
            tracing::error!("Connect failed: {}", e);
            self.stats.record_error(e.to_string());
            self.connection.transition(ConnectionState::Error);
            let timed_out = matches!(e, RealtimeError::Timeout);
            let message = e.to_string();
            self.connection.settle_waiters(|| {
                if timed_out {
                    Err(RealtimeError::Timeout)
                } else {
                    Err(RealtimeError::Connection(message.clone()))
                }
            });
        }
        result
    }

    /// Starts a provider session and waits for its outcome.
    ///
    /// The provider's own connect is raced against `outcome` and the deadline,
    /// so a stalled handshake can still be cancelled by `disconnect()` or time
    /// out. An abandoned attempt is dropped and the provider disconnected.
    async fn start_session(
        &self,
        mut outcome: oneshot::Receiver<Result<()>>,
        timeout: Duration,
    ) -> Result<()> {
        let config = self.provider_config().await;
        let deadline = time::sleep(timeout);
        tokio::pin!(deadline);

        tokio::select! {
            started = self.provider.connect(&config) => started?,
            settled = &mut outcome => {
                let result = settled.unwrap_or(Err(RealtimeError::Cancelled));
                if result.is_err() {
                    self.abandon_session("connect settled before the provider answered").await;
                }
                return result;
            }
            _ = &mut deadline => {
                self.abandon_session("provider connect timed out").await;
                return Err(RealtimeError::Timeout);
            }
        }

        tokio::select! {
            settled = outcome => settled.unwrap_or(Err(RealtimeError::Cancelled)),
            _ = deadline => {
                self.abandon_session("provider did not report a connection").await;
                Err(RealtimeError::Timeout)
            }
        }
    }

    async fn abandon_session(&self, reason: &str) {
        tracing::warn!("Abandoning connect attempt: {}", reason);
        if let Err(e) = self.provider.disconnect().await {
            tracing::debug!("Provider disconnect after abandoned connect failed: {}", e);
        }
    }

    async fn await_outcome(
        &self,
        outcome: oneshot::Receiver<Result<()>>,
        timeout: Duration,
    ) -> Result<()> {
        match time::timeout(timeout, outcome).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RealtimeError::Cancelled),
            Err(_) => Err(RealtimeError::Timeout),
        }
    }

    /// Ends the session. Idempotent.
    ///
    /// Stops reconnection and the stats ticker, settles any pending
    /// [`connect()`](Self::connect) with [`RealtimeError::Cancelled`], and
    /// notifies observers with [`ConnectionState::Disconnected`]. Subscriptions
    /// stay registered and are resubscribed on the next connect.
    pub async fn disconnect(&self, reason: Option<&str>) {
        let current = self.connection.state();
        if matches!(
            current,
            ConnectionState::Disconnected | ConnectionState::Uninitialized | ConnectionState::Disabled
        ) {
            tracing::debug!("Already {}; disconnect ignored", current);
            return;
        }

        tracing::info!(
            "Disconnecting from realtime ({})",
            reason.unwrap_or("client request")
        );

        {
            let mut state = self.state.write().await;
            state.was_manual_disconnect = true;
            state.task_manager.abort("reconnect");
            state.task_manager.abort("stats");
        }

        self.connection.transition(ConnectionState::Disconnected);
        self.connection.settle_waiters(|| Err(RealtimeError::Cancelled));

        if let Err(e) = self.provider.disconnect().await {
            tracing::warn!("Provider disconnect failed: {}", e);
        }
        self.stats.record_disconnected();
        for handle in self.registry.handles() {
            handle.mark_pending();
        }
        tracing::info!("Disconnected from realtime");
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Registers an observer called with the new state on every transition
    pub fn on_state_change<F>(&self, observer: F) -> Disposer
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.connection.on_state_change(observer)
    }

    /// Watch channel following the connection state
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch()
    }

    /// Registers a handler for every event on `channel`.
    ///
    /// Opens the provider subscription if this is the first subscriber of the
    /// channel; otherwise reuses the existing one. Subscriptions made while
    /// offline are opened once the client connects.
    pub async fn subscribe<F>(&self, channel: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        self.add_subscription(channel, None, None, Arc::new(handler))
            .await
    }

    /// Registers a handler that only sees messages accepted by `filter`.
    ///
    /// A filter that panics rejects the message.
    pub async fn subscribe_filtered<P, F>(
        &self,
        channel: &str,
        filter: P,
        handler: F,
    ) -> SubscriptionId
    where
        P: Fn(&ChannelMessage) -> bool + Send + Sync + 'static,
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        self.add_subscription(channel, None, Some(Arc::new(filter)), Arc::new(handler))
            .await
    }

    /// Registers a handler for one event name on `channel`
    pub async fn subscribe_event<F>(&self, channel: &str, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        self.add_subscription(channel, Some(event.to_string()), None, Arc::new(handler))
            .await
    }

    async fn add_subscription(
        &self,
        channel: &str,
        event: Option<String>,
        filter: Option<MessageFilter>,
        handler: MessageHandler,
    ) -> SubscriptionId {
        let (id, handle, created) = self.registry.add(channel, event, filter, handler);
        if created {
            tracing::debug!("Opened channel handle {}", channel);
        }
        self.ensure_subscribed(&handle).await;
        id
    }

    /// Removes a subscription. Unknown ids are ignored.
    pub async fn unsubscribe(&self, id: SubscriptionId) {
        match self.registry.remove(id) {
            Some(released) if released.closed => self.finish_release(released).await,
            Some(_) => {}
            None => tracing::debug!("Unsubscribe of unknown subscription {}", id),
        }
    }

    /// Direct access to the shared handle of `channel`.
    ///
    /// Repeated calls return the same handle and never open a second provider
    /// subscription. Each call takes a reference that
    /// [`release_channel()`](Self::release_channel) gives back.
    pub async fn subscribe_to_channel(&self, channel: &str) -> Arc<ChannelHandle> {
        let (handle, created) = self.registry.acquire(channel);
        if created {
            tracing::debug!("Opened channel handle {}", channel);
        }
        self.ensure_subscribed(&handle).await;
        handle
    }

    /// Gives back a reference taken by [`subscribe_to_channel()`](Self::subscribe_to_channel)
    pub async fn release_channel(&self, channel: &str) {
        if let Some(released) = self.registry.release(channel)
            && released.closed
        {
            self.finish_release(released).await;
        }
    }

    /// The live handle of `channel`, without taking a reference
    pub fn channel(&self, channel: &str) -> Option<Arc<ChannelHandle>> {
        self.registry.handle(channel)
    }

    /// All live channel handles
    pub fn channels(&self) -> Vec<Arc<ChannelHandle>> {
        self.registry.handles()
    }

    async fn ensure_subscribed(&self, handle: &Arc<ChannelHandle>) {
        if !self.connection.is_connected() || !handle.try_begin_subscribe() {
            return;
        }

        if let Err(e) = self.provider.subscribe(handle.name()).await {
            tracing::warn!("Failed to subscribe to {}: {}", handle.name(), e);
            handle.mark_failed(e.to_string());
        }
    }

    /// Tells the provider about a handle that just lost its last reference
    async fn finish_release(&self, released: Released) {
        let name = released.handle.name();
        tracing::debug!("Closing channel handle {}", name);

        if !released.previous.is_active() || !self.connection.is_connected() {
            return;
        }
        // Reopened after the release was queued; the provider subscription is the new handle's
        if let Some(current) = self.registry.handle(name)
            && !Arc::ptr_eq(&current, &released.handle)
        {
            tracing::debug!("Channel {} was reopened; keeping its subscription", name);
            return;
        }
        if let Err(e) = self.provider.unsubscribe(name).await {
            tracing::warn!("Failed to unsubscribe from {}: {}", name, e);
        }
    }

    /// Publishes a client event on `channel`.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] unless the client is connected, or the
    /// provider's error when the write fails.
    pub async fn send(&self, channel: &str, event: &str, data: Value) -> Result<()> {
        if !self.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        let bytes = self.provider.send(channel, event, &data).await?;
        self.stats.record_sent(bytes);
        tracing::debug!("Sent {} on {} ({} bytes)", event, channel, bytes);
        Ok(())
    }

    /// Current counters; every field is always present
    pub fn get_stats(&self) -> ConnectionStats {
        self.stats.snapshot()
    }

    /// Reconnection bookkeeping and per-channel status for diagnostics
    pub fn get_debug_info(&self) -> DebugInfo {
        let channels = self
            .registry
            .handles()
            .iter()
            .map(|handle| ChannelDebug {
                name: handle.name().to_string(),
                status: handle.status(),
                references: handle.reference_count(),
                members: handle.member_count(),
            })
            .collect();

        self.stats.debug_info(
            self.state(),
            self.options().max_reconnect_attempts,
            self.registry.subscription_count(),
            channels,
        )
    }

    /// Replaces the configuration and resets state and counters.
    ///
    /// This is the only way out of [`ConnectionState::Disabled`]. Subscriptions
    /// survive and are reopened on the next connect.
    pub async fn reinitialize(&self, options: RealtimeClientOptions) {
        self.disconnect(Some("reinitialize")).await;
        *lock(&self.options) = options;
        {
            let mut state = self.state.write().await;
            state.auth_token = None;
            state.was_manual_disconnect = false;
        }
        self.stats.reset();
        self.connection.reset();
        tracing::info!("Realtime client reinitialized");
    }

    /// Disconnects, drops every subscription and stops all background tasks.
    ///
    /// The client is unusable afterwards.
    pub async fn teardown(&self) {
        self.disconnect(Some("teardown")).await;
        let released = self.registry.clear();
        tracing::info!("Tearing down realtime client ({} channels)", released.len());
        let mut state = self.state.write().await;
        if !state.task_manager.is_empty() {
            tracing::debug!("Stopping {} background tasks", state.task_manager.len());
        }
        state.task_manager.shutdown().await;
    }

    pub(crate) async fn run_pump(
        self,
        mut events: mpsc::UnboundedReceiver<ProviderEvent>,
        mut teardowns: mpsc::UnboundedReceiver<Released>,
    ) {
        tracing::debug!("Starting event pump");
        loop {
            tokio::select! {
                Some(event) = events.recv() => self.handle_event(event).await,
                Some(released) = teardowns.recv() => self.finish_release(released).await,
                else => break,
            }
        }
        tracing::debug!("Event pump finished");
    }

    async fn handle_event(&self, event: ProviderEvent) {
        tracing::trace!("Provider event: {}", event.name());
        match event {
            ProviderEvent::Connected { socket_id } => self.on_connected(socket_id).await,
            ProviderEvent::Error {
                kind,
                message,
                code,
            } => self.on_error(kind, message, code),
            ProviderEvent::Disconnected { reason, code } => {
                self.on_disconnected(reason, code).await
            }
            ProviderEvent::Message(message) => {
                self.dispatcher.dispatch(&message);
            }
            ProviderEvent::SubscriptionSucceeded { channel, presence } => {
                let Some(handle) = self.registry.handle(&channel) else {
                    tracing::debug!("Subscription of released channel {} confirmed", channel);
                    return;
                };
                if let Some(changes) = handle.mark_subscribed(presence) {
                    tracing::debug!(
                        "{} members synced (+{} -{})",
                        channel,
                        changes.joins.len(),
                        changes.leaves.len()
                    );
                }
                tracing::info!("Subscribed to {}", channel);
            }
            ProviderEvent::SubscriptionError { channel, message } => {
                tracing::warn!("Subscription to {} refused: {}", channel, message);
                if let Some(handle) = self.registry.handle(&channel) {
                    handle.mark_failed(message);
                }
            }
            ProviderEvent::MemberAdded { channel, member } => {
                let Some(handle) = self.registry.handle(&channel) else {
                    return;
                };
                let data = serde_json::to_value(&member).unwrap_or(Value::Null);
                let user_id = member.id.clone();
                handle.add_member(member);
                self.dispatcher.dispatch(
                    &ChannelMessage::new(channel, presence_events::MEMBER_ADDED, data)
                        .with_user_id(user_id),
                );
            }
            ProviderEvent::MemberRemoved { channel, user_id } => {
                let Some(handle) = self.registry.handle(&channel) else {
                    return;
                };
                let data = match handle.remove_member(&user_id) {
                    Some(member) => serde_json::to_value(&member).unwrap_or(Value::Null),
                    None => serde_json::json!({ "user_id": user_id }),
                };
                self.dispatcher.dispatch(
                    &ChannelMessage::new(channel, presence_events::MEMBER_REMOVED, data)
                        .with_user_id(user_id),
                );
            }
            ProviderEvent::Latency(latency) => self.stats.record_latency(latency),
        }
    }

    async fn on_connected(&self, socket_id: String) {
        let previous = self.connection.state();
        if !matches!(
            previous,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        ) {
            tracing::debug!("Ignoring provider connect while {}", previous);
            return;
        }

        tracing::info!("Connected to realtime (socket {})", socket_id);
        self.stats.record_connected(socket_id);
        self.connection.transition(ConnectionState::Connected);

        for handle in self.registry.handles() {
            self.ensure_subscribed(&handle).await;
        }
        self.connection.settle_waiters(|| Ok(()));

        if let Some(period) = self.options().stats_interval_ms {
            let client = self.clone();
            self.state.write().await.task_manager.spawn(
                "stats",
                client.log_stats(Duration::from_millis(period.max(1))),
            );
        }
    }

    fn on_error(&self, kind: ProviderErrorKind, message: String, code: Option<u16>) {
        match code {
            Some(code) => tracing::error!("Provider {} error {}: {}", kind, code, message),
            None => tracing::error!("Provider {} error: {}", kind, message),
        }
        self.stats.record_error(format!("{}: {}", kind, message));

        let make_error = || match kind {
            ProviderErrorKind::Auth => RealtimeError::Auth(message.clone()),
            _ => RealtimeError::Connection(message.clone()),
        };

        match self.connection.state() {
            ConnectionState::Connecting => {
                self.connection.transition(ConnectionState::Error);
                self.connection.settle_waiters(|| Err(make_error()));
            }
            // The attempt failed; the reconnection loop decides what is next
            ConnectionState::Reconnecting => {
                self.connection.settle_waiters(|| Err(make_error()));
            }
            _ => {}
        }
    }

    async fn on_disconnected(&self, reason: String, code: Option<u16>) {
        self.stats.record_disconnected();
        for handle in self.registry.handles() {
            handle.mark_pending();
        }

        let state = self.connection.state();
        match state {
            ConnectionState::Connecting => {
                tracing::error!("Connection lost before it was established: {}", reason);
                self.stats.record_error(format!("disconnected: {}", reason));
                self.connection.transition(ConnectionState::Error);
                self.connection
                    .settle_waiters(|| Err(RealtimeError::Connection(reason.clone())));
            }
            ConnectionState::Reconnecting => {
                self.stats.record_error(format!("disconnected: {}", reason));
                self.connection
                    .settle_waiters(|| Err(RealtimeError::Connection(reason.clone())));
            }
            ConnectionState::Connected => {
                self.stats.record_error(format!("disconnected: {}", reason));
                let manual = self.state.read().await.was_manual_disconnect;
                if manual {
                    self.connection.transition(ConnectionState::Disconnected);
                    return;
                }

                if code.is_some_and(|code| FATAL_ERROR_CODES.contains(&code)) {
                    tracing::error!("Connection closed with fatal code {:?}: {}", code, reason);
                    self.connection.transition(ConnectionState::Disconnected);
                    return;
                }

                tracing::warn!("Connection lost ({}); reconnecting", reason);
                if self.connection.transition(ConnectionState::Reconnecting) {
                    let client = self.clone();
                    let mut state = self.state.write().await;
                    state.task_manager.abort("stats");
                    state.task_manager.spawn("reconnect", client.reconnect());
                }
            }
            _ => tracing::debug!("Provider disconnect while {}: {}", state, reason),
        }
    }

    async fn reconnect(self) {
        let options = self.options();
        let mut backoff = options.backoff();

        while backoff.wait().await {
            if self.connection.state() != ConnectionState::Reconnecting {
                return;
            }

            let attempt = backoff.attempts();
            tracing::info!(
                "Reconnection attempt {}/{}",
                attempt,
                backoff.max_attempts()
            );
            self.stats.record_reconnect_attempt(attempt);
            self.stats.record_connect_attempt();

            let outcome = self.connection.register_waiter();
            let result = self.start_session(outcome, options.connect_timeout()).await;

            match result {
                Ok(()) => {
                    tracing::info!("Reconnected after {} attempt(s)", attempt);
                    return;
                }
                Err(e) => {
                    tracing::warn!("Reconnection attempt {} failed: {}", attempt, e);
                    self.stats.record_error(e.to_string());
                }
            }
        }

        if self.connection.transition(ConnectionState::PollingFallback) {
            self.stats.set_fallback_to_polling(true);
            tracing::warn!(
                "Giving up after {} reconnection attempts; falling back to polling",
                backoff.attempts()
            );
            if let Err(e) = self.provider.disconnect().await {
                tracing::debug!("Provider disconnect failed: {}", e);
            }
        }
    }

    async fn log_stats(self, period: Duration) {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let stats = self.get_stats();
            tracing::info!(
                messages_received = stats.messages_received,
                messages_sent = stats.messages_sent,
                bytes_received = stats.bytes_received,
                bytes_sent = stats.bytes_sent,
                reconnect_count = stats.reconnect_count,
                "Realtime stats"
            );
        }
    }
}
