use dashboard_realtime::channel::PresenceSnapshot;
use dashboard_realtime::{
    ChannelMessage, ChannelStatus, ConnectBehavior, ConnectionState, InMemoryProvider, Member,
    ProviderCall, ProviderErrorKind, ProviderEvent, RealtimeClient, RealtimeClientOptions,
    RealtimeError,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn options() -> RealtimeClientOptions {
    RealtimeClientOptions {
        key: "test-key".to_string(),
        cluster: "eu".to_string(),
        ..Default::default()
    }
}

fn client_with(provider: &Arc<InMemoryProvider>) -> RealtimeClient {
    RealtimeClient::with_provider(options(), provider.clone())
}

/// Lets the event pump catch up
async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

async fn wait_for_state(client: &RealtimeClient, target: ConnectionState) {
    let mut rx = client.watch_state();
    tokio::time::timeout(Duration::from_secs(300), rx.wait_for(|state| *state == target))
        .await
        .expect("state not reached")
        .expect("state channel closed");
}

fn record_states(client: &RealtimeClient) -> Arc<Mutex<Vec<ConnectionState>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    client
        .on_state_change(move |state| sink.lock().unwrap().push(state))
        .detach();
    seen
}

#[tokio::test]
async fn one_provider_subscription_per_channel() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);
    client.connect(None).await.unwrap();

    let a = client.subscribe("dashboard-overview", |_| {}).await;
    let b = client.subscribe("dashboard-overview", |_| {}).await;
    let c = client
        .subscribe_filtered("dashboard-overview", |_| true, |_| {})
        .await;
    assert_ne!(a, b);
    assert_eq!(provider.subscribe_calls("dashboard-overview"), 1);

    client.unsubscribe(a).await;
    client.unsubscribe(b).await;
    assert_eq!(provider.unsubscribe_calls("dashboard-overview"), 0);

    client.unsubscribe(c).await;
    assert_eq!(provider.unsubscribe_calls("dashboard-overview"), 1);
    assert!(client.channel("dashboard-overview").is_none());

    // Unknown or repeated ids are no-ops
    client.unsubscribe(c).await;
    assert_eq!(provider.unsubscribe_calls("dashboard-overview"), 1);

    // A fresh subscriber opens a fresh provider subscription
    client.subscribe("dashboard-overview", |_| {}).await;
    assert_eq!(provider.subscribe_calls("dashboard-overview"), 2);
}

#[tokio::test]
async fn subscribe_to_channel_returns_shared_handle() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);
    client.connect(None).await.unwrap();

    let first = client.subscribe_to_channel("private-class-7").await;
    let second = client.subscribe_to_channel("private-class-7").await;

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(provider.subscribe_calls("private-class-7"), 1);
    eventually(|| first.is_subscribed()).await;

    client.release_channel("private-class-7").await;
    assert_eq!(provider.unsubscribe_calls("private-class-7"), 0);
    client.release_channel("private-class-7").await;
    assert_eq!(provider.unsubscribe_calls("private-class-7"), 1);
    assert_eq!(first.status(), ChannelStatus::Closed);
}

#[tokio::test]
async fn connect_resolves_after_provider_confirms() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);
    let states = record_states(&client);

    client.connect(Some("valid-token")).await.unwrap();

    assert!(client.is_connected());
    assert_eq!(
        *states.lock().unwrap(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
    assert!(client.get_stats().connected_at.is_some());
}

#[tokio::test]
async fn connect_rejects_with_provider_message() {
    let provider = Arc::new(InMemoryProvider::with_behavior(ConnectBehavior::reject(
        ProviderErrorKind::Auth,
        "invalid token",
    )));
    let client = client_with(&provider);

    let error = client.connect(Some("expired")).await.unwrap_err();
    assert!(matches!(error, RealtimeError::Auth(_)));
    assert!(error.to_string().contains("invalid token"));
    assert_eq!(client.state(), ConnectionState::Error);

    let debug = client.get_debug_info();
    assert!(debug.last_error.unwrap().contains("invalid token"));
    assert_eq!(debug.connection_attempts, 1);
}

#[tokio::test]
async fn disconnect_notifies_observers() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);
    client.connect(None).await.unwrap();
    let states = record_states(&client);

    client.disconnect(Some("user logged out")).await;
    client.disconnect(None).await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(*states.lock().unwrap(), vec![ConnectionState::Disconnected]);
    assert!(!provider.is_connected());
}

#[tokio::test]
async fn disposed_observer_stops_receiving() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let disposer = client.on_state_change(move |state| sink.lock().unwrap().push(state));

    client.connect(None).await.unwrap();
    drop(disposer);
    client.disconnect(None).await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
}

#[tokio::test]
async fn filter_selects_messages() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);
    client.connect(None).await.unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    client
        .subscribe_filtered(
            "metrics",
            |msg: &ChannelMessage| msg.data["type"] == "allowed",
            move |msg: &ChannelMessage| sink.lock().unwrap().push(msg.data.clone()),
        )
        .await;

    provider.publish("metrics", "update", json!({"type": "allowed"}));
    provider.publish("metrics", "update", json!({"type": "blocked"}));
    eventually(|| client.get_stats().messages_received == 2).await;

    assert_eq!(*received.lock().unwrap(), vec![json!({"type": "allowed"})]);
}

#[tokio::test]
async fn event_subscriptions_only_see_their_event() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);
    client.connect(None).await.unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    client
        .subscribe_event("grades", "grade-posted", move |msg| {
            sink.lock().unwrap().push(msg.event.clone())
        })
        .await;

    provider.publish("grades", "grade-posted", json!({"student": 4}));
    provider.publish("grades", "grade-deleted", json!({"student": 4}));
    eventually(|| client.get_stats().messages_received == 2).await;

    assert_eq!(*received.lock().unwrap(), vec!["grade-posted"]);
}

#[tokio::test]
async fn handler_panic_does_not_affect_other_subscribers() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);
    client.connect(None).await.unwrap();

    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);
    client
        .subscribe("metrics", |_| panic!("widget bug"))
        .await;
    client
        .subscribe("metrics", move |_| *counter.lock().unwrap() += 1)
        .await;

    provider.publish("metrics", "tick", json!({}));
    provider.publish("metrics", "tick", json!({}));
    eventually(|| *calls.lock().unwrap() == 2).await;
    assert!(client.is_connected());
}

#[tokio::test]
async fn stats_have_every_key_before_connecting() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);

    let stats = serde_json::to_value(client.get_stats()).unwrap();
    let keys: Vec<&str> = stats
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    for key in [
        "messagesReceived",
        "messagesSent",
        "bytesReceived",
        "bytesSent",
        "connectedAt",
        "reconnectCount",
    ] {
        assert!(keys.contains(&key), "missing {}", key);
    }

    let debug = client.get_debug_info();
    assert_eq!(debug.state, ConnectionState::Uninitialized);
    assert!(!debug.fallback_to_polling);
    assert_eq!(debug.max_reconnect_attempts, 5);
}

#[tokio::test]
async fn missing_key_disables_realtime() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = RealtimeClient::with_provider(RealtimeClientOptions::default(), provider.clone());

    client.connect(Some("token")).await.unwrap();

    assert_eq!(client.state(), ConnectionState::Disabled);
    assert_eq!(provider.connect_calls(), 0);

    // Disabled is terminal
    client.connect(None).await.unwrap();
    client.disconnect(None).await;
    assert_eq!(client.state(), ConnectionState::Disabled);
}

#[tokio::test]
async fn disconnect_settles_pending_connect() {
    let provider = Arc::new(InMemoryProvider::with_behavior(ConnectBehavior::Silent));
    let client = client_with(&provider);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.connect(None).await }
    });
    eventually(|| client.state() == ConnectionState::Connecting).await;

    client.disconnect(None).await;

    let result = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("connect left pending")
        .unwrap();
    assert!(matches!(result, Err(RealtimeError::Cancelled)));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_a_stalled_handshake() {
    let provider = Arc::new(InMemoryProvider::with_behavior(ConnectBehavior::Hang));
    let client = RealtimeClient::with_provider(
        RealtimeClientOptions {
            timeout_ms: 200,
            ..options()
        },
        provider.clone(),
    );

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.connect(None).await }
    });
    eventually(|| client.state() == ConnectionState::Connecting).await;

    client.disconnect(None).await;

    let result = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("connect left pending")
        .unwrap();
    assert!(matches!(result, Err(RealtimeError::Cancelled)));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn stalled_handshake_times_out() {
    let provider = Arc::new(InMemoryProvider::with_behavior(ConnectBehavior::Hang));
    let client = RealtimeClient::with_provider(
        RealtimeClientOptions {
            timeout_ms: 200,
            ..options()
        },
        provider.clone(),
    );

    let result = client.connect(None).await;
    assert!(matches!(result, Err(RealtimeError::Timeout)));
    assert_eq!(client.state(), ConnectionState::Error);
    assert!(provider.calls().contains(&ProviderCall::Disconnect));
}

#[tokio::test(start_paused = true)]
async fn exhausted_reconnection_falls_back_to_polling() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);
    let states = record_states(&client);
    client.connect(None).await.unwrap();

    provider.set_behavior(ConnectBehavior::reject(
        ProviderErrorKind::Network,
        "host unreachable",
    ));
    provider.drop_connection("network lost");
    wait_for_state(&client, ConnectionState::PollingFallback).await;

    let states = states.lock().unwrap().clone();
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::PollingFallback,
        ]
    );
    assert!(
        !states
            .windows(2)
            .any(|pair| pair == [ConnectionState::Connected, ConnectionState::Connecting])
    );

    // One initial connect plus five reconnection attempts
    assert_eq!(provider.connect_calls(), 6);
    assert_eq!(client.get_stats().reconnect_count, 5);
    let debug = client.get_debug_info();
    assert!(debug.fallback_to_polling);
    assert!(debug.last_error.unwrap().contains("host unreachable"));

    // A later explicit connect leaves the fallback
    provider.set_behavior(ConnectBehavior::Accept);
    client.connect(None).await.unwrap();
    assert!(client.is_connected());
    assert!(!client.get_debug_info().fallback_to_polling);
}

#[tokio::test(start_paused = true)]
async fn reconnection_resubscribes_channels() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);
    client.connect(None).await.unwrap();
    client.subscribe("metrics", |_| {}).await;
    let handle = client.channel("metrics").unwrap();
    eventually(|| handle.is_subscribed()).await;

    provider.push_behavior(ConnectBehavior::reject(ProviderErrorKind::Network, "flaky"));
    provider.drop_connection("network lost");
    wait_for_state(&client, ConnectionState::Reconnecting).await;
    wait_for_state(&client, ConnectionState::Connected).await;

    eventually(|| provider.subscribe_calls("metrics") == 2).await;
    eventually(|| handle.is_subscribed()).await;
    assert_eq!(client.get_stats().reconnect_count, 2);
}

#[tokio::test(start_paused = true)]
async fn reconnect_delays_double() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);
    client.connect(None).await.unwrap();

    provider.set_behavior(ConnectBehavior::Fail("host unreachable".to_string()));
    provider.drop_connection("network lost");
    wait_for_state(&client, ConnectionState::Reconnecting).await;
    let lost_at = tokio::time::Instant::now();

    // Attempts after 1s, 2s, 4s and 8s of backoff
    for (at_ms, calls) in [
        (990, 1),
        (1_010, 2),
        (2_990, 2),
        (3_010, 3),
        (6_990, 3),
        (7_010, 4),
        (14_990, 4),
        (15_010, 5),
    ] {
        tokio::time::sleep_until(lost_at + Duration::from_millis(at_ms)).await;
        assert_eq!(provider.connect_calls(), calls, "connect calls at {}ms", at_ms);
    }
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_reconnecting_clears_backoff() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);
    client.connect(None).await.unwrap();

    provider.drop_connection("network lost");
    wait_for_state(&client, ConnectionState::Reconnecting).await;
    client.disconnect(None).await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(provider.connect_calls(), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.get_stats().reconnect_count, 0);
}

#[tokio::test]
async fn fatal_close_code_stops_reconnection() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);
    client.connect(None).await.unwrap();

    provider.emit(ProviderEvent::Disconnected {
        reason: "Application disabled".to_string(),
        code: Some(4003),
    });
    eventually(|| client.state() == ConnectionState::Disconnected).await;
    assert_eq!(provider.connect_calls(), 1);
}

#[tokio::test]
async fn manual_disconnect_does_not_reconnect() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);
    client.connect(None).await.unwrap();
    client.disconnect(None).await;

    // A late disconnect from the provider is ignored
    provider.drop_connection("socket closed");
    tokio::task::yield_now().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(provider.connect_calls(), 1);
}

#[tokio::test]
async fn presence_members_are_tracked() {
    let provider = Arc::new(InMemoryProvider::new());
    provider.set_presence(
        "presence-class-7",
        PresenceSnapshot {
            me: Some(Member::new("teacher-1", json!({"name": "Ms. Rivera"}))),
            members: HashMap::from([
                ("teacher-1".to_string(), json!({"name": "Ms. Rivera"})),
                ("student-4".to_string(), json!({"name": "Sam"})),
            ]),
        },
    );
    let client = client_with(&provider);
    client.connect(None).await.unwrap();

    let joined = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&joined);
    client
        .subscribe_event("presence-class-7", "pusher:member_added", move |msg| {
            sink.lock().unwrap().push(msg.user_id.clone())
        })
        .await;

    let handle = client.channel("presence-class-7").unwrap();
    eventually(|| handle.member_count() == Some(2)).await;
    assert_eq!(handle.me().map(|me| me.id), Some("teacher-1".to_string()));

    provider.emit(ProviderEvent::MemberAdded {
        channel: "presence-class-7".to_string(),
        member: Member::new("student-9", json!({"name": "Alex"})),
    });
    eventually(|| handle.member_count() == Some(3)).await;
    eventually(|| joined.lock().unwrap().len() == 1).await;
    assert_eq!(joined.lock().unwrap()[0].as_deref(), Some("student-9"));

    provider.emit(ProviderEvent::MemberRemoved {
        channel: "presence-class-7".to_string(),
        user_id: "student-4".to_string(),
    });
    eventually(|| handle.member_count() == Some(2)).await;

    let members = handle.members().unwrap();
    assert!(members.get("student-4").is_none());
    assert!(members.get("student-9").is_some());
}

#[tokio::test]
async fn dropped_binding_tears_down_channel() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);
    client.connect(None).await.unwrap();

    let handle = client.subscribe_to_channel("private-grades").await;
    let received = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&received);
    let binding = handle
        .bind("grade-posted", move |_| *counter.lock().unwrap() += 1)
        .unwrap();
    client.release_channel("private-grades").await;
    assert_eq!(provider.unsubscribe_calls("private-grades"), 0);

    provider.publish("private-grades", "grade-posted", json!({"grade": "A"}));
    eventually(|| *received.lock().unwrap() == 1).await;

    drop(binding);
    eventually(|| provider.unsubscribe_calls("private-grades") == 1).await;
    assert!(client.channel("private-grades").is_none());
}

#[tokio::test]
async fn reopened_channel_keeps_its_provider_subscription() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);
    client.connect(None).await.unwrap();

    let handle = client.subscribe_to_channel("metrics").await;
    eventually(|| handle.is_subscribed()).await;
    let binding = handle.bind("tick", |_: &ChannelMessage| {}).unwrap();
    client.release_channel("metrics").await;

    // Teardown is queued, then the channel is reopened before the pump runs it
    drop(binding);
    client.subscribe("metrics", |_| {}).await;
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }

    assert_eq!(provider.unsubscribe_calls("metrics"), 0);
    assert!(matches!(
        provider.calls().last(),
        Some(ProviderCall::Subscribe(name)) if name == "metrics"
    ));
    let reopened = client.channel("metrics").unwrap();
    assert!(!Arc::ptr_eq(&reopened, &handle));
    assert_eq!(reopened.reference_count(), 1);
}

#[tokio::test]
async fn teardown_releases_everything() {
    let provider = Arc::new(InMemoryProvider::new());
    let client = client_with(&provider);
    client.connect(None).await.unwrap();
    client.subscribe("metrics", |_| {}).await;
    client.subscribe("presence-class-7", |_| {}).await;

    client.teardown().await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.channels().is_empty());
    assert_eq!(client.get_debug_info().subscription_count, 0);
}
