//! Offline Dashboard Example
//!
//! Runs the realtime layer against the in-memory provider: no network and no
//! credentials needed. Shows subscription sharing, filtering, a dropped
//! connection, and the fallback to polling once reconnection gives up.

use dashboard_realtime::{
    ConnectBehavior, InMemoryProvider, ProviderErrorKind, RealtimeClient, RealtimeClientOptions,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let provider = Arc::new(InMemoryProvider::new());
    let client = RealtimeClient::with_provider(
        RealtimeClientOptions {
            key: "offline".to_string(),
            max_reconnect_attempts: 3,
            reconnect_base_delay_ms: 200,
            ..Default::default()
        },
        provider.clone(),
    );

    client
        .on_state_change(|state| println!("🔌 {}", state))
        .detach();
    client.connect(None).await?;

    // Two widgets share one provider subscription
    let overview = client
        .subscribe("dashboard-overview", |msg| println!("🧩 overview widget: {}", msg.data))
        .await;
    client
        .subscribe_filtered(
            "dashboard-overview",
            |msg| msg.event == "enrollment-changed",
            |msg| println!("🎓 enrollment widget: {}", msg.data),
        )
        .await;
    println!(
        "provider subscribes for dashboard-overview: {}",
        provider.subscribe_calls("dashboard-overview")
    );

    provider.publish("dashboard-overview", "metrics-updated", json!({"active": 42}));
    provider.publish("dashboard-overview", "enrollment-changed", json!({"classes": 12}));
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.unsubscribe(overview).await;

    // Lose the connection and refuse every reconnection attempt
    provider.set_behavior(ConnectBehavior::reject(
        ProviderErrorKind::Network,
        "backend unreachable",
    ));
    provider.drop_connection("network lost");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let debug = client.get_debug_info();
    println!("{}", serde_json::to_string_pretty(&debug)?);

    client.teardown().await;
    Ok(())
}
