//! Live Metrics Example
//!
//! Connects to a Pusher-compatible cluster and prints dashboard metric
//! updates until Ctrl+C.
//!
//! Configuration comes from the environment (or a `.env` file):
//!
//! ```text
//! REALTIME_KEY=your-app-key
//! REALTIME_CLUSTER=eu
//! REALTIME_AUTH_ENDPOINT=https://api.example.com/broadcasting/auth
//! REALTIME_TOKEN=user-jwt            # optional, sent as a bearer token
//! ```
//!
//! Without `REALTIME_KEY` the client reports `disabled` and the example exits.

use dashboard_realtime::{ConnectionState, RealtimeClient, RealtimeClientOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dashboard_realtime=info".into()),
        )
        .init();

    let options = RealtimeClientOptions {
        stats_interval_ms: Some(30_000),
        ..RealtimeClientOptions::from_env()
    };
    let client = RealtimeClient::new(options);

    client
        .on_state_change(|state| println!("🔌 connection: {}", state))
        .detach();

    let token = std::env::var("REALTIME_TOKEN").ok();
    client.connect(token.as_deref()).await?;

    if client.state() == ConnectionState::Disabled {
        println!("Realtime is not configured (set REALTIME_KEY); nothing to do.");
        return Ok(());
    }

    client
        .subscribe("dashboard-overview", |msg| {
            println!("📈 {} -> {}", msg.event, msg.data);
        })
        .await;

    client
        .subscribe_filtered(
            "class-metrics",
            |msg| msg.data.get("alert").and_then(|a| a.as_bool()) == Some(true),
            |msg| println!("🚨 alert on {}: {}", msg.channel, msg.data),
        )
        .await;

    println!("Listening for updates, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    let stats = client.get_stats();
    println!(
        "📊 {} messages received ({} bytes), {} reconnects",
        stats.messages_received, stats.bytes_received, stats.reconnect_count
    );

    client.teardown().await;
    Ok(())
}
