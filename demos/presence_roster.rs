//! Presence Roster Example
//!
//! Joins a presence channel and keeps a live roster of who is online.
//! Presence channels are authorized against `REALTIME_AUTH_ENDPOINT`, so a
//! bearer token (`REALTIME_TOKEN`) is usually required.
//!
//! ```text
//! cargo run --example presence_roster -- presence-class-7
//! ```

use dashboard_realtime::channel::ChannelHandle;
use dashboard_realtime::{RealtimeClient, RealtimeClientOptions};
use std::sync::Arc;
use std::time::Duration;

fn print_roster(channel: &ChannelHandle) {
    let Some(members) = channel.members() else {
        return;
    };
    println!("👥 {} online", members.count());
    for member in members.list() {
        let marker = if members.me().is_some_and(|me| me.id == member.id) {
            " (me)"
        } else {
            ""
        };
        println!("   - {}{} {}", member.id, marker, member.info);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let channel_name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "presence-dashboard".to_string());

    let client = RealtimeClient::new(RealtimeClientOptions::from_env());
    let token = std::env::var("REALTIME_TOKEN").ok();
    client.connect(token.as_deref()).await?;

    let channel: Arc<ChannelHandle> = client.subscribe_to_channel(&channel_name).await;

    let roster = Arc::clone(&channel);
    let _joins = channel.bind("pusher:member_added", move |msg| {
        println!("➕ {} joined", msg.user_id.as_deref().unwrap_or("?"));
        print_roster(&roster);
    })?;

    let roster = Arc::clone(&channel);
    let _leaves = channel.bind("pusher:member_removed", move |msg| {
        println!("➖ {} left", msg.user_id.as_deref().unwrap_or("?"));
        print_roster(&roster);
    })?;

    tokio::time::sleep(Duration::from_secs(2)).await;
    match channel.last_error() {
        Some(error) => println!("❌ subscription failed: {}", error),
        None => print_roster(&channel),
    }

    println!("Watching {}, press Ctrl+C to stop", channel_name);
    tokio::signal::ctrl_c().await?;

    client.release_channel(&channel_name).await;
    client.disconnect(Some("example finished")).await;
    Ok(())
}
