// Module declarations
mod builder;
mod connection;
mod realtime;
mod state;
mod stats;

// Public API exports
pub use builder::{RealtimeClientBuilder, RealtimeClientOptions};
pub use connection::{ConnectionManager, ConnectionState, StateObserver};
pub use realtime::RealtimeClient;
pub use state::ClientState;
pub use stats::{ChannelDebug, ConnectionStats, DebugInfo, StatsReporter};
