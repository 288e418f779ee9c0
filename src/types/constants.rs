/// Pusher protocol event strings (magic strings layer)
pub mod pusher_events {
    pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
    pub const ERROR: &str = "pusher:error";
    pub const PING: &str = "pusher:ping";
    pub const PONG: &str = "pusher:pong";
    pub const SUBSCRIBE: &str = "pusher:subscribe";
    pub const UNSUBSCRIBE: &str = "pusher:unsubscribe";
    pub const SUBSCRIPTION_ERROR: &str = "pusher:subscription_error";
    pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
    pub const MEMBER_ADDED: &str = "pusher_internal:member_added";
    pub const MEMBER_REMOVED: &str = "pusher_internal:member_removed";
}

/// Presence events as seen by subscribers
pub mod presence_events {
    pub const MEMBER_ADDED: &str = "pusher:member_added";
    pub const MEMBER_REMOVED: &str = "pusher:member_removed";
}

/// Channel name prefixes
pub const PRIVATE_PREFIX: &str = "private-";
pub const PRESENCE_PREFIX: &str = "presence-";

/// Events triggered by clients must carry this prefix
pub const CLIENT_EVENT_PREFIX: &str = "client-";

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 7;

/// Client name reported in the socket URL
pub const CLIENT_NAME: &str = "dashboard-realtime";

/// Default cluster
pub const DEFAULT_CLUSTER: &str = "mt1";

/// Default connect timeout (milliseconds)
pub const DEFAULT_TIMEOUT: u64 = 10_000;

/// Default activity timeout before a ping is sent (milliseconds)
pub const DEFAULT_ACTIVITY_TIMEOUT: u64 = 120_000;

/// Default time to wait for a pong (milliseconds)
pub const DEFAULT_PONG_TIMEOUT: u64 = 30_000;

/// Reconnection policy
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_BASE_DELAY: u64 = 1_000;
pub const DEFAULT_RECONNECT_MAX_DELAY: u64 = 30_000;

/// Close codes in this range are not worth retrying
pub const FATAL_ERROR_CODES: std::ops::Range<u16> = 4000..4100;
