use crate::channel::{Member, PresenceSnapshot};
use crate::types::constants::FATAL_ERROR_CODES;
use crate::types::message::ChannelMessage;
use std::time::Duration;

/// Classification of errors reported by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    /// Credentials or key rejected
    Auth,
    /// Socket dropped, host unreachable, etc.
    Network,
    /// Unexpected frame or server-side protocol failure
    Protocol,
}

impl ProviderErrorKind {
    /// Classify a protocol error code
    pub fn from_code(code: Option<u16>) -> Self {
        match code {
            Some(code) if FATAL_ERROR_CODES.contains(&code) => Self::Auth,
            Some(code) if (4100..4300).contains(&code) => Self::Network,
            Some(_) => Self::Protocol,
            None => Self::Network,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Auth => "auth",
            Self::Network => "network",
            Self::Protocol => "protocol",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything a provider reports back to the client
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// Session established
    Connected { socket_id: String },

    /// Session-level error (before or during a connection)
    Error {
        kind: ProviderErrorKind,
        message: String,
        code: Option<u16>,
    },

    /// Session closed by the remote side or the network
    Disconnected { reason: String, code: Option<u16> },

    /// Application event on a channel
    Message(ChannelMessage),

    /// Provider-level channel subscription confirmed
    SubscriptionSucceeded {
        channel: String,
        presence: Option<PresenceSnapshot>,
    },

    /// Provider-level channel subscription refused
    SubscriptionError { channel: String, message: String },

    /// Presence member joined
    MemberAdded { channel: String, member: Member },

    /// Presence member left
    MemberRemoved { channel: String, user_id: String },

    /// Round-trip time of the last ping
    Latency(Duration),
}

impl ProviderEvent {
    pub fn error(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
            code: None,
        }
    }

    pub fn message(
        channel: impl Into<String>,
        event: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self::Message(ChannelMessage::new(channel, event, data))
    }

    /// Short name used in logs
    pub fn name(&self) -> &str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Error { .. } => "error",
            Self::Disconnected { .. } => "disconnected",
            Self::Message(_) => "message",
            Self::SubscriptionSucceeded { .. } => "subscription_succeeded",
            Self::SubscriptionError { .. } => "subscription_error",
            Self::MemberAdded { .. } => "member_added",
            Self::MemberRemoved { .. } => "member_removed",
            Self::Latency(_) => "latency",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_from_code() {
        assert_eq!(ProviderErrorKind::from_code(Some(4001)), ProviderErrorKind::Auth);
        assert_eq!(ProviderErrorKind::from_code(Some(4009)), ProviderErrorKind::Auth);
        assert_eq!(
            ProviderErrorKind::from_code(Some(4100)),
            ProviderErrorKind::Network
        );
        assert_eq!(
            ProviderErrorKind::from_code(Some(4201)),
            ProviderErrorKind::Network
        );
        assert_eq!(
            ProviderErrorKind::from_code(Some(4301)),
            ProviderErrorKind::Protocol
        );
        assert_eq!(ProviderErrorKind::from_code(None), ProviderErrorKind::Network);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(
            ProviderEvent::Connected {
                socket_id: "1.2".to_string()
            }
            .name(),
            "connected"
        );
        assert_eq!(ProviderEvent::disconnected("bye").name(), "disconnected");
        assert_eq!(
            ProviderEvent::message("metrics", "tick", serde_json::Value::Null).name(),
            "message"
        );
    }
}
