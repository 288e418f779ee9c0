use crate::channel::presence::Members;
use serde::Serialize;

/// Provider-level subscription status of a channel handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    /// No provider subscription yet (created while offline, or lost on disconnect)
    Pending,
    Subscribing,
    Subscribed,
    Failed,
    /// Torn down; the handle is no longer tracked
    Closed,
}

impl ChannelStatus {
    /// Whether a provider-level subscription was requested and may be live
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Subscribing | Self::Subscribed)
    }
}

/// Mutable state for a ChannelHandle
#[derive(Debug)]
pub struct ChannelState {
    pub status: ChannelStatus,
    pub members: Option<Members>,
    pub last_error: Option<String>,
}

impl ChannelState {
    pub fn new(presence: bool) -> Self {
        Self {
            status: ChannelStatus::Pending,
            members: presence.then(Members::default),
            last_error: None,
        }
    }
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::new(false)
    }
}
