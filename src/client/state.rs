use crate::infrastructure::TaskManager;

/// Consolidated mutable state for RealtimeClient
pub struct ClientState {
    /// Bearer token from the last `connect()`, reused by reconnection
    pub auth_token: Option<String>,

    /// Background task manager (event pump, reconnection, stats ticker)
    pub task_manager: TaskManager,

    /// Whether the disconnect was manual (prevents auto-reconnect)
    pub was_manual_disconnect: bool,
}

impl ClientState {
    pub fn new() -> Self {
        Self {
            auth_token: None,
            task_manager: TaskManager::new(),
            was_manual_disconnect: false,
        }
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}
