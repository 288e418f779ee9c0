// Infrastructure module - background services and utilities
pub mod heartbeat;
pub mod http;
pub mod task_manager;
pub mod timer;

pub use heartbeat::{Activity, HeartbeatManager};
pub use http::{ChannelAuth, ChannelAuthorizer};
pub use task_manager::TaskManager;
pub use timer::Backoff;

use std::sync::{Mutex, MutexGuard};

/// Locks a std mutex, recovering the data if a panicking holder poisoned it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
