use std::collections::HashMap;
use tokio::task::JoinHandle;

/// Manages named background tasks with proper lifecycle handling
pub struct TaskManager {
    handles: HashMap<&'static str, JoinHandle<()>>,
}

impl TaskManager {
    /// Create a new empty task manager
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
        }
    }

    /// Spawn a task under `name`, aborting any previous task with that name
    pub fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        if let Some(previous) = self.handles.insert(name, handle) {
            previous.abort();
        }
    }

    /// Abort one task
    pub fn abort(&mut self, name: &str) {
        if let Some(handle) = self.handles.remove(name) {
            handle.abort();
        }
    }

    /// Abort all tracked tasks and wait for them to finish
    pub async fn shutdown(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
            // Ignore errors from aborted tasks
            let _ = handle.await;
        }
    }

    /// Abort all tasks without waiting
    pub fn abort_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}
