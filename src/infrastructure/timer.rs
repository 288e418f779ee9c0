use std::time::Duration;
use tokio::time::sleep;

use crate::types::{
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY, DEFAULT_RECONNECT_MAX_DELAY,
};

/// Bounded exponential backoff for reconnection attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    attempts: u32,
    max_attempts: u32,
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            base,
            max,
        }
    }

    /// Delay before the next attempt, or `None` once the attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }

        let factor = 2u32.saturating_pow(self.attempts);
        let delay = self.base.saturating_mul(factor).min(self.max);

        self.attempts += 1;
        Some(delay)
    }

    /// Attempts handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sleep for the next delay; returns false once the attempts are exhausted
    pub async fn wait(&mut self) -> bool {
        match self.next_delay() {
            Some(delay) => {
                sleep(delay).await;
                true
            }
            None => false,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RECONNECT_ATTEMPTS,
            Duration::from_millis(DEFAULT_RECONNECT_BASE_DELAY),
            Duration::from_millis(DEFAULT_RECONNECT_MAX_DELAY),
        )
    }
}
