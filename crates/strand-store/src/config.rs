//! Persistence configuration.

use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Retries of a transient read failure.
    pub retry_count: u32,
    pub retry_delay: Duration,
    /// Snapshot-boundary hops of scrollback for streams whose cached range
    /// has nothing to render.
    pub max_scrollback_hops: usize,
    /// Quiet period before queued access-time updates are written.
    pub scratch_debounce: Duration,
}

impl PersistenceConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retry_count,
            delay: self.retry_delay,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            retry_count: 2,
            retry_delay: Duration::from_millis(100),
            max_scrollback_hops: 3,
            scratch_debounce: Duration::from_millis(1000),
        }
    }
}
