//! Runtime configuration for the query cache.

use std::time::Duration;

/// Configuration for a [`QueryClient`](crate::client::QueryClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long an entry with no subscribers is kept before its connection is
    /// closed and the entry evicted. Zero still defers disposal to the next
    /// turn of the runtime loop.
    pub keep_unused_data_for: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            keep_unused_data_for: Duration::ZERO,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the grace period applied when a subscription does not override it.
    pub fn with_keep_unused_data_for(mut self, grace: Duration) -> Self {
        self.keep_unused_data_for = grace;
        self
    }
}
