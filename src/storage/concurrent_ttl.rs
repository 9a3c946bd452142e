//! Concurrent TTL Cleaner
//!
//! Background task that periodically removes expired keys from MemoryStore.
//! Reads already treat expired entries as absent; the sweep only reclaims
//! memory.

use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};

use super::MemoryStore;

/// Background TTL cleanup task for MemoryStore
pub struct ConcurrentTtlCleaner {
    store: MemoryStore,
    interval: Duration,
}

impl ConcurrentTtlCleaner {
    pub fn new(store: MemoryStore, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run the cleaner (should be spawned as a task)
    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        info!(interval = ?self.interval, "TTL cleaner started");

        loop {
            ticker.tick().await;
            let removed = self.store.cleanup_expired();
            if removed > 0 {
                debug!(removed = removed, "Cleaned up expired keys");
            }
        }
    }

    /// Spawn the cleaner as a background task
    pub fn spawn(store: MemoryStore, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(Self::new(store, interval).run())
    }
}
