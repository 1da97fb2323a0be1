//! Background TTL sweep
//!
//! Lazy expiry only reclaims entries somebody reads again. The sweeper
//! bounds the memory held by everything else.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::CacheStore;

/// Owned handle to a running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct SweepHandle {
    handle: JoinHandle<()>,
}

impl SweepHandle {
    /// Stop the sweeper
    pub fn cancel(self) {
        self.handle.abort();
    }

    /// Whether the task has stopped (cancelled, or the store was dropped)
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn a task that periodically purges expired entries.
///
/// The task only holds a weak reference, so it ends on its own once the
/// last `Arc<CacheStore>` is dropped. Must be called within a Tokio runtime.
pub fn spawn_sweeper(store: &Arc<CacheStore>, interval: Duration) -> SweepHandle {
    let store: Weak<CacheStore> = Arc::downgrade(store);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let Some(store) = store.upgrade() else {
                info!("Cache store dropped, sweeper stopping");
                break;
            };

            let removed = store.purge_expired();
            let stats = store.statistics();
            debug!(
                removed,
                entries = stats.total_entries(),
                hit_rate = format!("{:.1}%", stats.hit_rate()),
                "Cache sweep completed"
            );
        }
    });

    info!(interval_ms = interval.as_millis() as u64, "Cache sweeper started");
    SweepHandle { handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Namespace;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_expired_entries() {
        let store = Arc::new(CacheStore::with_defaults());
        store
            .set(&Namespace::Volatile, "k", &1, Some(Duration::from_millis(50)))
            .unwrap();

        let handle = spawn_sweeper(&store, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(store.len(&Namespace::Volatile).unwrap(), 0);
        assert_eq!(store.statistics().expirations, 1);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_when_store_dropped() {
        let store = Arc::new(CacheStore::with_defaults());
        let handle = spawn_sweeper(&store, Duration::from_millis(10));

        drop(store);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(handle.is_finished());
    }
}
