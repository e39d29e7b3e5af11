//! Background sweeper.
//!
//! Expiry and region invalidation are enforced on read; the sweeper only
//! bounds memory held by entries nobody reads again.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::store::{CacheStore, StoreInner};

impl CacheStore {
    /// Spawn a task that sweeps the store every `interval`.
    ///
    /// The task ends on its own once every handle to the store is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store: Weak<StoreInner> = Arc::downgrade(&self.inner);
        info!(
            cache = "sweeper",
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "starting cache sweeper"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip the first immediate tick
            loop {
                ticker.tick().await;
                let Some(inner) = store.upgrade() else {
                    debug!(cache = "sweeper", "store dropped, stopping sweeper");
                    return;
                };
                let reclaimed = CacheStore { inner }.sweep();
                if reclaimed > 0 {
                    info!(cache = "sweeper", reclaimed, "swept stale cache entries");
                }
            }
        })
    }

    /// Spawn the sweeper when the configuration enables it.
    pub fn spawn_configured_sweeper(&self) -> Option<JoinHandle<()>> {
        self.config()
            .sweep_interval()
            .map(|interval| self.spawn_sweeper(interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CacheError};

    #[tokio::test(start_paused = true)]
    async fn sweeper_reclaims_expired_entries() {
        let store = CacheStore::new(CacheConfig::default());
        let handle = store.spawn_sweeper(Duration::from_secs(10));

        let value: Result<u32, CacheError> = store
            .get_or_create("k", None, Some(Duration::from_secs(1)), || async { Ok(1) })
            .await;
        assert_eq!(value, Ok(1));
        assert_eq!(store.len(), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(store.len(), 0);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_when_store_dropped() {
        let store = CacheStore::new(CacheConfig::default());
        let handle = store.spawn_sweeper(Duration::from_secs(1));
        drop(store);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn configured_sweeper_respects_zero_interval() {
        let store = CacheStore::new(CacheConfig {
            sweep_interval_ms: 0,
            ..Default::default()
        });
        assert!(store.spawn_configured_sweeper().is_none());
    }
}
