//! Concurrent cache store.
//!
//! Keys map to a single [`Slot`], so a key is either served from a ready entry,
//! joined onto the pending computation, or claimed by exactly one caller who
//! runs the factory. Regions are invalidated by bumping a version counter.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, gauge, histogram};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::CacheConfig;
use super::entry::{CacheEntry, ErasedValue, Outcome, PendingComputation, Slot, Waiter};
use super::error::CacheError;
use super::region::{RegionIndex, RegionTag};

pub(crate) const METRIC_HIT: &str = "pipecache_hit_total";
pub(crate) const METRIC_MISS: &str = "pipecache_miss_total";
pub(crate) const METRIC_JOIN: &str = "pipecache_join_total";
pub(crate) const METRIC_FACTORY_ERROR: &str = "pipecache_factory_error_total";
pub(crate) const METRIC_INVALIDATE: &str = "pipecache_invalidate_total";
pub(crate) const METRIC_REGION_INVALIDATE: &str = "pipecache_region_invalidate_total";
pub(crate) const METRIC_RECLAIMED: &str = "pipecache_reclaimed_total";
pub(crate) const METRIC_ENTRIES: &str = "pipecache_entries";
pub(crate) const METRIC_FACTORY_MS: &str = "pipecache_factory_ms";

pub(crate) struct StoreInner {
    pub(crate) config: CacheConfig,
    slots: DashMap<String, Slot>,
    regions: RegionIndex,
    next_flight: AtomicU64,
}

/// Shared handle to the cache store.
///
/// Cloning is cheap; all clones operate on the same entries.
#[derive(Clone)]
pub struct CacheStore {
    pub(crate) inner: Arc<StoreInner>,
}

enum Claim {
    Hit(ErasedValue),
    Join(Waiter),
    Lead(Lead),
}

struct Lead {
    id: u64,
    sender: oneshot::Sender<Outcome>,
    waiter: Waiter,
}

impl CacheStore {
    /// Create an empty store with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                slots: DashMap::new(),
                regions: RegionIndex::new(),
                next_flight: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Return the live value for `key`, or compute it with `factory`.
    ///
    /// Concurrent callers for the same key share one `factory` invocation and
    /// all observe its result. A failed computation leaves nothing behind, so
    /// the next call runs the factory again. `region` names the group the entry
    /// belongs to (empty means none); `ttl` of `None` never expires by time.
    ///
    /// The factory's future runs on its own task: dropping every caller does
    /// not cancel it, and its result is still installed for later readers.
    pub async fn get_or_create<V, E, F, Fut>(
        &self,
        key: &str,
        region: Option<&str>,
        ttl: Option<Duration>,
        factory: F,
    ) -> Result<V, E>
    where
        V: Clone + Send + Sync + 'static,
        E: From<CacheError> + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let region = region
            .filter(|name| !name.is_empty())
            .map(|name| self.inner.regions.tag(name));

        let waiter = match self.claim(key, region.is_some()) {
            Claim::Hit(value) => {
                counter!(METRIC_HIT).increment(1);
                debug!(cache = "store", outcome = "hit", key);
                return downcast_value(key, &value);
            }
            Claim::Join(waiter) => {
                drop(factory);
                counter!(METRIC_JOIN).increment(1);
                debug!(cache = "store", outcome = "join", key);
                waiter
            }
            Claim::Lead(lead) => {
                counter!(METRIC_MISS).increment(1);
                debug!(
                    cache = "store",
                    outcome = "miss",
                    key,
                    region = region.as_ref().map(|tag| &*tag.name),
                    "computing value"
                );
                let Lead { id, sender, waiter } = lead;
                // Armed before `factory` runs, so a synchronous panic frees the slot too.
                let flight = FlightGuard::new(self.clone(), key, id);
                let computation = factory();
                Self::spawn_computation(flight, region, ttl, sender, computation);
                waiter
            }
        };

        match waiter.wait().await {
            Outcome::Value(value) => downcast_value(key, &value),
            Outcome::Failed(error) => match error.downcast_ref::<E>() {
                Some(error) => Err(error.clone()),
                None => Err(CacheError::type_mismatch::<E>(key).into()),
            },
            Outcome::Aborted => Err(CacheError::aborted(key).into()),
        }
    }

    /// Decide, atomically for `key`, whether this caller hits, joins or leads.
    fn claim(&self, key: &str, has_region: bool) -> Claim {
        let now = Instant::now();
        let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);

        match self.inner.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                match occupied.get() {
                    Slot::Ready(entry) if entry.is_live(now) => {
                        return Claim::Hit(Arc::clone(&entry.value));
                    }
                    Slot::Pending(pending) => return Claim::Join(pending.join()),
                    Slot::Ready(entry) => {
                        debug!(
                            cache = "store",
                            key,
                            has_region,
                            region_version = entry.region_version(),
                            "replacing stale entry"
                        );
                    }
                }
                let (pending, sender) = PendingComputation::start(id);
                let waiter = pending.leader();
                occupied.insert(Slot::Pending(pending));
                Claim::Lead(Lead { id, sender, waiter })
            }
            Entry::Vacant(vacant) => {
                let (pending, sender) = PendingComputation::start(id);
                let waiter = pending.leader();
                vacant.insert(Slot::Pending(pending));
                Claim::Lead(Lead { id, sender, waiter })
            }
        }
    }

    fn spawn_computation<V, E, Fut>(
        flight: FlightGuard,
        region: Option<RegionTag>,
        ttl: Option<Duration>,
        sender: oneshot::Sender<Outcome>,
        computation: Fut,
    ) where
        V: Send + Sync + 'static,
        E: Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        tokio::spawn(async move {
            let started_at = Instant::now();
            let result = computation.await;
            histogram!(METRIC_FACTORY_MS)
                .record(started_at.elapsed().as_secs_f64() * 1000.0);

            let FlightGuard { store, key, id, .. } = &flight;
            let outcome = match result {
                Ok(value) => {
                    let value: ErasedValue = Arc::new(value);
                    store.install(key, *id, Arc::clone(&value), region, ttl);
                    Outcome::Value(value)
                }
                Err(error) => {
                    counter!(METRIC_FACTORY_ERROR).increment(1);
                    debug!(cache = "store", outcome = "factory_error", key = %key);
                    store.abandon(key, *id);
                    Outcome::Failed(Arc::new(error))
                }
            };
            flight.disarm();

            // Waiters that gave up dropped their receivers; nothing to report.
            let _ = sender.send(outcome);
        });
    }

    /// Replace the pending slot `id` with a ready entry.
    fn install(
        &self,
        key: &str,
        id: u64,
        value: ErasedValue,
        region: Option<RegionTag>,
        ttl: Option<Duration>,
    ) {
        let now = Instant::now();
        let expires_at = ttl.and_then(|ttl| now.checked_add(ttl));
        let member_of = region.clone();

        let installed = match self.inner.slots.get_mut(key) {
            Some(mut slot) if slot.is_pending(id) => {
                *slot = Slot::Ready(CacheEntry::new(value, region, expires_at));
                true
            }
            _ => false,
        };

        if !installed {
            debug!(cache = "store", key, "pending slot gone, result not installed");
            return;
        }
        if let Some(tag) = member_of {
            tag.state().add_member(key);
            if !tag.is_current() {
                debug!(
                    cache = "store",
                    key,
                    region = &*tag.name,
                    "region invalidated during computation, entry installed stale"
                );
            }
        }
        self.record_len();
    }

    /// Drop the pending slot `id` after a failed computation.
    fn abandon(&self, key: &str, id: u64) {
        self.inner.slots.remove_if(key, |_, slot| slot.is_pending(id));
    }

    /// Remove the live entry for `key`, if any.
    ///
    /// An in-flight computation for the key is not affected and will still
    /// install its result.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self
            .inner
            .slots
            .remove_if(key, |_, slot| matches!(slot, Slot::Ready(_)));

        match removed {
            Some((_, Slot::Ready(entry))) => {
                counter!(METRIC_INVALIDATE).increment(1);
                debug!(
                    cache = "store",
                    key,
                    age_ms = u64::try_from(entry.created_at.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "entry invalidated"
                );
                self.record_len();
                true
            }
            _ => false,
        }
    }

    /// Invalidate every entry of `region` by bumping its version.
    ///
    /// Constant time with respect to the number of entries in the region;
    /// memory held by the stale entries is reclaimed afterwards.
    pub fn invalidate_region(&self, region: &str) {
        counter!(METRIC_REGION_INVALIDATE).increment(1);
        let Some((version, members)) = self.inner.regions.invalidate(region) else {
            debug!(cache = "store", region, "invalidated unknown region");
            return;
        };

        info!(
            cache = "store",
            region,
            version,
            members = members.len(),
            "region invalidated"
        );

        if members.is_empty() || !self.inner.config.reclaim_on_region_invalidate {
            return;
        }
        // Without a runtime the sweeper picks the stale entries up later.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = self.clone();
            handle.spawn(async move {
                store.reclaim(members);
            });
        }
    }

    fn reclaim(&self, keys: impl IntoIterator<Item = String>) -> usize {
        let now = Instant::now();
        let reclaimed = keys
            .into_iter()
            .filter(|key| {
                self.inner
                    .slots
                    .remove_if(key, |_, slot| slot.is_stale(now))
                    .is_some()
            })
            .count();
        if reclaimed > 0 {
            counter!(METRIC_RECLAIMED).increment(reclaimed as u64);
            self.record_len();
        }
        reclaimed
    }

    /// Remove expired and region-stale entries. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut reclaimed = 0_usize;
        self.inner.slots.retain(|_, slot| {
            let stale = slot.is_stale(now);
            if stale {
                reclaimed += 1;
            }
            !stale
        });

        let slots = &self.inner.slots;
        self.inner
            .regions
            .prune_members(|key| matches!(slots.get(key).as_deref(), Some(Slot::Ready(_))));
        let pruned_regions = self.inner.regions.prune_unused();
        if pruned_regions > 0 {
            debug!(cache = "store", pruned_regions, "forgot unused regions");
        }

        if reclaimed > 0 {
            counter!(METRIC_RECLAIMED).increment(reclaimed as u64);
        }
        self.record_len();
        reclaimed
    }

    /// Drop every ready entry.
    ///
    /// Pending computations are dropped from the map too; they still finish
    /// and resolve their waiters but no longer install a result.
    pub fn clear(&self) {
        self.inner.slots.clear();
        self.record_len();
        info!(cache = "store", "cache cleared");
    }

    /// True when a live entry exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        matches!(
            self.inner.slots.get(key).as_deref(),
            Some(Slot::Ready(entry)) if entry.is_live(now)
        )
    }

    /// Number of ready entries, including ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of computations currently in flight.
    pub fn pending_len(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Pending(_)))
            .count()
    }

    /// Current version of `region`; 0 for regions never seen or already pruned by a sweep.
    pub fn region_version(&self, region: &str) -> u64 {
        self.inner.regions.version(region)
    }

    /// Number of regions currently tracked.
    pub fn region_count(&self) -> usize {
        self.inner.regions.len()
    }

    /// Keys tracked for `region` that have not been reclaimed yet.
    pub fn region_member_count(&self, region: &str) -> usize {
        self.inner.regions.member_count(region)
    }

    fn record_len(&self) {
        gauge!(METRIC_ENTRIES).set(self.inner.slots.len() as f64);
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("slots", &self.inner.slots.len())
            .field("regions", &self.inner.regions.len())
            .finish()
    }
}

fn downcast_value<V, E>(key: &str, value: &ErasedValue) -> Result<V, E>
where
    V: Clone + 'static,
    E: From<CacheError>,
{
    value
        .downcast_ref::<V>()
        .cloned()
        .ok_or_else(|| CacheError::type_mismatch::<V>(key).into())
}

/// Removes the pending slot if the factory or its task unwinds before resolving.
struct FlightGuard {
    store: CacheStore,
    key: String,
    id: u64,
    armed: bool,
}

impl FlightGuard {
    fn new(store: CacheStore, key: &str, id: u64) -> Self {
        Self {
            store,
            key: key.to_string(),
            id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.armed {
            counter!(METRIC_FACTORY_ERROR).increment(1);
            warn!(cache = "store", key = %self.key, "computation panicked, pending slot dropped");
            self.store.abandon(&self.key, self.id);
        }
    }
}
