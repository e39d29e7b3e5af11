//! Region index.
//!
//! Tracks a version counter and the member keys of every region. Bumping the
//! version is what invalidates a region; the member sets only exist so stale
//! entries can be reclaimed without a full scan.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::region";

/// Version counter and member keys of a single region.
#[derive(Debug, Default)]
pub(crate) struct RegionState {
    version: AtomicU64,
    members: Mutex<HashSet<String>>,
}

impl RegionState {
    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn bump(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn add_member(&self, key: &str) {
        mutex_lock(&self.members, SOURCE, "add_member").insert(key.to_string());
    }

    fn take_members(&self) -> HashSet<String> {
        std::mem::take(&mut *mutex_lock(&self.members, SOURCE, "take_members"))
    }

    fn retain_members(&self, mut keep: impl FnMut(&str) -> bool) {
        mutex_lock(&self.members, SOURCE, "retain_members").retain(|key| keep(key));
    }

    fn member_count(&self) -> usize {
        mutex_lock(&self.members, SOURCE, "member_count").len()
    }
}

/// Region membership of an entry, snapshotted when its computation started.
#[derive(Debug, Clone)]
pub(crate) struct RegionTag {
    pub(crate) name: Arc<str>,
    pub(crate) version: u64,
    state: Arc<RegionState>,
}

impl RegionTag {
    /// False once the region has been invalidated after the snapshot.
    pub(crate) fn is_current(&self) -> bool {
        self.state.version() == self.version
    }

    pub(crate) fn state(&self) -> &RegionState {
        &self.state
    }
}

/// Maps region names to their state.
#[derive(Default)]
pub(crate) struct RegionIndex {
    regions: DashMap<Arc<str>, Arc<RegionState>>,
}

impl RegionIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current version of `name`, creating the region on first use.
    pub(crate) fn tag(&self, name: &str) -> RegionTag {
        let (name, state) = match self.regions.get(name) {
            Some(found) => (Arc::clone(found.key()), Arc::clone(found.value())),
            None => {
                let entry = self
                    .regions
                    .entry(Arc::from(name))
                    .or_insert_with(|| Arc::new(RegionState::default()));
                (Arc::clone(entry.key()), Arc::clone(entry.value()))
            }
        };
        RegionTag {
            name,
            version: state.version(),
            state,
        }
    }

    /// Bump the version of `name` and hand back its members for reclamation.
    ///
    /// Unknown regions hold no entries and no in-flight computations, so there
    /// is nothing to invalidate.
    pub(crate) fn invalidate(&self, name: &str) -> Option<(u64, HashSet<String>)> {
        let state = self.regions.get(name).map(|found| Arc::clone(found.value()))?;
        let version = state.bump();
        Some((version, state.take_members()))
    }

    pub(crate) fn version(&self, name: &str) -> u64 {
        self.regions
            .get(name)
            .map_or(0, |found| found.value().version())
    }

    /// Drop member keys for which `keep` returns false, in every region.
    pub(crate) fn prune_members(&self, mut keep: impl FnMut(&str) -> bool) {
        let states: Vec<Arc<RegionState>> = self
            .regions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for state in states {
            state.retain_members(&mut keep);
        }
    }

    /// Forget regions with no members that no entry or computation still refers to.
    ///
    /// A forgotten region starts again from version 0 when it is next used.
    pub(crate) fn prune_unused(&self) -> usize {
        let before = self.regions.len();
        self.regions
            .retain(|_, state| Arc::strong_count(state) > 1 || state.member_count() > 0);
        before.saturating_sub(self.regions.len())
    }

    pub(crate) fn member_count(&self, name: &str) -> usize {
        self.regions
            .get(name)
            .map_or(0, |found| found.value().member_count())
    }

    pub(crate) fn len(&self) -> usize {
        self.regions.len()
    }
}
