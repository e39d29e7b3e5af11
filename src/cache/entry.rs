//! Slot types held by the store.
//!
//! Every key maps to exactly one [`Slot`]: either a ready entry or a pending
//! computation, never both.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::region::RegionTag;

/// Type-erased value or error as stored in the cache.
pub(crate) type ErasedValue = Arc<dyn Any + Send + Sync>;

/// Result of one miss episode, delivered to every waiter.
#[derive(Clone)]
pub(crate) enum Outcome {
    Value(ErasedValue),
    Failed(ErasedValue),
    Aborted,
}

pub(crate) type Flight = Shared<BoxFuture<'static, Outcome>>;

/// A populated cache entry.
pub(crate) struct CacheEntry {
    pub(crate) value: ErasedValue,
    pub(crate) region: Option<RegionTag>,
    pub(crate) created_at: Instant,
    pub(crate) expires_at: Option<Instant>,
}

impl CacheEntry {
    pub(crate) fn new(value: ErasedValue, region: Option<RegionTag>, expires_at: Option<Instant>) -> Self {
        Self {
            value,
            region,
            created_at: Instant::now(),
            expires_at,
        }
    }

    /// Visible iff unexpired and its region has not been invalidated since.
    pub(crate) fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
            && self.region.as_ref().is_none_or(RegionTag::is_current)
    }

    pub(crate) fn region_version(&self) -> u64 {
        self.region.as_ref().map_or(0, |tag| tag.version)
    }
}

/// In-flight population of a key.
pub(crate) struct PendingComputation {
    pub(crate) id: u64,
    pub(crate) flight: Flight,
    pub(crate) waiters: Arc<AtomicUsize>,
}

impl PendingComputation {
    /// Create the pending record and the sender that resolves it.
    pub(crate) fn start(id: u64) -> (Self, oneshot::Sender<Outcome>) {
        let (sender, receiver) = oneshot::channel();
        let flight = receiver
            .map(|received| received.unwrap_or(Outcome::Aborted))
            .boxed()
            .shared();
        let pending = Self {
            id,
            flight,
            waiters: Arc::new(AtomicUsize::new(1)),
        };
        (pending, sender)
    }

    /// Register one more waiter and hand out its handle on the shared result.
    pub(crate) fn join(&self) -> Waiter {
        self.waiters.fetch_add(1, Ordering::AcqRel);
        Waiter {
            flight: self.flight.clone(),
            waiters: Arc::clone(&self.waiters),
        }
    }

    pub(crate) fn leader(&self) -> Waiter {
        Waiter {
            flight: self.flight.clone(),
            waiters: Arc::clone(&self.waiters),
        }
    }
}

/// One caller's interest in a pending computation.
///
/// Dropping it (including through cancellation) only releases the waiter
/// count; the computation keeps running.
pub(crate) struct Waiter {
    flight: Flight,
    waiters: Arc<AtomicUsize>,
}

impl Waiter {
    pub(crate) async fn wait(self) -> Outcome {
        self.flight.clone().await
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) enum Slot {
    Ready(CacheEntry),
    Pending(PendingComputation),
}

impl Slot {
    pub(crate) fn is_pending(&self, id: u64) -> bool {
        matches!(self, Slot::Pending(pending) if pending.id == id)
    }

    /// True for ready entries that are no longer visible.
    pub(crate) fn is_stale(&self, now: Instant) -> bool {
        matches!(self, Slot::Ready(entry) if !entry.is_live(now))
    }
}
