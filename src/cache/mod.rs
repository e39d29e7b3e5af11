//! Cache store.
//!
//! An in-process, type-erased store shared by every request type:
//!
//! - **Single-flight**: concurrent misses for one key run one computation
//! - **Expiry**: per-entry TTL, checked lazily on read
//! - **Regions**: named groups invalidated in O(1) by a version bump
//!
//! ## Configuration
//!
//! Store behavior is controlled via `pipecache.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! default_ttl_secs = 300
//! sweep_interval_ms = 30000
//! # ... see config.rs for all options
//! ```

mod config;
mod entry;
mod error;
mod lock;
mod region;
mod store;
mod sweeper;

pub use config::CacheConfig;
pub use error::CacheError;
pub use store::CacheStore;
