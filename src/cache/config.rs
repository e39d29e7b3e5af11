//! Cache configuration.
//!
//! Runtime knobs for the store and the interceptor, built from the `[cache]`
//! section of the loaded settings.

use std::time::Duration;

// Default values for cache configuration
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;

/// Cache configuration consumed by the store and the interceptor.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Enable the pipeline interceptor. When off, every request passes through.
    pub enabled: bool,
    /// TTL applied to read directives that do not carry their own.
    pub default_ttl_secs: Option<u64>,
    /// Interval (ms) of the background sweeper; 0 disables it.
    pub sweep_interval_ms: u64,
    /// Reclaim region members in a background task right after a region invalidation.
    pub reclaim_on_region_invalidate: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: None,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            reclaim_on_region_invalidate: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            default_ttl_secs: settings.default_ttl.map(|ttl| ttl.as_secs()),
            sweep_interval_ms: settings
                .sweep_interval
                .map_or(0, |interval| {
                    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
                }),
            reclaim_on_region_invalidate: settings.reclaim_on_region_invalidate,
        }
    }
}

impl CacheConfig {
    /// TTL for read directives without an explicit one.
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }

    /// Sweeper interval, or `None` when sweeping is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }
}
