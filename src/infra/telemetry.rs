use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for the cache metrics with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pipecache_hit_total",
            Unit::Count,
            "Reads served from a live cache entry."
        );
        describe_counter!(
            "pipecache_miss_total",
            Unit::Count,
            "Reads that started a new computation."
        );
        describe_counter!(
            "pipecache_join_total",
            Unit::Count,
            "Reads that joined an in-flight computation for the same key."
        );
        describe_counter!(
            "pipecache_factory_error_total",
            Unit::Count,
            "Computations that failed or panicked; nothing was cached."
        );
        describe_counter!(
            "pipecache_invalidate_total",
            Unit::Count,
            "Single-key invalidations that removed an entry."
        );
        describe_counter!(
            "pipecache_region_invalidate_total",
            Unit::Count,
            "Region invalidations."
        );
        describe_counter!(
            "pipecache_reclaimed_total",
            Unit::Count,
            "Expired or invalidated entries removed from memory."
        );
        describe_gauge!(
            "pipecache_entries",
            Unit::Count,
            "Slots held by the store: ready entries not yet swept plus in-flight computations."
        );
        describe_histogram!(
            "pipecache_factory_ms",
            Unit::Milliseconds,
            "Computation latency in milliseconds."
        );
    });
}
