//! Configuration layer: typed settings with layered precedence (file → env).

use std::{path::Path, str::FromStr, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pipecache";
const ENV_PREFIX: &str = "PIPECACHE";
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    /// Applied to read directives that carry no TTL; `None` keeps such entries until invalidated.
    pub default_ttl: Option<Duration>,
    /// `None` disables the background sweeper.
    pub sweep_interval: Option<Duration>,
    pub reclaim_on_region_invalidate: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (files → explicit file → environment).
///
/// Environment variables use `PIPECACHE__<SECTION>__<KEY>`, e.g.
/// `PIPECACHE__CACHE__DEFAULT_TTL_SECS=60`.
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    default_ttl_secs: Option<u64>,
    sweep_interval_ms: Option<u64>,
    reclaim_on_region_invalidate: Option<bool>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self { logging, cache })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
            cache: CacheSettings {
                enabled: true,
                default_ttl: None,
                sweep_interval: Some(Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS)),
                reclaim_on_region_invalidate: true,
            },
        }
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.trim()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let default_ttl = match cache.default_ttl_secs {
        Some(0) => {
            return Err(LoadError::invalid(
                "cache.default_ttl_secs",
                "must be greater than zero; omit it to keep entries until invalidated",
            ));
        }
        Some(secs) => Some(Duration::from_secs(secs)),
        None => None,
    };

    let sweep_ms = cache.sweep_interval_ms.unwrap_or(DEFAULT_SWEEP_INTERVAL_MS);
    let sweep_interval = (sweep_ms > 0).then(|| Duration::from_millis(sweep_ms));

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        default_ttl,
        sweep_interval,
        reclaim_on_region_invalidate: cache.reclaim_on_region_invalidate.unwrap_or(true),
    })
}
