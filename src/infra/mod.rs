//! Runtime bootstrap: settings, telemetry and the running cache.

pub mod error;
pub mod telemetry;

use std::path::Path;

use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::{CacheConfig, CacheStore};
use crate::config::{self, CacheSettings, Settings};
use crate::pipeline::{CacheInterceptor, CacheLayer};

pub use error::InfraError;

/// A started cache: the shared interceptor and its sweeper task.
pub struct CacheRuntime {
    interceptor: CacheInterceptor,
    sweeper: Option<JoinHandle<()>>,
}

impl CacheRuntime {
    /// Build the store from `settings` and start the sweeper if it is enabled.
    ///
    /// Must be called from within a Tokio runtime when sweeping is enabled.
    pub fn start(settings: &CacheSettings) -> Self {
        let store = CacheStore::new(CacheConfig::from(settings));
        let sweeper = store.spawn_configured_sweeper();
        info!(
            enabled = settings.enabled,
            default_ttl_secs = settings.default_ttl.map(|ttl| ttl.as_secs()),
            sweeper = sweeper.is_some(),
            "cache started"
        );

        Self {
            interceptor: CacheInterceptor::new(store),
            sweeper,
        }
    }

    pub fn interceptor(&self) -> &CacheInterceptor {
        &self.interceptor
    }

    pub fn store(&self) -> &CacheStore {
        self.interceptor.store()
    }

    /// A `tower` layer sharing this runtime's store.
    pub fn layer(&self) -> CacheLayer {
        CacheLayer::new(self.interceptor.clone())
    }

    /// Stop the sweeper and drop every cached entry.
    pub async fn shutdown(self) {
        if let Some(sweeper) = self.sweeper {
            sweeper.abort();
            let _ = sweeper.await;
        }
        self.interceptor.store().clear();
        info!("cache stopped");
    }
}

/// Load settings, install telemetry and start the cache.
pub fn bootstrap(config_file: Option<&Path>) -> Result<(Settings, CacheRuntime), InfraError> {
    let settings = config::load(config_file)?;
    telemetry::init(&settings.logging)?;
    let runtime = CacheRuntime::start(&settings.cache);
    Ok((settings, runtime))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pipeline::PipelineError;

    fn settings(sweep: Option<Duration>) -> CacheSettings {
        CacheSettings {
            sweep_interval: sweep,
            ..Settings::default().cache
        }
    }

    #[tokio::test]
    async fn runtime_starts_sweeper_when_configured() {
        let runtime = CacheRuntime::start(&settings(Some(Duration::from_secs(1))));
        assert!(runtime.sweeper.is_some());
        runtime.shutdown().await;

        let runtime = CacheRuntime::start(&settings(None));
        assert!(runtime.sweeper.is_none());
    }

    #[tokio::test]
    async fn shutdown_clears_entries() {
        let runtime = CacheRuntime::start(&settings(None));
        let value: Result<u32, PipelineError> = runtime
            .store()
            .get_or_create("answer", None, None, || async { Ok(42) })
            .await;
        assert_eq!(value.expect("computed"), 42);
        assert_eq!(runtime.store().len(), 1);

        let store = runtime.store().clone();
        runtime.shutdown().await;
        assert!(store.is_empty());
    }
}
