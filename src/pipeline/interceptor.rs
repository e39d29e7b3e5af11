//! Cache interceptor.
//!
//! Serves read-tagged requests through the store and purges the store after
//! invalidate-tagged requests succeed. Requests without a directive pass
//! straight through.

use std::any::type_name;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, instrument};

use super::Cacheable;
use crate::cache::{CacheConfig, CacheError, CacheStore};
use crate::directive::{CompiledDirective, DirectiveError, DirectiveRegistry, resolve};

/// Shared interceptor state. Cloning shares the store and the directive cache.
#[derive(Clone)]
pub struct CacheInterceptor {
    store: CacheStore,
    directives: Arc<DirectiveRegistry>,
}

impl CacheInterceptor {
    pub fn new(store: CacheStore) -> Self {
        Self {
            store,
            directives: Arc::new(DirectiveRegistry::new()),
        }
    }

    /// Build an interceptor with a fresh store for `config`.
    pub fn with_config(config: CacheConfig) -> Self {
        Self::new(CacheStore::new(config))
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn directives(&self) -> &DirectiveRegistry {
        &self.directives
    }

    /// Validate `R`'s directive up front instead of on its first request.
    pub fn register<R: Cacheable>(&self) -> Result<(), DirectiveError> {
        self.directives.register::<R>()
    }

    /// Run `request` through the cache, delegating to `next` for the real work.
    ///
    /// - No directive (or cache disabled): `next(request)` unchanged.
    /// - Read directive: served from the store; `next` runs only on a miss, and
    ///   at most once for concurrent identical requests.
    /// - Invalidate directive: `next` runs first; the key and/or region are
    ///   purged only if it succeeded. Failures are returned untouched.
    #[instrument(skip_all, fields(request_type = type_name::<R>()))]
    pub async fn execute<R, T, E, N, Fut>(&self, request: R, next: N) -> Result<T, E>
    where
        R: Cacheable,
        T: Clone + Send + Sync + 'static,
        E: From<CacheError> + From<DirectiveError> + Clone + Send + Sync + 'static,
        N: FnOnce(R) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        if !self.store.config().enabled {
            return next(request).await;
        }
        let Some(directive) = self.directives.lookup::<R>()? else {
            return next(request).await;
        };

        // Resolution is pure, so it runs before `next` and a template defect
        // fails the request before any mutation happens.
        let target = resolve(&request, &directive)?;

        match directive.as_ref() {
            CompiledDirective::Read { ttl, .. } => {
                let Some(key) = target.key else {
                    return next(request).await;
                };
                let ttl = ttl.or_else(|| self.store.config().default_ttl());
                self.store
                    .get_or_create(&key, target.region.as_deref(), ttl, move || next(request))
                    .await
            }
            CompiledDirective::Invalidate { .. } => {
                let response = next(request).await?;
                if let Some(key) = target.key.as_deref() {
                    self.store.invalidate(key);
                }
                if let Some(region) = target.region.as_deref() {
                    self.store.invalidate_region(region);
                }
                debug!(
                    cache = "interceptor",
                    key = target.key.as_deref(),
                    region = target.region.as_deref(),
                    "invalidated after successful write"
                );
                Ok(response)
            }
        }
    }
}
