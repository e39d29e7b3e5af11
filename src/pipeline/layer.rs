//! `tower` adapter for [`CacheInterceptor`].

use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tower::{Layer, Service};

use super::{CacheInterceptor, Cacheable};
use crate::cache::CacheError;
use crate::directive::DirectiveError;

/// Wraps services so their requests go through a shared [`CacheInterceptor`].
///
/// Every service produced by the same layer shares one store, so a write
/// service can purge what a read service cached.
#[derive(Clone)]
pub struct CacheLayer {
    interceptor: CacheInterceptor,
}

impl CacheLayer {
    pub fn new(interceptor: CacheInterceptor) -> Self {
        Self { interceptor }
    }

    pub fn interceptor(&self) -> &CacheInterceptor {
        &self.interceptor
    }
}

impl<S> Layer<S> for CacheLayer {
    type Service = CacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheService {
            inner,
            interceptor: self.interceptor.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CacheService<S> {
    inner: S,
    interceptor: CacheInterceptor,
}

impl<S, R> Service<R> for CacheService<S>
where
    R: Cacheable,
    S: Service<R> + Clone + Send + 'static,
    S::Response: Clone + Send + Sync + 'static,
    S::Error: From<CacheError> + From<DirectiveError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: R) -> Self::Future {
        // The ready service goes into the future; a fresh clone stays behind.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let interceptor = self.interceptor.clone();

        Box::pin(async move {
            interceptor
                .execute(request, move |request| {
                    let mut inner = inner;
                    inner.call(request)
                })
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Serialize;
    use tower::{ServiceBuilder, ServiceExt};

    use super::*;
    use crate::cache::CacheConfig;
    use crate::directive::{CacheDirective, InvalidateDirective, ReadDirective};
    use crate::pipeline::PipelineError;

    #[derive(Serialize)]
    struct GetPost {
        slug: String,
    }

    impl Cacheable for GetPost {
        fn cache_directive() -> Option<CacheDirective> {
            Some(ReadDirective::new("post:{slug}").region("posts").into())
        }
    }

    #[derive(Serialize)]
    struct PublishPost {
        slug: String,
    }

    impl Cacheable for PublishPost {
        fn cache_directive() -> Option<CacheDirective> {
            Some(InvalidateDirective::region("posts").into())
        }
    }

    fn layer() -> CacheLayer {
        CacheLayer::new(CacheInterceptor::with_config(CacheConfig::default()))
    }

    #[tokio::test]
    async fn layered_service_serves_repeats_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let service = ServiceBuilder::new()
            .layer(layer())
            .service_fn(move |request: GetPost| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, PipelineError>(format!("post {}", request.slug))
                }
            });

        for _ in 0..3 {
            let body = service
                .clone()
                .oneshot(GetPost {
                    slug: "hello".into(),
                })
                .await
                .expect("post loads");
            assert_eq!(body, "post hello");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn services_from_one_layer_share_the_store() {
        let layer = layer();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let reads = ServiceBuilder::new()
            .layer(layer.clone())
            .service_fn(move |request: GetPost| {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok::<_, PipelineError>(format!("{} v{n}", request.slug))
                }
            });
        let writes = ServiceBuilder::new()
            .layer(layer.clone())
            .service_fn(|_request: PublishPost| async { Ok::<_, PipelineError>(()) });

        let get = || GetPost {
            slug: "hello".into(),
        };
        assert_eq!(reads.clone().oneshot(get()).await.expect("ok"), "hello v1");
        assert_eq!(reads.clone().oneshot(get()).await.expect("ok"), "hello v1");

        writes
            .oneshot(PublishPost {
                slug: "hello".into(),
            })
            .await
            .expect("publish succeeds");

        assert_eq!(reads.clone().oneshot(get()).await.expect("ok"), "hello v2");
        assert_eq!(layer.interceptor().store().region_version("posts"), 1);
    }
}
