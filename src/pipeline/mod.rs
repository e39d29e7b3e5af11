//! Request pipeline integration.
//!
//! [`CacheInterceptor::execute`] wraps one request's execution around the
//! cache store; [`CacheLayer`] plugs the same logic into a `tower` stack so it
//! composes with other middleware.

mod interceptor;
mod layer;

use std::error::Error as StdError;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::cache::CacheError;
use crate::directive::{CacheDirective, DirectiveError};

pub use interceptor::CacheInterceptor;
pub use layer::{CacheLayer, CacheService};

/// A request type that can flow through the cache interceptor.
///
/// Fields are read through `Serialize` when a directive's templates reference
/// them, so the serialized field names are the ones templates use.
pub trait Cacheable: Serialize + Send + 'static {
    /// Cache behavior for this request type. Consulted once per type.
    fn cache_directive() -> Option<CacheDirective> {
        None
    }
}

/// Error type for handlers running behind the interceptor.
///
/// Handler failures are shared behind an `Arc` so one failure can be handed
/// to every caller waiting on the same computation.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Directive(#[from] DirectiveError),
    #[error("handler failed: {0}")]
    Handler(Arc<dyn StdError + Send + Sync>),
}

impl PipelineError {
    pub fn handler(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::Handler(Arc::new(error))
    }

    pub fn message(message: impl Into<String>) -> Self {
        let boxed: Box<dyn StdError + Send + Sync> = message.into().into();
        Self::Handler(Arc::from(boxed))
    }
}
