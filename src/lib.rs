//! Declarative request-pipeline caching.
//!
//! Request types declare a [`directive::CacheDirective`] through
//! [`pipeline::Cacheable`]; the [`pipeline::CacheInterceptor`] resolves it to a
//! key and region per request and serves reads from a shared
//! [`cache::CacheStore`] or purges the store after successful writes.

pub mod cache;
pub mod config;
pub mod directive;
pub mod infra;
pub mod pipeline;

pub use cache::{CacheConfig, CacheError, CacheStore};
pub use directive::{CacheDirective, DirectiveError, InvalidateDirective, ReadDirective};
pub use pipeline::{CacheInterceptor, CacheLayer, CacheService, Cacheable, PipelineError};
