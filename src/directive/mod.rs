//! Declarative cache directives.
//!
//! A request type opts into caching by returning a [`CacheDirective`] from
//! [`Cacheable::cache_directive`](crate::pipeline::Cacheable::cache_directive):
//!
//! ```
//! use std::time::Duration;
//! use pipecache::directive::{CacheDirective, ReadDirective};
//!
//! let directive: CacheDirective = ReadDirective::new("user:{id}")
//!     .region("users")
//!     .ttl(Duration::from_secs(60))
//!     .into();
//! assert!(directive.is_read());
//! ```
//!
//! Directives are compiled once per request type by the [`DirectiveRegistry`].

mod registry;
mod resolver;
mod shape;
mod template;

use std::time::Duration;

use thiserror::Error;

pub use registry::DirectiveRegistry;
pub use resolver::{CompiledDirective, ResolvedTarget, resolve};
pub use template::KeyTemplate;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveError {
    #[error("invalid cache directive on `{request_type}`: {reason}")]
    InvalidDirective {
        request_type: &'static str,
        reason: String,
    },
    #[error("cache template on `{request_type}` references unknown field `{field}`")]
    TemplateFieldNotFound {
        request_type: &'static str,
        field: String,
    },
    #[error("failed to inspect `{request_type}` for cache key resolution: {message}")]
    Serialize {
        request_type: &'static str,
        message: String,
    },
}

impl DirectiveError {
    pub(crate) fn invalid(request_type: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidDirective {
            request_type,
            reason: reason.into(),
        }
    }
}

/// Cache behavior attached to a request type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDirective {
    /// Serve from the cache, computing on miss.
    Read(ReadDirective),
    /// Purge a key and/or region after the request succeeds.
    Invalidate(InvalidateDirective),
}

impl CacheDirective {
    pub fn is_read(&self) -> bool {
        matches!(self, CacheDirective::Read(_))
    }
}

/// Read directive: `{ key_template, region?, ttl? }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadDirective {
    key: String,
    region: Option<String>,
    ttl: Option<Duration>,
}

impl ReadDirective {
    pub fn new(key_template: impl Into<String>) -> Self {
        Self {
            key: key_template.into(),
            region: None,
            ttl: None,
        }
    }

    /// Region template; an empty rendering means the entry has no region.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn key_template(&self) -> &str {
        &self.key
    }

    pub fn region_template(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn time_to_live(&self) -> Option<Duration> {
        self.ttl
    }
}

impl From<ReadDirective> for CacheDirective {
    fn from(directive: ReadDirective) -> Self {
        CacheDirective::Read(directive)
    }
}

/// Invalidate directive: `{ key?, region? }`, at least one of them set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidateDirective {
    key: Option<String>,
    region: Option<String>,
}

impl InvalidateDirective {
    /// Build from optional parts, rejecting a directive that purges nothing.
    pub fn new(key: Option<String>, region: Option<String>) -> Result<Self, DirectiveError> {
        let key = key.filter(|key| !key.is_empty());
        let region = region.filter(|region| !region.is_empty());
        if key.is_none() && region.is_none() {
            return Err(DirectiveError::invalid(
                "<unattached>",
                "invalidate directive needs a key or a region",
            ));
        }
        Ok(Self { key, region })
    }

    /// Purge a single key.
    pub fn key(key_template: impl Into<String>) -> Self {
        Self {
            key: Some(key_template.into()),
            region: None,
        }
    }

    /// Purge a whole region.
    pub fn region(region_template: impl Into<String>) -> Self {
        Self {
            key: None,
            region: Some(region_template.into()),
        }
    }

    pub fn and_key(mut self, key_template: impl Into<String>) -> Self {
        self.key = Some(key_template.into());
        self
    }

    pub fn and_region(mut self, region_template: impl Into<String>) -> Self {
        self.region = Some(region_template.into());
        self
    }

    pub fn key_template(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn region_template(&self) -> Option<&str> {
        self.region.as_deref()
    }
}

impl From<InvalidateDirective> for CacheDirective {
    fn from(directive: InvalidateDirective) -> Self {
        CacheDirective::Invalidate(directive)
    }
}
