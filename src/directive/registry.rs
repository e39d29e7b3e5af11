//! Per-type directive cache.
//!
//! Maps each request type to its compiled directive so discovery and template
//! parsing happen once per type, not once per request.

use std::any::{TypeId, type_name};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use super::DirectiveError;
use super::resolver::CompiledDirective;
use crate::pipeline::Cacheable;

type Compiled = Result<Option<Arc<CompiledDirective>>, DirectiveError>;

/// Read-through cache of compiled directives keyed by request type.
#[derive(Default)]
pub struct DirectiveRegistry {
    compiled: DashMap<TypeId, Compiled>,
}

impl DirectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiled directive for `R`, computed on first use.
    ///
    /// A directive that fails to compile keeps failing for the type.
    pub fn lookup<R: Cacheable>(&self) -> Compiled {
        let type_id = TypeId::of::<R>();
        if let Some(found) = self.compiled.get(&type_id) {
            return found.value().clone();
        }

        let compiled = compile::<R>();
        self.compiled
            .entry(type_id)
            .or_insert(compiled)
            .value()
            .clone()
    }

    /// Compile `R`'s directive eagerly, surfacing malformed directives at startup.
    pub fn register<R: Cacheable>(&self) -> Result<(), DirectiveError> {
        self.lookup::<R>().map(|_| ())
    }

    /// Number of request types seen so far.
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

fn compile<R: Cacheable>() -> Compiled {
    let request_type = type_name::<R>();
    let Some(directive) = R::cache_directive() else {
        debug!(request_type, "request type has no cache directive");
        return Ok(None);
    };

    match CompiledDirective::compile(request_type, &directive) {
        Ok(compiled) => {
            debug!(
                request_type,
                read = compiled.is_read(),
                "compiled cache directive"
            );
            Ok(Some(Arc::new(compiled)))
        }
        Err(error) => {
            warn!(request_type, error = %error, "rejected cache directive");
            Err(error)
        }
    }
}
