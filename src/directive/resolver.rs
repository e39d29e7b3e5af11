//! Key/region resolution.
//!
//! Compiles a [`CacheDirective`] into parsed templates and resolves them
//! against request instances.

use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::Value;

use super::shape::declared_fields;
use super::template::KeyTemplate;
use super::{CacheDirective, DirectiveError};

/// Concrete key and region for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub key: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug)]
pub enum CompiledDirective {
    Read {
        key: KeyTemplate,
        region: Option<KeyTemplate>,
        ttl: Option<Duration>,
        templates: CompiledTemplates,
    },
    Invalidate {
        key: Option<KeyTemplate>,
        region: Option<KeyTemplate>,
        templates: CompiledTemplates,
    },
}

/// Per-type resolution state shared by every request of that type.
#[derive(Debug)]
pub struct CompiledTemplates {
    request_type: &'static str,
    /// First undeclared-field defect seen for the type; reported without re-resolving.
    defect: OnceCell<DirectiveError>,
}

impl CompiledTemplates {
    fn new(request_type: &'static str) -> Self {
        Self {
            request_type,
            defect: OnceCell::new(),
        }
    }
}

impl CompiledDirective {
    /// Parse the templates of `directive` declared on `request_type`.
    pub fn compile(
        request_type: &'static str,
        directive: &CacheDirective,
    ) -> Result<Self, DirectiveError> {
        let parse = |source: &str| {
            KeyTemplate::parse(source).map_err(|reason| {
                DirectiveError::invalid(request_type, format!("template `{source}`: {reason}"))
            })
        };
        let templates = CompiledTemplates::new(request_type);

        match directive {
            CacheDirective::Read(read) => {
                if read.key_template().is_empty() {
                    return Err(DirectiveError::invalid(
                        request_type,
                        "read directive needs a key template",
                    ));
                }
                Ok(CompiledDirective::Read {
                    key: parse(read.key_template())?,
                    region: read.region_template().map(parse).transpose()?,
                    ttl: read.time_to_live(),
                    templates,
                })
            }
            CacheDirective::Invalidate(invalidate) => {
                let key = invalidate.key_template().filter(|key| !key.is_empty());
                let region = invalidate
                    .region_template()
                    .filter(|region| !region.is_empty());
                if key.is_none() && region.is_none() {
                    return Err(DirectiveError::invalid(
                        request_type,
                        "invalidate directive needs a key or a region",
                    ));
                }
                Ok(CompiledDirective::Invalidate {
                    key: key.map(parse).transpose()?,
                    region: region.map(parse).transpose()?,
                    templates,
                })
            }
        }
    }

    pub fn request_type(&self) -> &'static str {
        self.templates().request_type
    }

    pub fn is_read(&self) -> bool {
        matches!(self, CompiledDirective::Read { .. })
    }

    /// TTL of a read directive.
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            CompiledDirective::Read { ttl, .. } => *ttl,
            CompiledDirective::Invalidate { .. } => None,
        }
    }

    fn templates(&self) -> &CompiledTemplates {
        match self {
            CompiledDirective::Read { templates, .. }
            | CompiledDirective::Invalidate { templates, .. } => templates,
        }
    }

    fn parts(&self) -> (Option<&KeyTemplate>, Option<&KeyTemplate>) {
        match self {
            CompiledDirective::Read { key, region, .. } => (Some(key), region.as_ref()),
            CompiledDirective::Invalidate { key, region, .. } => (key.as_ref(), region.as_ref()),
        }
    }
}

/// Resolve `directive` against `request`.
///
/// Pure: structurally-equal requests always produce the same target. A
/// template referencing a field the request does not have fails with
/// `TemplateFieldNotFound`. When the type does not declare that field at all,
/// the failure is remembered and every later request of the type fails too.
pub fn resolve<R: Serialize>(
    request: &R,
    directive: &CompiledDirective,
) -> Result<ResolvedTarget, DirectiveError> {
    let templates = directive.templates();
    if let Some(defect) = templates.defect.get() {
        return Err(defect.clone());
    }

    let (key, region) = directive.parts();
    let needs_fields = key.is_some_and(|t| !t.is_literal()) || region.is_some_and(|t| !t.is_literal());
    let fields = if needs_fields {
        serde_json::to_value(request).map_err(|err| DirectiveError::Serialize {
            request_type: templates.request_type,
            message: err.to_string(),
        })?
    } else {
        Value::Null
    };

    let render = |template: Option<&KeyTemplate>| {
        template
            .map(|template| template.render(&fields, templates.request_type))
            .transpose()
    };
    let target = render(key).and_then(|key| {
        let region = render(region)?.filter(|region| !region.is_empty());
        Ok(ResolvedTarget { key, region })
    });

    // Only a field the type never declares is a defect of the type; a field
    // skipped or absent for this value fails just this request.
    if let Err(defect @ DirectiveError::TemplateFieldNotFound { field, .. }) = &target {
        let root = field.split('.').next().unwrap_or(field);
        let undeclared = declared_fields(request)
            .is_some_and(|declared| !declared.iter().any(|name| *name == root));
        if undeclared {
            let _ = templates.defect.set(defect.clone());
        }
    }
    target
}
