//! Error types for the materialization engine
//!
//! Only [`TemplateError::EmptyTemplateSet`], [`TemplateError::NoCompilableTemplates`]
//! and [`TemplateError::Projection`] abort a materialization. Everything else
//! is per-resource: it is logged, the resource is skipped, and a later pass
//! gets another chance.

use thiserror::Error;

/// Errors from compiling and rendering templates
#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    /// Template source does not parse
    #[error("template {template:?} has invalid syntax: {message}")]
    Syntax {
        /// Template name
        template: String,
        /// Parser message
        message: String,
    },

    /// Template failed while rendering (undefined field, failing helper, ...)
    #[error("template {template:?} failed to render: {message}")]
    Render {
        /// Template name
        template: String,
        /// Renderer message
        message: String,
    },

    /// Rendered output is not a single YAML mapping
    #[error("template {template:?} rendered an invalid document: {message}")]
    InvalidDocument {
        /// Template name
        template: String,
        /// Parser message
        message: String,
    },

    /// No templates were supplied
    #[error("template set is empty")]
    EmptyTemplateSet,

    /// Every template in the set failed to compile
    #[error("none of the {count} templates compiled")]
    NoCompilableTemplates {
        /// Number of templates in the set
        count: usize,
    },

    /// The parent object could not be projected into a document
    #[error("cannot project {kind} into template values: {message}")]
    Projection {
        /// Kind of the parent object
        kind: String,
        /// What went wrong
        message: String,
    },
}

impl TemplateError {
    /// Whether this error aborts the whole materialization
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EmptyTemplateSet | Self::NoCompilableTemplates { .. } | Self::Projection { .. }
        )
    }
}

/// Errors from resolving the resource type of a rendered document
#[derive(Debug, Error)]
pub enum ResolveError {
    /// `apiVersion` is not `version` or `group/version`
    #[error("invalid apiVersion {api_version:?}")]
    InvalidApiVersion {
        /// The offending value
        api_version: String,
    },

    /// A required top-level field is missing or not a string
    #[error("rendered document has no {field}")]
    MissingField {
        /// Field name (apiVersion, kind, metadata.name)
        field: &'static str,
    },

    /// The cluster does not serve this kind
    #[error("kind {kind} is not registered for {group}/{version}")]
    UnknownKind {
        /// API group (empty for core)
        group: String,
        /// API version
        version: String,
        /// Kind
        kind: String,
    },

    /// Discovery itself failed
    #[error(transparent)]
    Client(#[from] cgc_common::Error),
}

/// Errors that stop a materialization pass
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// Fatal templating error
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The caller cancelled the pass
    #[error("materialization cancelled")]
    Cancelled,
}

/// Errors from applying materialized resources
#[derive(Debug, Error)]
pub enum ApplyError {
    /// Some resources failed to apply; the rest were applied
    #[error("{failed} of {total} resources failed to apply")]
    Partial {
        /// Number of failed resources
        failed: usize,
        /// Number of resources attempted
        total: usize,
    },

    /// The caller cancelled the apply
    #[error("apply cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_apply_message_reports_counts() {
        let err = ApplyError::Partial {
            failed: 1,
            total: 3,
        };
        assert_eq!(err.to_string(), "1 of 3 resources failed to apply");
    }

    #[test]
    fn fatal_template_errors() {
        assert!(TemplateError::EmptyTemplateSet.is_fatal());
        assert!(TemplateError::NoCompilableTemplates { count: 2 }.is_fatal());
        assert!(!TemplateError::Render {
            template: "svc".to_string(),
            message: "undefined".to_string(),
        }
        .is_fatal());
    }

    #[test]
    fn resolve_error_wraps_client_error() {
        let err: ResolveError = cgc_common::Error::internal("discovery down").into();
        assert!(matches!(err, ResolveError::Client(_)));
        assert!(err.to_string().contains("discovery down"));
    }
}
