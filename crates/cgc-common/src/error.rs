//! Shared error type
//!
//! Each variant names what it was working on (a resource, a kind, a
//! subsystem) so log lines are useful without further wrapping.

use thiserror::Error;

/// Errors from API access and shared helpers
#[derive(Debug, Error)]
pub enum Error {
    /// The API server or the client failed
    #[error("kubernetes error: {source}")]
    Kube {
        /// kube-rs error
        #[from]
        source: kube::Error,
    },

    /// An object or document is not acceptable as is
    #[error("{resource} is invalid: {message}")]
    Validation {
        /// Object the problem was found on
        resource: String,
        /// Offending field path, e.g. `metadata.uid`
        field: Option<String>,
        /// What is wrong
        message: String,
    },

    /// A value could not be converted to or from its wire form
    #[error("cannot serialize {}: {message}", .kind.as_deref().unwrap_or("value"))]
    Serialization {
        /// Kind being converted, when known
        kind: Option<String>,
        /// Serializer message
        message: String,
    },

    /// Anything else, tagged with where it happened
    #[error("{context}: {message}")]
    Internal {
        /// Subsystem, e.g. `discovery`
        context: String,
        /// What went wrong
        message: String,
    },
}

impl Error {
    /// Validation failure on a named object
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            field: None,
            message: msg.into(),
        }
    }

    /// Validation failure on one field of a named object
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            field: Some(field.into()),
            message: msg.into(),
        }
    }

    /// Conversion failure for a known kind
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            kind: Some(kind.into()),
            message: msg.into(),
        }
    }

    /// Internal failure without a more specific subsystem
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::internal_with_context("controller", msg)
    }

    /// Internal failure in `context`
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: msg.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            kind: None,
            message: err.to_string(),
        }
    }
}
