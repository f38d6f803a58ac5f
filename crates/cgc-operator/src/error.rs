//! Reconciliation errors

use cgc_templating::{ApplyError, MaterializeError, TemplateError};
use thiserror::Error;

/// Errors returned by the reconcilers
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Kubernetes or validation error from shared code
    #[error(transparent)]
    Common(#[from] cgc_common::Error),

    /// Templates or value context are unusable
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Materialization did not finish
    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    /// Some materialized resources failed to apply
    #[error(transparent)]
    Apply(#[from] ApplyError),

    /// A namespaced object came without a namespace
    #[error("{kind} {name} has no namespace")]
    MissingNamespace {
        /// Kind of the object
        kind: &'static str,
        /// Name of the object
        name: String,
    },

    /// A referenced object does not exist (yet)
    #[error("{kind} {name} not found")]
    MissingDependency {
        /// Kind of the missing object
        kind: &'static str,
        /// Name of the missing object
        name: String,
    },

    /// The GatewayClass has no usable parameters
    #[error("parameters for GatewayClass {class} unavailable: {reason}")]
    MissingParameters {
        /// GatewayClass name
        class: String,
        /// Why the parameters could not be used
        reason: String,
    },
}

impl ReconcileError {
    /// Whether waiting for another object to appear may fix this
    pub fn is_dependency_missing(&self) -> bool {
        matches!(
            self,
            Self::MissingDependency { .. } | Self::MissingParameters { .. }
        )
    }

    /// Whether the work was abandoned because of shutdown
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Materialize(MaterializeError::Cancelled) | Self::Apply(ApplyError::Cancelled)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_errors() {
        let err = ReconcileError::MissingDependency {
            kind: "GatewayClass",
            name: "cloud".to_string(),
        };
        assert!(err.is_dependency_missing());
        assert_eq!(err.to_string(), "GatewayClass cloud not found");

        let err = ReconcileError::MissingNamespace {
            kind: "HTTPRoute",
            name: "web".to_string(),
        };
        assert!(!err.is_dependency_missing());
    }

    #[test]
    fn cancellation_from_either_stage() {
        assert!(ReconcileError::from(MaterializeError::Cancelled).is_cancelled());
        assert!(ReconcileError::from(ApplyError::Cancelled).is_cancelled());
        assert!(!ReconcileError::from(ApplyError::Partial { failed: 1, total: 2 }).is_cancelled());
    }

    #[test]
    fn apply_error_is_transparent() {
        let err: ReconcileError = ApplyError::Partial {
            failed: 2,
            total: 5,
        }
        .into();
        assert_eq!(err.to_string(), "2 of 5 resources failed to apply");
    }
}
