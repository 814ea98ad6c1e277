//! Error types for the reconciler crate.

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A workflow or collaborator call failed.
    #[error(transparent)]
    Workflow(#[from] appmgr_core::Error),

    /// The loop gave up.
    #[error("reconciliation failed: {reason}")]
    ReconcileFailed { reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a reconcile failed error.
    pub fn reconcile_failed(reason: impl Into<String>) -> Self {
        Self::ReconcileFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether the resource was left alone because resuming it is unsafe.
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::Workflow(appmgr_core::Error::PreconditionNotMet { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appmgr_core::ResourceId;

    #[test]
    fn test_error_display() {
        let err = Error::reconcile_failed("max errors (3) reached");
        assert!(err.to_string().contains("max errors (3) reached"));
    }

    #[test]
    fn test_workflow_error_is_transparent() {
        let id = ResourceId::new();
        let err = Error::from(appmgr_core::Error::precondition(id, "source stage not ready"));
        assert!(err.is_precondition());
        assert!(err.to_string().contains("source stage not ready"));
    }
}
