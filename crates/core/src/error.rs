//! Core error types for app manager operations.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.
//! Each variant belongs to one [`ErrorCategory`], which is what callers and
//! the asynchronous continuations branch on.

use thiserror::Error;

use crate::types::{ResourceId, ResourceKind, ResourceStatus};

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad input, raised before any remote mutation.
    Validation,
    /// Operation not allowed in the resource's current state.
    State,
    /// A remote collaborator failed.
    Remote,
    /// Concurrent writer won a compare-and-swap race.
    Conflict,
    /// Referenced resource does not exist.
    NotFound,
    /// Configuration or internal invariant problem.
    Internal,
}

/// External collaborator that produced a remote error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collaborator {
    RecordStore,
    SourceControl,
    Pipeline,
    CodeGenerator,
    Identity,
}

impl std::fmt::Display for Collaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RecordStore => "record store",
            Self::SourceControl => "source control",
            Self::Pipeline => "pipeline runner",
            Self::CodeGenerator => "code generator",
            Self::Identity => "identity provider",
        };
        f.write_str(name)
    }
}

/// Core error type for app manager operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // Validation errors
    #[error("invalid version '{version}': expected MAJOR.MINOR.PATCH with 1-3 digits per part")]
    InvalidVersion { version: String },

    #[error("missing required metadata '{key}'")]
    MissingMetadata { key: String },

    #[error("invalid contract file '{filename}': {reason}")]
    InvalidContract { filename: String, reason: String },

    #[error("'{key}' is already held by active resource {existing}")]
    DuplicateArtifact { key: String, existing: ResourceId },

    #[error("{kind} {id} is not ready (status {status})")]
    DependencyNotReady {
        kind: ResourceKind,
        id: ResourceId,
        status: ResourceStatus,
    },

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    // State errors
    #[error("cannot {operation} {kind} {id}: {reason}")]
    InvalidState {
        operation: String,
        kind: ResourceKind,
        id: ResourceId,
        reason: String,
    },

    #[error("{kind} {id} has {count} dependent resource(s); delete with force to cascade")]
    HasDependents {
        kind: ResourceKind,
        id: ResourceId,
        count: usize,
    },

    #[error("cannot resume {id}: {reason}")]
    PreconditionNotMet { id: ResourceId, reason: String },

    // Lookup / concurrency
    #[error("resource {id} not found")]
    NotFound { id: ResourceId },

    #[error("revision conflict on {id}: expected {expected}, found {actual}")]
    RevisionConflict {
        id: ResourceId,
        expected: u64,
        actual: u64,
    },

    // Remote errors
    #[error("{collaborator} call '{operation}' failed: {reason}")]
    Remote {
        collaborator: Collaborator,
        operation: String,
        reason: String,
    },

    // Internal
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Create an invalid version error.
    pub fn invalid_version(version: impl Into<String>) -> Self {
        Self::InvalidVersion {
            version: version.into(),
        }
    }

    /// Create a missing metadata error.
    pub fn missing_metadata(key: impl Into<String>) -> Self {
        Self::MissingMetadata { key: key.into() }
    }

    /// Create an invalid contract error.
    pub fn invalid_contract(filename: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidContract {
            filename: filename.into(),
            reason: reason.into(),
        }
    }

    /// Create a duplicate artifact error.
    pub fn duplicate(key: impl Into<String>, existing: ResourceId) -> Self {
        Self::DuplicateArtifact {
            key: key.into(),
            existing,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(
        operation: impl Into<String>,
        kind: ResourceKind,
        id: ResourceId,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            kind,
            id,
            reason: reason.into(),
        }
    }

    /// Create a precondition error for the reconciler.
    pub fn precondition(id: ResourceId, reason: impl Into<String>) -> Self {
        Self::PreconditionNotMet {
            id,
            reason: reason.into(),
        }
    }

    /// Create a remote collaborator error.
    pub fn remote(
        collaborator: Collaborator,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Remote {
            collaborator,
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Classify this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidVersion { .. }
            | Self::MissingMetadata { .. }
            | Self::InvalidContract { .. }
            | Self::DuplicateArtifact { .. }
            | Self::DependencyNotReady { .. }
            | Self::InvalidInput { .. } => ErrorCategory::Validation,
            Self::InvalidState { .. }
            | Self::HasDependents { .. }
            | Self::PreconditionNotMet { .. } => ErrorCategory::State,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::RevisionConflict { .. } => ErrorCategory::Conflict,
            Self::Remote { .. } => ErrorCategory::Remote,
            Self::InvalidConfig { .. } | Self::Io(_) => ErrorCategory::Internal,
        }
    }

    /// True for errors raised before any remote mutation.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        self.category() == ErrorCategory::Validation
    }

    /// True for errors caused by the current state of a resource.
    #[must_use]
    pub fn is_state(&self) -> bool {
        self.category() == ErrorCategory::State
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
