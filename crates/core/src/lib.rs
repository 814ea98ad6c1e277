//! Core types for the app manager orchestration core.
//!
//! - **Status lattice**: [`ResourceStatus`] for the overall state and
//!   [`StageStatus`] for each progress axis of a record.
//! - **Records**: [`Resource`] as held by the external record store, the
//!   kind-specific [`ResourceSpec`], and [`StatusPatch`] partial updates.
//! - **Identity**: [`SecurityContext`], passed explicitly to every remote call.
//! - **Validation**: version format, required metadata and contract checks,
//!   all run before anything is registered.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod resource;
pub mod result;
pub mod security;
pub mod types;
pub mod validation;

pub use error::{Collaborator, Error, ErrorCategory};
pub use resource::{
    ApiVersionSpec, BuildId, CatalogPackageSpec, ComponentSpec, LibraryApiVersionSpec,
    LibrarySpec, NewResource, PipelineRef, RepositoryRef, Resource, ResourceSpec, StatusPatch,
    TemplateRef, UniqueKey, META_ARTIFACT_NAME, META_GROUP_ID,
};
pub use result::{Result, ResultExt};
pub use security::SecurityContext;
pub use types::{
    ArtifactType, Language, ResourceId, ResourceKind, ResourceStatus, StageStatus, TenantId,
    Version,
};
pub use validation::{
    require_metadata, require_non_empty, validate_contract, ArtifactFile,
    CONTRACT_FALLBACK_FILENAME, CONTRACT_FILENAME,
};

/// Serialization helpers for `Duration` config fields.
pub mod duration {
    /// `Duration` as whole seconds.
    pub mod secs {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            duration: &Duration,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            duration.as_secs().serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
            let secs = u64::deserialize(deserializer)?;
            Ok(Duration::from_secs(secs))
        }
    }

    /// `Duration` as whole milliseconds.
    pub mod millis {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            duration: &Duration,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            u64::try_from(duration.as_millis())
                .unwrap_or(u64::MAX)
                .serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
            let millis = u64::deserialize(deserializer)?;
            Ok(Duration::from_millis(millis))
        }
    }
}
