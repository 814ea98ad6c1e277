//! Resource records as held by the external record store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;
use crate::types::{
    ArtifactType, Language, ResourceId, ResourceKind, ResourceStatus, StageStatus, TenantId,
    Version,
};

/// Metadata key carrying the artifact group.
pub const META_GROUP_ID: &str = "artifact-groupId";

/// Metadata key carrying the artifact name.
pub const META_ARTIFACT_NAME: &str = "artifact-artifactName";

macro_rules! string_ref {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw reference.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the reference as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_ref!(
    /// Source-control repository reference.
    RepositoryRef
);
string_ref!(
    /// Pipeline definition reference in the build runner.
    PipelineRef
);
string_ref!(
    /// Code-generation template reference.
    TemplateRef
);
string_ref!(
    /// Identifier of one scheduled build.
    BuildId
);

/// Key that at most one active record may hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueKey(String);

impl UniqueKey {
    /// Key for a (groupId, artifactName) pair.
    pub fn artifact(group_id: &str, artifact_name: &str) -> Self {
        Self(format!("artifact:{group_id}:{artifact_name}"))
    }

    /// Key for one binding of a library to an API version.
    pub fn binding(api_version: ResourceId, library: ResourceId) -> Self {
        Self(format!("library-api-version:{api_version}:{library}"))
    }

    /// Key for one catalog package version of a component.
    pub fn package(component: ResourceId, name: &str, version: &Version) -> Self {
        Self(format!("catalog-package:{component}:{name}:{version}"))
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Component owning the contract repository. Read-only for the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    pub repository: RepositoryRef,
}

/// One language x artifact-type library of a component. Read-only for the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibrarySpec {
    pub component: ResourceId,
    pub language: Language,
    pub artifact_type: ArtifactType,
    pub repository: RepositoryRef,
    pub pipeline: PipelineRef,
    pub template: TemplateRef,
}

/// Parent resource: one contract version of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiVersionSpec {
    pub component: ResourceId,
    pub version: Version,
    pub group_id: String,
    pub artifact_name: String,
    #[serde(default)]
    pub released: bool,
    /// Child count fixed at fan-out time.
    pub expected_children: usize,
    #[serde(default)]
    pub libraries_api_versions: Vec<ResourceId>,
    #[serde(default)]
    pub commit_id: Option<String>,
}

/// Child resource: one library generated and built for one API version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryApiVersionSpec {
    pub library: ResourceId,
    pub api_version: ResourceId,
    pub language: Language,
    pub artifact_type: ArtifactType,
    pub version: Version,
    #[serde(default)]
    pub build: Option<BuildId>,
    #[serde(default)]
    pub commit_id: Option<String>,
}

/// Catalog package archive published for a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogPackageSpec {
    pub component: ResourceId,
    pub name: String,
    pub version: Version,
    pub pipeline: PipelineRef,
    #[serde(default)]
    pub build: Option<BuildId>,
    #[serde(default)]
    pub commit_id: Option<String>,
}

/// Kind-specific part of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceSpec {
    Component(ComponentSpec),
    Library(LibrarySpec),
    ApiVersion(ApiVersionSpec),
    LibraryApiVersion(LibraryApiVersionSpec),
    CatalogPackage(CatalogPackageSpec),
}

impl ResourceSpec {
    /// Kind of this spec.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Component(_) => ResourceKind::Component,
            Self::Library(_) => ResourceKind::Library,
            Self::ApiVersion(_) => ResourceKind::ApiVersion,
            Self::LibraryApiVersion(_) => ResourceKind::LibraryApiVersion,
            Self::CatalogPackage(_) => ResourceKind::CatalogPackage,
        }
    }
}

/// Record registration request.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub tenant: Option<TenantId>,
    pub status: ResourceStatus,
    pub metadata: BTreeMap<String, String>,
    pub spec: ResourceSpec,
    pub unique_key: Option<UniqueKey>,
}

impl NewResource {
    /// A pending registration of `spec`.
    pub fn pending(spec: ResourceSpec) -> Self {
        Self {
            tenant: None,
            status: ResourceStatus::Pending,
            metadata: BTreeMap::new(),
            spec,
            unique_key: None,
        }
    }

    /// Scope the record to a tenant.
    #[must_use]
    pub fn in_tenant(mut self, tenant: Option<TenantId>) -> Self {
        self.tenant = tenant;
        self
    }

    /// Set the initial status.
    #[must_use]
    pub const fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Require the record to hold a unique key.
    #[must_use]
    pub fn with_unique_key(mut self, key: UniqueKey) -> Self {
        self.unique_key = Some(key);
        self
    }
}

/// A resource record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub tenant: Option<TenantId>,
    pub status: ResourceStatus,
    /// Source-control stage axis.
    pub repository: StageStatus,
    /// Build stage axis.
    pub pipeline: StageStatus,
    pub metadata: BTreeMap<String, String>,
    pub message: Option<String>,
    pub unique_key: Option<UniqueKey>,
    /// Incremented by every write; used for compare-and-swap.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub spec: ResourceSpec,
}

impl Resource {
    /// Materialise a registration request.
    pub fn from_new(id: ResourceId, new: NewResource, now: DateTime<Utc>) -> Self {
        Self {
            id,
            tenant: new.tenant,
            status: new.status,
            repository: StageStatus::Pending,
            pipeline: StageStatus::Pending,
            metadata: new.metadata,
            message: None,
            unique_key: new.unique_key,
            revision: 1,
            created_at: now,
            updated_at: now,
            spec: new.spec,
        }
    }

    /// Kind of this record.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    /// Component spec, or a validation error for other kinds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the record is not a component.
    pub fn component(&self) -> Result<&ComponentSpec> {
        match &self.spec {
            ResourceSpec::Component(spec) => Ok(spec),
            _ => Err(self.wrong_kind(ResourceKind::Component)),
        }
    }

    /// Library spec, or a validation error for other kinds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the record is not a library.
    pub fn library(&self) -> Result<&LibrarySpec> {
        match &self.spec {
            ResourceSpec::Library(spec) => Ok(spec),
            _ => Err(self.wrong_kind(ResourceKind::Library)),
        }
    }

    /// API version spec, or a validation error for other kinds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the record is not an API version.
    pub fn api_version(&self) -> Result<&ApiVersionSpec> {
        match &self.spec {
            ResourceSpec::ApiVersion(spec) => Ok(spec),
            _ => Err(self.wrong_kind(ResourceKind::ApiVersion)),
        }
    }

    /// Library API version spec, or a validation error for other kinds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the record is not a library API version.
    pub fn library_api_version(&self) -> Result<&LibraryApiVersionSpec> {
        match &self.spec {
            ResourceSpec::LibraryApiVersion(spec) => Ok(spec),
            _ => Err(self.wrong_kind(ResourceKind::LibraryApiVersion)),
        }
    }

    /// Catalog package spec, or a validation error for other kinds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the record is not a catalog package.
    pub fn catalog_package(&self) -> Result<&CatalogPackageSpec> {
        match &self.spec {
            ResourceSpec::CatalogPackage(spec) => Ok(spec),
            _ => Err(self.wrong_kind(ResourceKind::CatalogPackage)),
        }
    }

    /// Require the record to be READY.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DependencyNotReady`] otherwise.
    pub fn ensure_ready(&self) -> Result<()> {
        if self.status == ResourceStatus::Ready {
            Ok(())
        } else {
            Err(Error::DependencyNotReady {
                kind: self.kind(),
                id: self.id,
                status: self.status,
            })
        }
    }

    fn wrong_kind(&self, expected: ResourceKind) -> Error {
        Error::invalid_input(format!(
            "{} is a {}, expected a {expected}",
            self.id,
            self.kind()
        ))
    }
}

/// Partial-field update of a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPatch {
    pub status: Option<ResourceStatus>,
    pub repository: Option<StageStatus>,
    pub pipeline: Option<StageStatus>,
    pub message: Option<Option<String>>,
    pub released: Option<bool>,
    pub add_child: Option<ResourceId>,
    pub build: Option<Option<BuildId>>,
    pub commit_id: Option<String>,
}

impl StatusPatch {
    /// Empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the overall status.
    #[must_use]
    pub const fn status(mut self, status: ResourceStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the source-control axis.
    #[must_use]
    pub const fn repository(mut self, stage: StageStatus) -> Self {
        self.repository = Some(stage);
        self
    }

    /// Set the build axis.
    #[must_use]
    pub const fn pipeline(mut self, stage: StageStatus) -> Self {
        self.pipeline = Some(stage);
        self
    }

    /// Record a failure message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(Some(message.into()));
        self
    }

    /// Clear the failure message.
    #[must_use]
    pub fn clear_message(mut self) -> Self {
        self.message = Some(None);
        self
    }

    /// Set the released flag.
    #[must_use]
    pub const fn released(mut self, released: bool) -> Self {
        self.released = Some(released);
        self
    }

    /// Append a child reference.
    #[must_use]
    pub const fn add_child(mut self, child: ResourceId) -> Self {
        self.add_child = Some(child);
        self
    }

    /// Record the scheduled build.
    #[must_use]
    pub fn build(mut self, build: BuildId) -> Self {
        self.build = Some(Some(build));
        self
    }

    /// Forget the scheduled build.
    #[must_use]
    pub fn clear_build(mut self) -> Self {
        self.build = Some(None);
        self
    }

    /// Record the commit produced by the source stage.
    #[must_use]
    pub fn commit_id(mut self, commit_id: impl Into<String>) -> Self {
        self.commit_id = Some(commit_id.into());
        self
    }

    /// Apply the patch in place. Does not touch revision or timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a field does not exist on the
    /// record's kind.
    pub fn apply(&self, resource: &mut Resource) -> Result<()> {
        if let Some(status) = self.status {
            resource.status = status;
        }
        if let Some(stage) = self.repository {
            resource.repository = stage;
        }
        if let Some(stage) = self.pipeline {
            resource.pipeline = stage;
        }
        if let Some(message) = &self.message {
            resource.message.clone_from(message);
        }

        let id = resource.id;
        let unsupported =
            |field: &str| Error::invalid_input(format!("{id} has no field '{field}'"));

        match &mut resource.spec {
            ResourceSpec::ApiVersion(spec) => {
                if let Some(released) = self.released {
                    spec.released = released;
                }
                if let Some(child) = self.add_child {
                    if !spec.libraries_api_versions.contains(&child) {
                        spec.libraries_api_versions.push(child);
                    }
                }
                if self.build.is_some() {
                    return Err(unsupported("build"));
                }
                if let Some(commit) = &self.commit_id {
                    spec.commit_id = Some(commit.clone());
                }
            }
            ResourceSpec::LibraryApiVersion(LibraryApiVersionSpec {
                build, commit_id, ..
            })
            | ResourceSpec::CatalogPackage(CatalogPackageSpec {
                build, commit_id, ..
            }) => {
                if self.released.is_some() {
                    return Err(unsupported("released"));
                }
                if self.add_child.is_some() {
                    return Err(unsupported("libraries_api_versions"));
                }
                if let Some(new_build) = &self.build {
                    build.clone_from(new_build);
                }
                if let Some(commit) = &self.commit_id {
                    *commit_id = Some(commit.clone());
                }
            }
            ResourceSpec::Component(_) | ResourceSpec::Library(_) => {
                if self.released.is_some()
                    || self.add_child.is_some()
                    || self.build.is_some()
                    || self.commit_id.is_some()
                {
                    return Err(unsupported("spec"));
                }
            }
        }
        Ok(())
    }
}
