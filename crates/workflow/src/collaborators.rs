//! Contracts of the external collaborators the workflows drive.
//!
//! Every method takes the caller's [`SecurityContext`] explicitly. The core
//! never stores one in ambient state, so a continuation running on any
//! worker makes its calls with the identity captured at launch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use appmgr_core::{
    ArtifactFile, BuildId, NewResource, PipelineRef, RepositoryRef, Resource, ResourceId,
    ResourceKind, ResourceStatus, Result, SecurityContext, StatusPatch, TemplateRef, TenantId,
    UniqueKey,
};
use async_trait::async_trait;

/// Which tenant scope a query covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TenantScope {
    /// Everything visible to the calling context.
    #[default]
    Visible,
    /// Only records without a tenant.
    Shared,
    /// Only records of one tenant.
    Tenant(TenantId),
}

/// Query over the record store.
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub kind: Option<ResourceKind>,
    pub statuses: Vec<ResourceStatus>,
    pub scope: TenantScope,
}

impl ResourceFilter {
    /// All visible records.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only records of `kind`.
    #[must_use]
    pub const fn kind(mut self, kind: ResourceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Only records in one of `statuses`.
    #[must_use]
    pub fn statuses(mut self, statuses: impl IntoIterator<Item = ResourceStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    /// Restrict the tenant scope.
    #[must_use]
    pub fn scope(mut self, scope: TenantScope) -> Self {
        self.scope = scope;
        self
    }

    /// Whether `resource` matches.
    pub fn matches(&self, resource: &Resource) -> bool {
        let kind_ok = self.kind.is_none_or(|kind| resource.kind() == kind);
        let status_ok = self.statuses.is_empty() || self.statuses.contains(&resource.status);
        let scope_ok = match &self.scope {
            TenantScope::Visible => true,
            TenantScope::Shared => resource.tenant.is_none(),
            TenantScope::Tenant(tenant) => resource.tenant.as_ref() == Some(tenant),
        };
        kind_ok && status_ok && scope_ok
    }
}

/// Authoritative store of resource records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Register a record and return it with its assigned ID.
    ///
    /// Fails with `DuplicateArtifact` if an active record already holds
    /// the request's unique key.
    async fn register(&self, ctx: &SecurityContext, new: NewResource) -> Result<Resource>;

    /// Read the current record. Fails with `NotFound` if absent or invisible.
    async fn get(&self, ctx: &SecurityContext, id: ResourceId) -> Result<Resource>;

    /// Active record holding `key`, if any.
    async fn find_by_key(&self, ctx: &SecurityContext, key: &UniqueKey)
        -> Result<Option<Resource>>;

    /// All visible records matching `filter`.
    async fn find(&self, ctx: &SecurityContext, filter: &ResourceFilter) -> Result<Vec<Resource>>;

    /// Apply a partial update.
    ///
    /// With `expected_revision`, fails with `RevisionConflict` unless the
    /// stored revision matches.
    async fn patch(
        &self,
        ctx: &SecurityContext,
        id: ResourceId,
        patch: &StatusPatch,
        expected_revision: Option<u64>,
    ) -> Result<Resource>;

    /// Tombstone a record (status DELETED). The key it held becomes free.
    async fn delete(&self, ctx: &SecurityContext, id: ResourceId, purge: bool) -> Result<()>;
}

/// Result of a commit that may find nothing to change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new commit was created and tagged.
    Committed { commit_id: String },
    /// The repository already holds identical content at this tag.
    NotModified,
}

impl CommitOutcome {
    /// Commit ID, if a commit was made.
    pub fn commit_id(&self) -> Option<&str> {
        match self {
            Self::Committed { commit_id } => Some(commit_id),
            Self::NotModified => None,
        }
    }
}

/// Source-control service.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Commit one local file as `filename` on `branch` and tag the commit.
    async fn commit_file_and_tag(
        &self,
        ctx: &SecurityContext,
        repository: &RepositoryRef,
        branch: &str,
        file: &Path,
        filename: &str,
        tag: &str,
    ) -> Result<CommitOutcome>;

    /// Commit the contents of a local directory on `branch` and tag the commit.
    async fn commit_archive_and_tag(
        &self,
        ctx: &SecurityContext,
        repository: &RepositoryRef,
        branch: &str,
        directory: &Path,
        tag: &str,
    ) -> Result<CommitOutcome>;

    /// Read a file at a tag, `None` if it does not exist.
    async fn get_file(
        &self,
        ctx: &SecurityContext,
        repository: &RepositoryRef,
        tag: &str,
        filename: &str,
    ) -> Result<Option<ArtifactFile>>;

    /// Remove a tag and the content only it references.
    async fn delete_tag(
        &self,
        ctx: &SecurityContext,
        repository: &RepositoryRef,
        tag: &str,
    ) -> Result<()>;
}

/// State of one remote build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Error,
    Aborted,
}

impl BuildState {
    /// Whether the build has finished.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Error | Self::Aborted
        )
    }

    /// Whether the build finished successfully.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// A scheduled build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildHandle {
    pub id: BuildId,
    pub state: BuildState,
}

/// Pipeline definition as known to the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineInfo {
    pub reference: PipelineRef,
    pub name: String,
}

/// Pipeline/build runner.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    /// Schedule a build of `git_ref`. Returns as soon as it is queued.
    async fn build(
        &self,
        ctx: &SecurityContext,
        pipeline: &PipelineRef,
        git_ref: &str,
        args: &BTreeMap<String, String>,
    ) -> Result<BuildHandle>;

    /// Current state of a scheduled build.
    async fn get_build(
        &self,
        ctx: &SecurityContext,
        pipeline: &PipelineRef,
        build: &BuildId,
    ) -> Result<BuildState>;

    /// Look up a pipeline definition.
    async fn get_by_id(
        &self,
        ctx: &SecurityContext,
        pipeline: &PipelineRef,
    ) -> Result<Option<PipelineInfo>>;
}

/// Code generator.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Render `template` against `contract` into a fresh local directory.
    ///
    /// The caller owns the returned directory and removes it when done.
    async fn generate_from_template(
        &self,
        ctx: &SecurityContext,
        template: &TemplateRef,
        contract: &ArtifactFile,
    ) -> Result<PathBuf>;
}

/// Source of the identities the reconciler impersonates.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Identity used for shared resources.
    fn system_context(&self) -> SecurityContext;

    /// One identity per tenant.
    async fn tenant_contexts(&self) -> Result<Vec<SecurityContext>>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use appmgr_core::{ComponentSpec, ResourceSpec};
    use chrono::Utc;

    fn component(tenant: Option<TenantId>, status: ResourceStatus) -> Resource {
        let spec = ResourceSpec::Component(ComponentSpec {
            name: "orders".into(),
            repository: RepositoryRef::new("orders-api"),
        });
        let new = NewResource::pending(spec)
            .in_tenant(tenant)
            .with_status(status);
        Resource::from_new(ResourceId::new(), new, Utc::now())
    }

    #[test]
    fn test_filter_by_status_and_scope() {
        let acme = TenantId::new("acme");
        let shared = component(None, ResourceStatus::Pending);
        let scoped = component(Some(acme.clone()), ResourceStatus::Pending);

        let filter = ResourceFilter::new()
            .statuses([ResourceStatus::Pending])
            .scope(TenantScope::Shared);
        assert!(filter.matches(&shared));
        assert!(!filter.matches(&scoped));

        let filter = ResourceFilter::new().scope(TenantScope::Tenant(acme));
        assert!(filter.matches(&scoped));
        assert!(!filter.matches(&shared));
    }

    #[test]
    fn test_filter_by_kind() {
        let resource = component(None, ResourceStatus::Ready);
        assert!(ResourceFilter::new()
            .kind(ResourceKind::Component)
            .matches(&resource));
        assert!(!ResourceFilter::new()
            .kind(ResourceKind::ApiVersion)
            .matches(&resource));
    }

    #[test]
    fn test_build_state_classification() {
        assert!(BuildState::Failed.is_terminal());
        assert!(!BuildState::Failed.is_success());
        assert!(!BuildState::Running.is_terminal());
        assert!(BuildState::Succeeded.is_success());
    }

    #[test]
    fn test_not_modified_has_no_commit() {
        assert_eq!(CommitOutcome::NotModified.commit_id(), None);
        let committed = CommitOutcome::Committed {
            commit_id: "abc".into(),
        };
        assert_eq!(committed.commit_id(), Some("abc"));
    }
}
