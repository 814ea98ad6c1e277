//! Catalog package workflow.
//!
//! Publishes a local archive directory to the component repository on the
//! catalog branch, tags it `{name}-{version}`, then builds and watches it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use appmgr_core::{
    require_non_empty, CatalogPackageSpec, Error, NewResource, PipelineRef, Resource, ResourceId,
    ResourceKind, ResourceSpec, ResourceStatus, Result, ResultExt, SecurityContext, StageStatus,
    StatusPatch, UniqueKey, Version,
};
use tracing::{info, warn};

use crate::engine::Shared;
use crate::watcher::{BuildRequest, BuildWatcher, StepOutcome};

/// Request to publish a catalog package.
#[derive(Debug, Clone)]
pub struct CatalogPackageRequest {
    pub component: ResourceId,
    pub name: String,
    pub version: String,
    pub pipeline: PipelineRef,
    /// Local directory holding the package contents.
    pub archive: PathBuf,
}

/// Tag a package version is published under.
pub fn package_tag(spec: &CatalogPackageSpec) -> String {
    format!("{}-{}", spec.name, spec.version)
}

/// Drives catalog packages.
#[derive(Clone)]
pub struct CatalogPackageOrchestrator {
    shared: Arc<Shared>,
}

impl CatalogPackageOrchestrator {
    pub(crate) const fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Register a catalog package and launch its workflow.
    ///
    /// The package belongs to the caller's tenant.
    ///
    /// # Errors
    ///
    /// Returns a validation error, with nothing registered, for a blank name,
    /// a malformed version, a missing archive, a component that is not READY,
    /// an unknown pipeline, or an already published package version.
    pub async fn create(&self, ctx: &SecurityContext, request: CatalogPackageRequest) -> Result<Resource> {
        require_non_empty("name", &request.name)?;
        let version: Version = request.version.parse()?;
        let is_dir = tokio::fs::metadata(&request.archive)
            .await
            .is_ok_and(|meta| meta.is_dir());
        if !is_dir {
            return Err(Error::invalid_input(format!(
                "archive '{}' is not a directory",
                request.archive.display()
            )));
        }

        let collaborators = &self.shared.collaborators;
        let component = collaborators.store.get(ctx, request.component).await?;
        component.component()?;
        component.ensure_ready()?;

        if collaborators
            .pipelines
            .get_by_id(ctx, &request.pipeline)
            .await?
            .is_none()
        {
            return Err(Error::invalid_input(format!(
                "unknown pipeline '{}'",
                request.pipeline
            )));
        }

        let name = request.name.trim().to_string();
        let key = UniqueKey::package(component.id, &name, &version);
        if let Some(existing) = collaborators.store.find_by_key(ctx, &key).await? {
            return Err(Error::duplicate(key.as_str(), existing.id));
        }

        let spec = ResourceSpec::CatalogPackage(CatalogPackageSpec {
            component: component.id,
            name,
            version,
            pipeline: request.pipeline,
            build: None,
            commit_id: None,
        });
        let new = NewResource::pending(spec)
            .in_tenant(ctx.tenant.clone())
            .with_unique_key(key);
        let package = collaborators.store.register(ctx, new).await?;
        info!(package_id = %package.id, component_id = %component.id, "Registered catalog package");

        let orchestrator = self.clone();
        let continuation_ctx = ctx.clone();
        let package_id = package.id;
        let archive = request.archive;
        tokio::spawn(async move {
            orchestrator
                .run_create(&continuation_ctx, package_id, archive)
                .await;
        });
        Ok(package)
    }

    async fn run_create(&self, ctx: &SecurityContext, package_id: ResourceId, archive: PathBuf) {
        let store = &self.shared.collaborators.store;
        match self.publish(ctx, package_id, &archive).await {
            Ok(commit) => {
                let mut patch = StatusPatch::new().repository(StageStatus::Ready);
                if let Some(commit) = commit {
                    patch = patch.commit_id(commit);
                }
                if store
                    .patch(ctx, package_id, &patch, None)
                    .await
                    .log_double_failure("failed to record package commit")
                    .is_none()
                {
                    return;
                }
            }
            Err(e) => {
                warn!(package_id = %package_id, error = %e, "Catalog package publish failed");
                let patch = StatusPatch::new()
                    .status(ResourceStatus::Error)
                    .repository(StageStatus::Error)
                    .message(e.to_string());
                store
                    .patch(ctx, package_id, &patch, None)
                    .await
                    .log_double_failure("failed to mark catalog package ERROR");
                return;
            }
        }
        self.build(ctx, package_id).await;
    }

    async fn publish(
        &self,
        ctx: &SecurityContext,
        package_id: ResourceId,
        archive: &std::path::Path,
    ) -> Result<Option<String>> {
        let collaborators = &self.shared.collaborators;
        let package = collaborators.store.get(ctx, package_id).await?;
        let spec = package.catalog_package()?;
        let component = collaborators.store.get(ctx, spec.component).await?;
        let outcome = collaborators
            .source_control
            .commit_archive_and_tag(
                ctx,
                &component.component()?.repository,
                &self.shared.config.catalog_branch,
                archive,
                &package_tag(spec),
            )
            .await?;
        Ok(outcome.commit_id().map(str::to_string))
    }

    /// Build a published package, or resume watching its recorded build.
    pub async fn build(&self, ctx: &SecurityContext, package_id: ResourceId) -> StepOutcome {
        let watcher = BuildWatcher::new(Arc::clone(&self.shared));
        let package = match self.shared.collaborators.store.get(ctx, package_id).await {
            Ok(package) => package,
            Err(e) => {
                return StepOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };
        let request = match package.catalog_package() {
            Ok(spec) => BuildRequest {
                pipeline: spec.pipeline.clone(),
                git_ref: package_tag(spec),
                args: BTreeMap::from([
                    ("name".to_string(), spec.name.clone()),
                    ("version".to_string(), spec.version.to_string()),
                ]),
            },
            Err(e) => {
                return StepOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };
        watcher.run(ctx, &package, &request).await
    }

    /// Delete a catalog package, removing its tag with `purge`.
    ///
    /// # Errors
    ///
    /// Returns a state error for a package still being published unless
    /// `force` is set, or the error of the tag or record removal.
    pub async fn delete(
        &self,
        ctx: &SecurityContext,
        package_id: ResourceId,
        purge: bool,
        force: bool,
    ) -> Result<()> {
        let collaborators = &self.shared.collaborators;
        let package = collaborators.store.get(ctx, package_id).await?;
        if package.status == ResourceStatus::Deleted {
            return Ok(());
        }
        if package.status.is_in_progress() && !force {
            return Err(Error::invalid_state(
                "delete",
                ResourceKind::CatalogPackage,
                package_id,
                "a workflow is still running",
            ));
        }

        let spec = package.catalog_package()?;
        if purge {
            let component = collaborators.store.get(ctx, spec.component).await?;
            collaborators
                .source_control
                .delete_tag(ctx, &component.component()?.repository, &package_tag(spec))
                .await?;
        }
        collaborators.store.delete(ctx, package_id, purge).await?;
        info!(package_id = %package_id, purge, "Deleted catalog package");
        Ok(())
    }
}
