//! Library API version (child) workflow.
//!
//! A child generates sources for one library from its parent's contract,
//! commits them to the library repository under the version tag, and then
//! waits for the parent to launch the build stage. Its build runs as one
//! step of a language chain in the [`BuildCoordinator`].

use std::collections::BTreeMap;
use std::sync::Arc;

use appmgr_core::{
    Error, LibraryApiVersionSpec, NewResource, Resource, ResourceId, ResourceSpec,
    ResourceStatus, Result, ResultExt, SecurityContext, StageStatus, StatusPatch, UniqueKey,
    CONTRACT_FILENAME,
};
use tracing::{info, warn};

use crate::contract;
use crate::coordinator::BuildCoordinator;
use crate::detector::{ConvergenceDetector, SourceConvergence};
use crate::engine::Shared;
use crate::watcher::{BuildRequest, BuildWatcher, StepOutcome};

/// Drives child resources.
#[derive(Clone)]
pub struct LibraryApiVersionOrchestrator {
    shared: Arc<Shared>,
}

impl LibraryApiVersionOrchestrator {
    pub(crate) const fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Register a child binding `library` to `parent` and launch its source stage.
    ///
    /// # Errors
    ///
    /// Fails synchronously, before anything is registered, if the library is
    /// not READY, belongs to another component, or is already bound.
    pub async fn create(
        &self,
        ctx: &SecurityContext,
        parent: &Resource,
        library: &Resource,
    ) -> Result<Resource> {
        let child = self.register(ctx, parent, library).await?;
        self.launch_source_stage(ctx, child.id);
        Ok(child)
    }

    /// Validate and register a child without starting it.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create`].
    pub async fn register(
        &self,
        ctx: &SecurityContext,
        parent: &Resource,
        library: &Resource,
    ) -> Result<Resource> {
        let parent_spec = parent.api_version()?;
        let library_spec = library.library()?;
        library.ensure_ready()?;
        if library_spec.component != parent_spec.component {
            return Err(Error::invalid_input(format!(
                "library {} does not belong to component {}",
                library.id, parent_spec.component
            )));
        }

        let store = &self.shared.collaborators.store;
        let key = UniqueKey::binding(parent.id, library.id);
        if let Some(existing) = store.find_by_key(ctx, &key).await? {
            return Err(Error::duplicate(key.as_str(), existing.id));
        }

        let spec = ResourceSpec::LibraryApiVersion(LibraryApiVersionSpec {
            library: library.id,
            api_version: parent.id,
            language: library_spec.language.clone(),
            artifact_type: library_spec.artifact_type,
            version: parent_spec.version.clone(),
            build: None,
            commit_id: None,
        });
        let new = NewResource::pending(spec)
            .in_tenant(parent.tenant.clone())
            .with_unique_key(key);
        let child = store.register(ctx, new).await?;
        info!(
            child_id = %child.id,
            parent_id = %parent.id,
            language = %library_spec.language,
            artifact_type = %library_spec.artifact_type,
            "Registered library api version"
        );
        Ok(child)
    }

    /// Start the source stage of a registered child in the background.
    pub fn launch_source_stage(&self, ctx: &SecurityContext, child_id: ResourceId) {
        let orchestrator = self.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { orchestrator.run_source_stage(&ctx, child_id).await });
    }

    /// Generate, commit and tag the child's sources, then report to the parent.
    ///
    /// The last child to finish its source stage launches the build stage.
    pub async fn run_source_stage(&self, ctx: &SecurityContext, child_id: ResourceId) {
        let store = &self.shared.collaborators.store;
        let Some(child) = store
            .get(ctx, child_id)
            .await
            .log_double_failure("failed to read child for source stage")
        else {
            return;
        };
        let Ok(spec) = child.library_api_version() else {
            warn!(resource_id = %child_id, "Source stage requested for a non-child resource");
            return;
        };
        let parent_id = spec.api_version;

        match self.generate_and_commit(ctx, &child).await {
            Ok(commit) => {
                let mut patch = StatusPatch::new()
                    .repository(StageStatus::Ready)
                    .clear_message();
                if let Some(commit) = commit {
                    patch = patch.commit_id(commit);
                }
                store
                    .patch(ctx, child_id, &patch, None)
                    .await
                    .log_double_failure("failed to record child source stage");
                info!(child_id = %child_id, "Child source stage finished");
            }
            Err(e) => {
                warn!(child_id = %child_id, error = %e, "Child source stage failed");
                let patch = StatusPatch::new()
                    .status(ResourceStatus::Error)
                    .repository(StageStatus::Error)
                    .message(e.to_string());
                store
                    .patch(ctx, child_id, &patch, None)
                    .await
                    .log_double_failure("failed to mark child ERROR");
            }
        }

        let detector = ConvergenceDetector::new(Arc::clone(&self.shared));
        if let Some(SourceConvergence::LaunchBuild) = detector
            .on_source_resolved(ctx, parent_id)
            .await
            .log_failure("source convergence check failed")
        {
            BuildCoordinator::new(Arc::clone(&self.shared)).spawn(ctx.clone(), parent_id);
        }
    }

    async fn generate_and_commit(
        &self,
        ctx: &SecurityContext,
        child: &Resource,
    ) -> Result<Option<String>> {
        let collaborators = &self.shared.collaborators;
        let spec = child.library_api_version()?;
        let library = collaborators.store.get(ctx, spec.library).await?;
        let library = library.library()?;
        let parent = collaborators.store.get(ctx, spec.api_version).await?;
        let component = collaborators
            .store
            .get(ctx, parent.api_version()?.component)
            .await?;
        let repository = &component.component()?.repository;

        let tag = spec.version.as_str();
        let contract =
            contract::fetch(collaborators.source_control.as_ref(), ctx, repository, tag)
                .await?
                .ok_or_else(|| {
                    Error::invalid_contract(
                        CONTRACT_FILENAME,
                        format!("no contract committed in '{repository}' at tag {tag}"),
                    )
                })?;

        let generated = collaborators
            .codegen
            .generate_from_template(ctx, &library.template, &contract)
            .await?;
        let committed = collaborators
            .source_control
            .commit_archive_and_tag(
                ctx,
                &library.repository,
                &self.shared.config.library_branch,
                &generated,
                tag,
            )
            .await;
        tokio::fs::remove_dir_all(&generated)
            .await
            .map_err(Error::from)
            .log_failure("failed to remove generated sources");

        Ok(committed?.commit_id().map(str::to_string))
    }

    /// Build one child and record the outcome on it.
    ///
    /// A child that already failed is reported as failed without building.
    pub async fn build(&self, ctx: &SecurityContext, child_id: ResourceId) -> StepOutcome {
        let watcher = BuildWatcher::new(Arc::clone(&self.shared));
        let child = match self.shared.collaborators.store.get(ctx, child_id).await {
            Ok(child) => child,
            Err(e) => {
                warn!(child_id = %child_id, error = %e, "Cannot read child to build");
                return StepOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        match (child.status, child.pipeline) {
            (ResourceStatus::Ready, StageStatus::Ready) => return StepOutcome::Succeeded,
            (ResourceStatus::Error, _) => {
                return StepOutcome::Failed {
                    reason: child
                        .message
                        .clone()
                        .unwrap_or_else(|| "failed before build".to_string()),
                }
            }
            _ => {}
        }
        if child.repository != StageStatus::Ready {
            let outcome = StepOutcome::Failed {
                reason: "source stage did not complete".to_string(),
            };
            watcher.record(ctx, &child, &outcome).await;
            return outcome;
        }

        match self.build_request(ctx, &child).await {
            Ok(request) => watcher.run(ctx, &child, &request).await,
            Err(e) => {
                let outcome = StepOutcome::Failed {
                    reason: e.to_string(),
                };
                watcher.record(ctx, &child, &outcome).await;
                outcome
            }
        }
    }

    async fn build_request(&self, ctx: &SecurityContext, child: &Resource) -> Result<BuildRequest> {
        let spec = child.library_api_version()?;
        let library = self.shared.collaborators.store.get(ctx, spec.library).await?;
        let library = library.library()?;
        let args = BTreeMap::from([
            ("version".to_string(), spec.version.to_string()),
            ("language".to_string(), spec.language.to_string()),
            ("artifactType".to_string(), spec.artifact_type.to_string()),
        ]);
        Ok(BuildRequest {
            pipeline: library.pipeline.clone(),
            git_ref: spec.version.to_string(),
            args,
        })
    }

    /// Fail a child without building it because an earlier step failed.
    pub async fn skip(&self, ctx: &SecurityContext, child_id: ResourceId, reason: &str) -> StepOutcome {
        let outcome = StepOutcome::Skipped {
            reason: reason.to_string(),
        };
        match self.shared.collaborators.store.get(ctx, child_id).await {
            Ok(child) if child.status != ResourceStatus::Error => {
                BuildWatcher::new(Arc::clone(&self.shared))
                    .record(ctx, &child, &outcome)
                    .await;
            }
            Ok(_) => {}
            Err(e) => warn!(child_id = %child_id, error = %e, "Cannot read child to skip"),
        }
        outcome
    }

    /// Put a child back to UPDATING with both axes pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the child cannot be written.
    pub async fn reset_for_update(&self, ctx: &SecurityContext, child_id: ResourceId) -> Result<Resource> {
        let patch = StatusPatch::new()
            .status(ResourceStatus::Updating)
            .repository(StageStatus::Pending)
            .pipeline(StageStatus::Pending)
            .clear_build()
            .clear_message();
        self.shared
            .collaborators
            .store
            .patch(ctx, child_id, &patch, None)
            .await
    }

    /// Re-run a child against its parent's current contract.
    ///
    /// # Errors
    ///
    /// Returns an error if the child cannot be reset.
    pub async fn update(&self, ctx: &SecurityContext, child_id: ResourceId) -> Result<Resource> {
        let child = self.reset_for_update(ctx, child_id).await?;
        self.launch_source_stage(ctx, child_id);
        Ok(child)
    }

    /// Delete a child, removing its version tag with `purge`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag or the record cannot be removed.
    pub async fn delete(&self, ctx: &SecurityContext, child_id: ResourceId, purge: bool) -> Result<()> {
        let store = &self.shared.collaborators.store;
        let child = store.get(ctx, child_id).await?;
        if child.status == ResourceStatus::Deleted {
            return Ok(());
        }
        if purge {
            let spec = child.library_api_version()?;
            let library = store.get(ctx, spec.library).await?;
            self.shared
                .collaborators
                .source_control
                .delete_tag(ctx, &library.library()?.repository, spec.version.as_str())
                .await?;
        }
        store.delete(ctx, child_id, purge).await?;
        info!(child_id = %child_id, purge, "Deleted library api version");
        Ok(())
    }
}
