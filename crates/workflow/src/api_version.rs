//! API version (parent) workflow.
//!
//! `create` validates everything it can synchronously, registers the parent
//! in PENDING and returns. A continuation then commits the contract to the
//! component repository, tags it with the version, and fans out one child
//! per library of the component. The parent resolves through the
//! [`ConvergenceDetector`](crate::detector::ConvergenceDetector) once every
//! child has built.

use std::collections::BTreeMap;
use std::sync::Arc;

use appmgr_core::{
    require_metadata, validate_contract, ApiVersionSpec, ArtifactFile, Error, NewResource,
    Resource, ResourceId, ResourceKind, ResourceSpec, ResourceStatus, Result, ResultExt,
    SecurityContext, StageStatus, StatusPatch, UniqueKey, Version, CONTRACT_FILENAME,
    META_ARTIFACT_NAME, META_GROUP_ID,
};
use tracing::{error, info, warn};

use crate::collaborators::{CommitOutcome, ResourceFilter};
use crate::contract;
use crate::detector::load_children;
use crate::engine::Shared;
use crate::library_api_version::LibraryApiVersionOrchestrator;

/// Request to publish one contract version of a component.
#[derive(Debug, Clone)]
pub struct ApiVersionRequest {
    pub component: ResourceId,
    pub version: String,
    /// Must carry `artifact-groupId` and `artifact-artifactName`.
    pub metadata: BTreeMap<String, String>,
    /// Contract to commit. Without one, the contract must already be
    /// committed at the version tag.
    pub contract: Option<ArtifactFile>,
}

/// Which axis a continuation failure belongs to.
#[derive(Debug, Clone, Copy)]
enum Stage {
    Repository,
    FanOut,
}

struct StageFailure {
    stage: Stage,
    error: Error,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageFailure>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageFailure> {
        self.map_err(|error| StageFailure { stage, error })
    }
}

/// Drives parent resources.
#[derive(Clone)]
pub struct ApiVersionOrchestrator {
    shared: Arc<Shared>,
}

impl ApiVersionOrchestrator {
    pub(crate) const fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    fn children(&self) -> LibraryApiVersionOrchestrator {
        LibraryApiVersionOrchestrator::new(Arc::clone(&self.shared))
    }

    /// Register an API version and launch its workflow.
    ///
    /// # Errors
    ///
    /// Returns a validation error, with nothing registered, for a malformed
    /// version, missing metadata, an invalid contract, a component or
    /// library that is not READY, or an already published
    /// (groupId, artifactName) pair.
    pub async fn create(&self, ctx: &SecurityContext, request: ApiVersionRequest) -> Result<Resource> {
        let version: Version = request.version.parse()?;
        let group_id = require_metadata(&request.metadata, META_GROUP_ID)?.to_string();
        let artifact_name = require_metadata(&request.metadata, META_ARTIFACT_NAME)?.to_string();
        if let Some(contract) = &request.contract {
            validate_contract(contract)?;
        }

        let collaborators = &self.shared.collaborators;
        let component = collaborators.store.get(ctx, request.component).await?;
        let repository = component.component()?.repository.clone();
        component.ensure_ready()?;

        let libraries = self.libraries_of(ctx, component.id).await?;
        if libraries.is_empty() {
            return Err(Error::invalid_input(format!(
                "component {} has no libraries",
                component.id
            )));
        }
        for library in &libraries {
            library.ensure_ready()?;
        }

        if request.contract.is_none() {
            let committed = contract::fetch(
                collaborators.source_control.as_ref(),
                ctx,
                &repository,
                version.as_str(),
            )
            .await?;
            if committed.is_none() {
                return Err(Error::invalid_contract(
                    CONTRACT_FILENAME,
                    format!("no contract given and none committed at tag {version}"),
                ));
            }
        }

        let key = UniqueKey::artifact(&group_id, &artifact_name);
        if let Some(existing) = collaborators.store.find_by_key(ctx, &key).await? {
            return Err(Error::duplicate(key.as_str(), existing.id));
        }

        let spec = ResourceSpec::ApiVersion(ApiVersionSpec {
            component: component.id,
            version,
            group_id,
            artifact_name,
            released: false,
            expected_children: libraries.len(),
            libraries_api_versions: Vec::new(),
            commit_id: None,
        });
        let ApiVersionRequest {
            metadata, contract, ..
        } = request;
        let mut new = NewResource::pending(spec)
            .in_tenant(component.tenant.clone())
            .with_unique_key(key);
        new.metadata = metadata;
        let parent = collaborators.store.register(ctx, new).await?;
        info!(
            parent_id = %parent.id,
            component_id = %component.id,
            children = libraries.len(),
            "Registered api version"
        );

        let orchestrator = self.clone();
        let continuation_ctx = ctx.clone();
        let parent_id = parent.id;
        tokio::spawn(async move {
            let outcome = orchestrator
                .run_create(&continuation_ctx, parent_id, contract, libraries)
                .await;
            orchestrator
                .settle(&continuation_ctx, parent_id, outcome)
                .await;
        });
        Ok(parent)
    }

    async fn libraries_of(&self, ctx: &SecurityContext, component: ResourceId) -> Result<Vec<Resource>> {
        let filter = ResourceFilter::new().kind(ResourceKind::Library);
        let libraries = self.shared.collaborators.store.find(ctx, &filter).await?;
        Ok(libraries
            .into_iter()
            .filter(|r| r.status != ResourceStatus::Deleted)
            .filter(|r| r.library().is_ok_and(|spec| spec.component == component))
            .collect())
    }

    async fn run_create(
        &self,
        ctx: &SecurityContext,
        parent_id: ResourceId,
        contract: Option<ArtifactFile>,
        libraries: Vec<Resource>,
    ) -> std::result::Result<(), StageFailure> {
        let store = &self.shared.collaborators.store;
        if let Some(contract) = &contract {
            self.commit_contract(ctx, parent_id, contract)
                .await
                .at(Stage::Repository)?;
        }
        let parent = store
            .patch(
                ctx,
                parent_id,
                &StatusPatch::new().repository(StageStatus::Ready),
                None,
            )
            .await
            .at(Stage::Repository)?;

        let children = self.children();
        for library in &libraries {
            let child = children
                .register(ctx, &parent, library)
                .await
                .at(Stage::FanOut)?;
            store
                .patch(ctx, parent_id, &StatusPatch::new().add_child(child.id), None)
                .await
                .at(Stage::FanOut)?;
            children.launch_source_stage(ctx, child.id);
        }
        info!(parent_id = %parent_id, children = libraries.len(), "Fan-out complete");
        Ok(())
    }

    async fn commit_contract(
        &self,
        ctx: &SecurityContext,
        parent_id: ResourceId,
        contract: &ArtifactFile,
    ) -> Result<()> {
        let collaborators = &self.shared.collaborators;
        let parent = collaborators.store.get(ctx, parent_id).await?;
        let spec = parent.api_version()?;
        let component = collaborators.store.get(ctx, spec.component).await?;
        let repository = &component.component()?.repository;

        let staged = contract::stage(contract)?;
        let outcome = collaborators
            .source_control
            .commit_file_and_tag(
                ctx,
                repository,
                &self.shared.config.contract_branch,
                staged.path(),
                CONTRACT_FILENAME,
                spec.version.as_str(),
            )
            .await;
        staged
            .close()
            .map_err(Error::from)
            .log_failure("failed to remove staged contract");

        match outcome? {
            CommitOutcome::Committed { commit_id } => {
                collaborators
                    .store
                    .patch(ctx, parent_id, &StatusPatch::new().commit_id(commit_id.clone()), None)
                    .await?;
                info!(parent_id = %parent_id, commit_id = %commit_id, "Contract committed");
            }
            CommitOutcome::NotModified => {
                info!(parent_id = %parent_id, "Contract unchanged at tag");
            }
        }
        Ok(())
    }

    async fn settle(
        &self,
        ctx: &SecurityContext,
        parent_id: ResourceId,
        outcome: std::result::Result<(), StageFailure>,
    ) {
        let Err(StageFailure { stage, error }) = outcome else {
            return;
        };
        warn!(parent_id = %parent_id, stage = ?stage, error = %error, "Api version workflow failed");
        let patch = StatusPatch::new()
            .status(ResourceStatus::Error)
            .message(error.to_string());
        let patch = match stage {
            Stage::Repository => patch.repository(StageStatus::Error),
            Stage::FanOut => patch.pipeline(StageStatus::Error),
        };
        self.shared
            .collaborators
            .store
            .patch(ctx, parent_id, &patch, None)
            .await
            .log_double_failure("failed to mark api version ERROR");
    }

    /// Replace the contract of a READY, unreleased API version and rebuild.
    ///
    /// # Errors
    ///
    /// Returns a state error if the version is released or not READY, and a
    /// validation error for an invalid contract.
    pub async fn update(
        &self,
        ctx: &SecurityContext,
        parent_id: ResourceId,
        contract: ArtifactFile,
    ) -> Result<Resource> {
        let store = &self.shared.collaborators.store;
        let parent = store.get(ctx, parent_id).await?;
        let spec = parent.api_version()?;
        if spec.released {
            return Err(Error::invalid_state(
                "update",
                ResourceKind::ApiVersion,
                parent_id,
                "released versions are immutable",
            ));
        }
        if parent.status != ResourceStatus::Ready {
            return Err(Error::invalid_state(
                "update",
                ResourceKind::ApiVersion,
                parent_id,
                format!("status is {}", parent.status),
            ));
        }
        validate_contract(&contract)?;

        let patch = StatusPatch::new()
            .status(ResourceStatus::Updating)
            .repository(StageStatus::Pending)
            .pipeline(StageStatus::Pending)
            .clear_message();
        let updating = store
            .patch(ctx, parent_id, &patch, Some(parent.revision))
            .await?;
        info!(parent_id = %parent_id, "Updating api version");

        let orchestrator = self.clone();
        let continuation_ctx = ctx.clone();
        tokio::spawn(async move {
            let outcome = orchestrator
                .run_update(&continuation_ctx, parent_id, contract)
                .await;
            orchestrator
                .settle(&continuation_ctx, parent_id, outcome)
                .await;
        });
        Ok(updating)
    }

    async fn run_update(
        &self,
        ctx: &SecurityContext,
        parent_id: ResourceId,
        contract: ArtifactFile,
    ) -> std::result::Result<(), StageFailure> {
        let store = &self.shared.collaborators.store;
        self.commit_contract(ctx, parent_id, &contract)
            .await
            .at(Stage::Repository)?;

        // Children go back to pending before the parent's source axis reads
        // READY, so no convergence check sees results of the previous run.
        let parent = store.get(ctx, parent_id).await.at(Stage::FanOut)?;
        let child_ids = parent
            .api_version()
            .at(Stage::FanOut)?
            .libraries_api_versions
            .clone();
        let children = self.children();
        for child_id in &child_ids {
            children
                .reset_for_update(ctx, *child_id)
                .await
                .at(Stage::FanOut)?;
        }
        store
            .patch(
                ctx,
                parent_id,
                &StatusPatch::new().repository(StageStatus::Ready),
                None,
            )
            .await
            .at(Stage::Repository)?;
        for child_id in child_ids {
            children.launch_source_stage(ctx, child_id);
        }
        Ok(())
    }

    /// Mark a READY API version as released. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns a state error if the version is not READY.
    pub async fn release(&self, ctx: &SecurityContext, parent_id: ResourceId) -> Result<Resource> {
        let store = &self.shared.collaborators.store;
        let parent = store.get(ctx, parent_id).await?;
        if parent.api_version()?.released {
            return Ok(parent);
        }
        if parent.status != ResourceStatus::Ready {
            return Err(Error::invalid_state(
                "release",
                ResourceKind::ApiVersion,
                parent_id,
                format!("status is {}", parent.status),
            ));
        }
        let released = store
            .patch(
                ctx,
                parent_id,
                &StatusPatch::new().released(true),
                Some(parent.revision),
            )
            .await?;
        info!(parent_id = %parent_id, "Released api version");
        Ok(released)
    }

    /// Delete an API version.
    ///
    /// Without `force`, fails if any child is still active or a workflow is
    /// in flight. With `force`, children are deleted first; the first child
    /// that cannot be deleted marks the parent ERROR and aborts. `purge`
    /// also removes the version tags.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HasDependents`] or a state error without touching
    /// anything, or the error of the first failed cascade step.
    pub async fn delete(
        &self,
        ctx: &SecurityContext,
        parent_id: ResourceId,
        purge: bool,
        force: bool,
    ) -> Result<()> {
        let collaborators = &self.shared.collaborators;
        let parent = collaborators.store.get(ctx, parent_id).await?;
        if parent.status == ResourceStatus::Deleted {
            return Ok(());
        }
        let spec = parent.api_version()?;

        let active = load_children(collaborators.store.as_ref(), ctx, &parent)
            .await?
            .into_iter()
            .filter(|c| c.status != ResourceStatus::Deleted)
            .collect::<Vec<_>>();
        if !force {
            if !active.is_empty() {
                return Err(Error::HasDependents {
                    kind: ResourceKind::ApiVersion,
                    id: parent_id,
                    count: active.len(),
                });
            }
            if parent.status.is_in_progress() {
                return Err(Error::invalid_state(
                    "delete",
                    ResourceKind::ApiVersion,
                    parent_id,
                    "a workflow is still running",
                ));
            }
        }

        let children = self.children();
        for child in &active {
            if let Err(e) = children.delete(ctx, child.id, purge).await {
                self.abort_delete(ctx, parent_id, &e).await;
                return Err(e);
            }
        }

        if purge {
            let component = collaborators.store.get(ctx, spec.component).await?;
            let removed = collaborators
                .source_control
                .delete_tag(ctx, &component.component()?.repository, spec.version.as_str())
                .await;
            if let Err(e) = removed {
                self.abort_delete(ctx, parent_id, &e).await;
                return Err(e);
            }
        }

        collaborators.store.delete(ctx, parent_id, purge).await?;
        info!(parent_id = %parent_id, purge, force, "Deleted api version");
        Ok(())
    }

    async fn abort_delete(&self, ctx: &SecurityContext, parent_id: ResourceId, cause: &Error) {
        error!(parent_id = %parent_id, error = %cause, "Cascade delete aborted");
        let patch = StatusPatch::new()
            .status(ResourceStatus::Error)
            .message(format!("delete failed: {cause}"));
        self.shared
            .collaborators
            .store
            .patch(ctx, parent_id, &patch, None)
            .await
            .log_double_failure("failed to mark api version ERROR after failed delete");
    }
}
