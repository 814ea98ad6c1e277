//! Bounded build polling.
//!
//! A build that is still running after `build_max_wait` marks its resource
//! UNSTABLE. The build itself is left alone; the reconciler may pick the
//! resource up again later.

use std::collections::BTreeMap;
use std::sync::Arc;

use appmgr_core::{
    BuildId, PipelineRef, Resource, ResourceSpec, ResourceStatus, Result, ResultExt,
    SecurityContext, StageStatus, StatusPatch,
};
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::collaborators::BuildState;
use crate::engine::Shared;

/// How one build ended for the resource that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Failed { reason: String },
    /// The bounded wait ran out.
    Unstable,
    /// Not built because an earlier step of the chain did not succeed.
    Skipped { reason: String },
}

impl StepOutcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Status the owning resource ends with.
    pub const fn status(&self) -> ResourceStatus {
        match self {
            Self::Succeeded => ResourceStatus::Ready,
            Self::Unstable => ResourceStatus::Unstable,
            Self::Failed { .. } | Self::Skipped { .. } => ResourceStatus::Error,
        }
    }
}

/// Result of waiting on a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildWait {
    Finished(BuildState),
    TimedOut,
}

/// Build to run for one resource.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub pipeline: PipelineRef,
    pub git_ref: String,
    pub args: BTreeMap<String, String>,
}

/// Build scheduled for a resource, if any.
pub fn current_build(resource: &Resource) -> Option<&BuildId> {
    match &resource.spec {
        ResourceSpec::LibraryApiVersion(spec) => spec.build.as_ref(),
        ResourceSpec::CatalogPackage(spec) => spec.build.as_ref(),
        _ => None,
    }
}

/// Schedules builds and polls them within the configured bound.
#[derive(Clone)]
pub struct BuildWatcher {
    shared: Arc<Shared>,
}

impl BuildWatcher {
    pub(crate) const fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Poll `build` until it finishes or `build_max_wait` elapses.
    ///
    /// # Errors
    ///
    /// Returns an error if a status read fails.
    pub async fn wait(
        &self,
        ctx: &SecurityContext,
        pipeline: &PipelineRef,
        build: &BuildId,
    ) -> Result<BuildWait> {
        let config = &self.shared.config;
        let deadline = Instant::now() + config.build_max_wait;
        loop {
            let state = self
                .shared
                .collaborators
                .pipelines
                .get_build(ctx, pipeline, build)
                .await?;
            if state.is_terminal() {
                return Ok(BuildWait::Finished(state));
            }
            if Instant::now() >= deadline {
                return Ok(BuildWait::TimedOut);
            }
            sleep(config.build_poll_interval).await;
        }
    }

    /// Build `resource` and record the outcome on it.
    ///
    /// A resource with a recorded build whose axis is RUNNING or UNSTABLE is
    /// resumed by polling that build instead of scheduling a new one.
    /// Failures are recorded on the resource, never returned.
    pub async fn run(
        &self,
        ctx: &SecurityContext,
        resource: &Resource,
        request: &BuildRequest,
    ) -> StepOutcome {
        let store = &self.shared.collaborators.store;
        let resumable = current_build(resource)
            .filter(|_| matches!(resource.pipeline, StageStatus::Running | StageStatus::Unstable))
            .cloned();

        let build = match resumable {
            Some(build) => {
                info!(resource_id = %resource.id, build = %build, "Resuming build watch");
                build
            }
            None => {
                let scheduled = self
                    .shared
                    .collaborators
                    .pipelines
                    .build(ctx, &request.pipeline, &request.git_ref, &request.args)
                    .await;
                let handle = match scheduled {
                    Ok(handle) => handle,
                    Err(e) => {
                        let outcome = StepOutcome::Failed {
                            reason: e.to_string(),
                        };
                        self.record(ctx, resource, &outcome).await;
                        return outcome;
                    }
                };
                let patch = StatusPatch::new()
                    .pipeline(StageStatus::Running)
                    .build(handle.id.clone());
                store
                    .patch(ctx, resource.id, &patch, None)
                    .await
                    .log_failure("failed to record scheduled build");
                info!(resource_id = %resource.id, build = %handle.id, "Build scheduled");
                handle.id
            }
        };

        let outcome = match self.wait(ctx, &request.pipeline, &build).await {
            Ok(BuildWait::Finished(state)) if state.is_success() => StepOutcome::Succeeded,
            Ok(BuildWait::Finished(state)) => StepOutcome::Failed {
                reason: format!("build {build} finished {state:?}"),
            },
            Ok(BuildWait::TimedOut) => {
                warn!(resource_id = %resource.id, build = %build, "Build exceeded bounded wait");
                StepOutcome::Unstable
            }
            Err(e) => StepOutcome::Failed {
                reason: e.to_string(),
            },
        };
        self.record(ctx, resource, &outcome).await;
        outcome
    }

    /// Write `outcome` to the resource's status and build axis.
    pub(crate) async fn record(
        &self,
        ctx: &SecurityContext,
        resource: &Resource,
        outcome: &StepOutcome,
    ) {
        let patch = match outcome {
            StepOutcome::Succeeded => StatusPatch::new()
                .status(ResourceStatus::Ready)
                .pipeline(StageStatus::Ready)
                .clear_message(),
            StepOutcome::Unstable => StatusPatch::new()
                .status(ResourceStatus::Unstable)
                .pipeline(StageStatus::Unstable)
                .message("build did not finish within the bounded wait"),
            StepOutcome::Failed { reason } | StepOutcome::Skipped { reason } => StatusPatch::new()
                .status(ResourceStatus::Error)
                .pipeline(StageStatus::Error)
                .message(reason.clone()),
        };
        self.shared
            .collaborators
            .store
            .patch(ctx, resource.id, &patch, None)
            .await
            .log_double_failure("failed to record build outcome");
        info!(resource_id = %resource.id, status = %outcome.status(), "Build step finished");
    }
}
