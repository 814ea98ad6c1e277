//! Parent convergence detection.
//!
//! A parent resolves only when every expected child is registered and has
//! stopped moving. The check and the write it leads to form one critical
//! section per parent: an in-process [`KeyedMutex`](crate::lock::KeyedMutex)
//! plus a revision-checked patch, retried on conflict. Calling either entry
//! point again for an already-resolved parent has no effect.

use std::sync::Arc;

use appmgr_core::{
    Error, Resource, ResourceId, ResourceStatus, Result, SecurityContext, StageStatus,
    StatusPatch,
};
use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::collaborators::RecordStore;
use crate::engine::Shared;

/// Answer of a convergence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// At least one child is missing or still moving.
    StillPending,
    /// The parent holds a resolved status.
    Converged {
        status: ResourceStatus,
        /// Whether this call wrote the status.
        transitioned: bool,
    },
}

impl Convergence {
    /// Resolved status, if any.
    pub const fn status(self) -> Option<ResourceStatus> {
        match self {
            Self::StillPending => None,
            Self::Converged { status, .. } => Some(status),
        }
    }

    /// Whether this call moved the parent.
    pub const fn transitioned(self) -> bool {
        matches!(
            self,
            Self::Converged {
                transitioned: true,
                ..
            }
        )
    }
}

/// Answer of the source-stage join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceConvergence {
    /// Some child has not finished its source stage.
    StillPending,
    /// This call claimed the build stage; the caller must launch it.
    LaunchBuild,
    /// The build stage was already claimed, or the parent is resolved.
    AlreadyLaunched,
}

/// Outcome the children dictate for their parent, `None` while any moves.
///
/// Every child must have stopped before an error is reported, so no build
/// is still running against a parent that already reads ERROR.
pub fn aggregate(children: &[Resource]) -> Option<ResourceStatus> {
    let settled = |status: ResourceStatus| {
        matches!(
            status,
            ResourceStatus::Ready
                | ResourceStatus::Error
                | ResourceStatus::Unstable
                | ResourceStatus::Deleted
        )
    };
    if !children.iter().all(|c| settled(c.status)) {
        return None;
    }

    let failed = children
        .iter()
        .any(|c| matches!(c.status, ResourceStatus::Error | ResourceStatus::Deleted));
    if failed {
        Some(ResourceStatus::Error)
    } else if children.iter().any(|c| c.status == ResourceStatus::Unstable) {
        Some(ResourceStatus::Unstable)
    } else {
        Some(ResourceStatus::Ready)
    }
}

/// Load the children a parent currently references.
///
/// # Errors
///
/// Returns an error if the parent is not an API version or a child cannot
/// be read.
pub async fn load_children(
    store: &dyn RecordStore,
    ctx: &SecurityContext,
    parent: &Resource,
) -> Result<Vec<Resource>> {
    let spec = parent.api_version()?;
    try_join_all(
        spec.libraries_api_versions
            .iter()
            .map(|id| store.get(ctx, *id)),
    )
    .await
}

const fn stage_for(status: ResourceStatus) -> StageStatus {
    match status {
        ResourceStatus::Ready => StageStatus::Ready,
        ResourceStatus::Unstable => StageStatus::Unstable,
        _ => StageStatus::Error,
    }
}

/// Decides when a parent resolves.
#[derive(Clone)]
pub struct ConvergenceDetector {
    pub(crate) shared: Arc<Shared>,
}

impl ConvergenceDetector {
    pub(crate) const fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    fn store(&self) -> &dyn RecordStore {
        self.shared.collaborators.store.as_ref()
    }

    /// Re-evaluate a parent after one of its children finished building.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent cannot be read or written, including
    /// [`Error::RevisionConflict`] once the retries are spent.
    pub async fn on_child_resolved(
        &self,
        ctx: &SecurityContext,
        parent_id: ResourceId,
    ) -> Result<Convergence> {
        let _guard = self.shared.parent_locks.lock(&parent_id).await;
        let mut attempt = 0;
        loop {
            match self.try_converge(ctx, parent_id).await {
                Err(conflict @ Error::RevisionConflict { .. }) => {
                    attempt += 1;
                    if attempt > self.shared.config.convergence_retries {
                        return Err(conflict);
                    }
                    debug!(parent_id = %parent_id, attempt, "Convergence write lost a race, re-reading");
                }
                other => return other,
            }
        }
    }

    async fn try_converge(&self, ctx: &SecurityContext, parent_id: ResourceId) -> Result<Convergence> {
        let parent = self.store().get(ctx, parent_id).await?;
        if parent.status.is_terminal() {
            return Ok(Convergence::Converged {
                status: parent.status,
                transitioned: false,
            });
        }

        let spec = parent.api_version()?;
        if parent.repository != StageStatus::Ready
            || spec.libraries_api_versions.len() < spec.expected_children
        {
            return Ok(Convergence::StillPending);
        }
        // Children of an earlier run are not final until the build stage of
        // this run was claimed.
        if parent.pipeline == StageStatus::Pending {
            return Ok(Convergence::StillPending);
        }

        let children = load_children(self.store(), ctx, &parent).await?;
        let Some(status) = aggregate(&children) else {
            return Ok(Convergence::StillPending);
        };
        if status == parent.status {
            return Ok(Convergence::Converged {
                status,
                transitioned: false,
            });
        }

        let mut patch = StatusPatch::new().status(status).pipeline(stage_for(status));
        patch = match status {
            ResourceStatus::Ready => patch.clear_message(),
            _ => {
                let failed = children
                    .iter()
                    .filter(|c| c.status != ResourceStatus::Ready)
                    .count();
                patch.message(format!("{failed} of {} libraries did not build", children.len()))
            }
        };
        self.store()
            .patch(ctx, parent_id, &patch, Some(parent.revision))
            .await?;

        info!(parent_id = %parent_id, status = %status, "Parent converged");
        Ok(Convergence::Converged {
            status,
            transitioned: true,
        })
    }

    /// Re-evaluate a parent after one of its children finished its source stage.
    ///
    /// Returns [`SourceConvergence::LaunchBuild`] to exactly one caller per
    /// run of the parent.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent cannot be read or written.
    pub async fn on_source_resolved(
        &self,
        ctx: &SecurityContext,
        parent_id: ResourceId,
    ) -> Result<SourceConvergence> {
        let _guard = self.shared.parent_locks.lock(&parent_id).await;
        let mut attempt = 0;
        loop {
            match self.try_claim_build(ctx, parent_id).await {
                Err(conflict @ Error::RevisionConflict { .. }) => {
                    attempt += 1;
                    if attempt > self.shared.config.convergence_retries {
                        return Err(conflict);
                    }
                }
                other => return other,
            }
        }
    }

    async fn try_claim_build(
        &self,
        ctx: &SecurityContext,
        parent_id: ResourceId,
    ) -> Result<SourceConvergence> {
        let parent = self.store().get(ctx, parent_id).await?;
        if parent.status.is_terminal() || parent.pipeline != StageStatus::Pending {
            return Ok(SourceConvergence::AlreadyLaunched);
        }

        let spec = parent.api_version()?;
        if parent.repository != StageStatus::Ready
            || spec.libraries_api_versions.len() < spec.expected_children
        {
            return Ok(SourceConvergence::StillPending);
        }

        let children = load_children(self.store(), ctx, &parent).await?;
        if !children.iter().all(|c| c.repository.is_resolved()) {
            return Ok(SourceConvergence::StillPending);
        }

        let patch = StatusPatch::new().pipeline(StageStatus::Running);
        self.store()
            .patch(ctx, parent_id, &patch, Some(parent.revision))
            .await?;

        let failed = children
            .iter()
            .filter(|c| c.repository != StageStatus::Ready)
            .count();
        if failed > 0 {
            warn!(parent_id = %parent_id, failed, "Launching build stage with failed sources");
        }
        info!(parent_id = %parent_id, children = children.len(), "Source stage converged");
        Ok(SourceConvergence::LaunchBuild)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use appmgr_core::{ArtifactType, Language, LibraryApiVersionSpec, NewResource, ResourceSpec};
    use chrono::Utc;

    fn child(status: ResourceStatus) -> Resource {
        let spec = ResourceSpec::LibraryApiVersion(LibraryApiVersionSpec {
            library: ResourceId::new(),
            api_version: ResourceId::new(),
            language: Language::new("java"),
            artifact_type: ArtifactType::Model,
            version: "1.0.0".parse().unwrap(),
            build: None,
            commit_id: None,
        });
        Resource::from_new(
            ResourceId::new(),
            NewResource::pending(spec).with_status(status),
            Utc::now(),
        )
    }

    #[test]
    fn test_all_ready_is_ready() {
        let children = vec![child(ResourceStatus::Ready), child(ResourceStatus::Ready)];
        assert_eq!(aggregate(&children), Some(ResourceStatus::Ready));
    }

    #[test]
    fn test_error_waits_for_running_siblings() {
        let children = vec![child(ResourceStatus::Error), child(ResourceStatus::Pending)];
        assert_eq!(aggregate(&children), None);
    }

    #[test]
    fn test_error_beats_unstable() {
        let children = vec![
            child(ResourceStatus::Unstable),
            child(ResourceStatus::Error),
            child(ResourceStatus::Ready),
        ];
        assert_eq!(aggregate(&children), Some(ResourceStatus::Error));
    }

    #[test]
    fn test_unstable_without_errors() {
        let children = vec![child(ResourceStatus::Unstable), child(ResourceStatus::Ready)];
        assert_eq!(aggregate(&children), Some(ResourceStatus::Unstable));
    }

    #[test]
    fn test_convergence_accessors() {
        let converged = Convergence::Converged {
            status: ResourceStatus::Ready,
            transitioned: true,
        };
        assert_eq!(converged.status(), Some(ResourceStatus::Ready));
        assert!(converged.transitioned());
        assert!(!Convergence::StillPending.transitioned());
    }
}
