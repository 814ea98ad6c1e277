//! Observed state, repair actions and sweep reports.

use appmgr_core::{Resource, ResourceId};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// What the reconciler read about one resource before planning.
#[derive(Debug, Clone)]
pub enum Observed {
    /// An API version with its registered children and the libraries of its
    /// component that have no child yet.
    ApiVersion {
        parent: Resource,
        children: Vec<Resource>,
        unbound_libraries: Vec<Resource>,
    },
    /// A library API version and its parent.
    Child { child: Resource, parent: Resource },
    /// A catalog package.
    Package { package: Resource },
    /// Anything the reconciler does not drive.
    Other(Resource),
}

impl Observed {
    /// The resource being reconciled.
    pub const fn resource(&self) -> &Resource {
        match self {
            Self::ApiVersion { parent, .. } => parent,
            Self::Child { child, .. } => child,
            Self::Package { package } => package,
            Self::Other(resource) => resource,
        }
    }

    /// Most recent write to the resource or any of its children.
    pub fn last_write(&self) -> DateTime<Utc> {
        match self {
            Self::ApiVersion {
                parent, children, ..
            } => children
                .iter()
                .map(|c| c.updated_at)
                .fold(parent.updated_at, |latest, t| latest.max(t)),
            other => other.resource().updated_at,
        }
    }
}

/// Repairs the reconciler can apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairAction {
    /// Register the missing child for `library` and start its source stage.
    CreateChild { parent: ResourceId, library: ResourceId },
    /// Run the source stage of a child that never finished it.
    RelaunchSourceStage { child: ResourceId },
    /// Claim and start the build stage of a parent whose sources all resolved.
    LaunchBuildStage { parent: ResourceId },
    /// Re-run the build chains of a parent with unfinished children.
    ResumeBuildStage { parent: ResourceId },
    /// Run the final convergence check of a parent.
    Finalize { parent: ResourceId },
    /// Build a published catalog package, or resume watching its build.
    ResumePackageBuild { package: ResourceId },
    /// Mark a resource UNSTABLE.
    MarkUnstable { id: ResourceId, reason: String },
    /// Mark a resource ERROR.
    Fail { id: ResourceId, reason: String },
}

impl RepairAction {
    /// Get the resource this action targets.
    pub const fn target(&self) -> ResourceId {
        match self {
            Self::CreateChild { parent, .. }
            | Self::LaunchBuildStage { parent }
            | Self::ResumeBuildStage { parent }
            | Self::Finalize { parent } => *parent,
            Self::RelaunchSourceStage { child } => *child,
            Self::ResumePackageBuild { package } => *package,
            Self::MarkUnstable { id, .. } | Self::Fail { id, .. } => *id,
        }
    }

    /// Get a description of the action.
    pub fn description(&self) -> String {
        match self {
            Self::CreateChild { parent, library } => {
                format!("create child of {parent} for library {library}")
            }
            Self::RelaunchSourceStage { child } => format!("relaunch source stage of {child}"),
            Self::LaunchBuildStage { parent } => format!("launch build stage of {parent}"),
            Self::ResumeBuildStage { parent } => format!("resume build stage of {parent}"),
            Self::Finalize { parent } => format!("finalize {parent}"),
            Self::ResumePackageBuild { package } => format!("resume build of package {package}"),
            Self::MarkUnstable { id, reason } => format!("mark {id} unstable: {reason}"),
            Self::Fail { id, reason } => format!("fail {id}: {reason}"),
        }
    }
}

/// Result of reconciling one resource.
#[derive(Debug, Clone)]
pub struct ReconcileResult {
    /// The reconciled resource.
    pub resource: ResourceId,
    /// Actions that were applied.
    pub actions_taken: Vec<RepairAction>,
    /// Actions that failed, with the error.
    pub actions_failed: Vec<(RepairAction, String)>,
}

impl ReconcileResult {
    /// Result of a resource that needed nothing.
    pub const fn noop(resource: ResourceId) -> Self {
        Self {
            resource,
            actions_taken: Vec::new(),
            actions_failed: Vec::new(),
        }
    }

    /// Whether nothing was attempted.
    pub fn is_noop(&self) -> bool {
        self.actions_taken.is_empty() && self.actions_failed.is_empty()
    }

    /// Check if all actions succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.actions_failed.is_empty()
    }
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// `shared` or the tenant of the pass.
    pub scope: String,
    /// Resources looked at.
    pub examined: usize,
    /// Resources with at least one applied repair.
    pub repaired: usize,
    /// Resources whose reconciliation failed, with the reason.
    pub failed: Vec<(ResourceId, String)>,
}

impl SweepReport {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ..Self::default()
        }
    }

    /// Fold one resource's result into the report.
    pub fn record(&mut self, id: ResourceId, result: &std::result::Result<ReconcileResult, String>) {
        self.examined += 1;
        match result {
            Ok(result) if !result.all_succeeded() => {
                let reason = result
                    .actions_failed
                    .iter()
                    .map(|(action, e)| format!("{}: {e}", action.description()))
                    .join("; ");
                self.failed.push((id, reason));
            }
            Ok(result) if !result.is_noop() => self.repaired += 1,
            Ok(_) => {}
            Err(reason) => self.failed.push((id, reason.clone())),
        }
    }
}
