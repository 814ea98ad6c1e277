//! Core reconciliation logic.
//!
//! The reconciler reads a resource together with whatever it needs to judge
//! it (its children, the libraries not yet bound, its parent), plans the
//! repairs with a pure [`Reconciler::diff`], and applies them through the
//! workflows. A family that was written to within the quiet period is
//! treated as still in flight and left alone.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use appmgr_core::{
    Resource, ResourceId, ResourceKind, ResourceSpec, ResourceStatus, SecurityContext,
    StageStatus, StatusPatch,
};
use appmgr_workflow::{
    load_children, IdentityProvider, ResourceFilter, SourceConvergence, TenantScope,
    WorkflowConfig, Workflows,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::r#loop::Sweeper;
use crate::types::{Observed, ReconcileResult, RepairAction, SweepReport};

/// Configuration for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// A family written to more recently than this is left alone.
    pub quiet_period: Duration,
    /// Idle non-terminal resources with nothing to repair become UNSTABLE.
    pub stale_after: Duration,
}

impl ReconcilerConfig {
    /// Derive the timing from the workflow configuration.
    ///
    /// A running build is polled without writes for up to `build_max_wait`,
    /// so the quiet period has to outlast it.
    pub fn from_workflow(config: &WorkflowConfig) -> Self {
        Self {
            quiet_period: config.build_max_wait + config.build_poll_interval * 2,
            stale_after: config.stale_after,
        }
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when `stale_after` is shorter than
    /// the quiet period.
    pub fn validate(&self) -> Result<()> {
        if self.stale_after < self.quiet_period {
            return Err(Error::invalid_config(format!(
                "stale_after ({:?}) must not be shorter than the quiet period ({:?})",
                self.stale_after, self.quiet_period
            )));
        }
        Ok(())
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from_workflow(&WorkflowConfig::default())
    }
}

/// The reconciler.
pub struct Reconciler {
    workflows: Workflows,
    identity: Arc<dyn IdentityProvider>,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a reconciler timed from the workflow configuration.
    pub fn new(workflows: Workflows, identity: Arc<dyn IdentityProvider>) -> Self {
        let config = ReconcilerConfig::from_workflow(workflows.config());
        Self {
            workflows,
            identity,
            config,
        }
    }

    /// Reconcile one resource.
    ///
    /// Terminal resources and families still in flight yield an empty
    /// result. Failed repairs are reported in the result, not returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource or its relatives cannot be read, or
    /// `PreconditionNotMet` if resuming it is unsafe.
    pub async fn reconcile(&self, ctx: &SecurityContext, id: ResourceId) -> Result<ReconcileResult> {
        let observed = self.observe(ctx, id).await?;
        let actions = self.diff(&observed, Utc::now())?;
        if actions.is_empty() {
            debug!(resource_id = %id, "Nothing to reconcile");
            return Ok(ReconcileResult::noop(id));
        }

        info!(
            resource_id = %id,
            status = %observed.resource().status,
            actions = actions.len(),
            "Reconciling"
        );
        let (actions_taken, actions_failed) = self.apply_actions(ctx, actions).await;
        Ok(ReconcileResult {
            resource: id,
            actions_taken,
            actions_failed,
        })
    }

    /// Read `id` and the records its repair depends on.
    async fn observe(&self, ctx: &SecurityContext, id: ResourceId) -> Result<Observed> {
        let store = self.workflows.collaborators().store.as_ref();
        let resource = store.get(ctx, id).await?;
        if !resource.status.needs_reconcile() {
            return Ok(Observed::Other(resource));
        }

        match &resource.spec {
            ResourceSpec::ApiVersion(spec) => {
                let children = load_children(store, ctx, &resource).await?;
                let unbound_libraries = if children.len() < spec.expected_children {
                    let bound: HashSet<ResourceId> = children
                        .iter()
                        .filter_map(|c| c.library_api_version().ok().map(|s| s.library))
                        .collect();
                    let filter = ResourceFilter::new().kind(ResourceKind::Library);
                    store
                        .find(ctx, &filter)
                        .await?
                        .into_iter()
                        .filter(|l| l.status != ResourceStatus::Deleted)
                        .filter(|l| l.library().is_ok_and(|s| s.component == spec.component))
                        .filter(|l| !bound.contains(&l.id))
                        .collect()
                } else {
                    Vec::new()
                };
                Ok(Observed::ApiVersion {
                    parent: resource,
                    children,
                    unbound_libraries,
                })
            }
            ResourceSpec::LibraryApiVersion(spec) => {
                let parent = store.get(ctx, spec.api_version).await?;
                Ok(Observed::Child {
                    child: resource,
                    parent,
                })
            }
            ResourceSpec::CatalogPackage(_) => Ok(Observed::Package { package: resource }),
            _ => Ok(Observed::Other(resource)),
        }
    }

    /// Plan the repairs of an observed resource as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionNotMet` for a resource whose source stage has
    /// not finished, unless it is stale enough to be escalated instead.
    pub fn diff(&self, observed: &Observed, now: DateTime<Utc>) -> Result<Vec<RepairAction>> {
        let resource = observed.resource();
        if !resource.status.needs_reconcile() {
            return Ok(Vec::new());
        }
        let idle = (now - observed.last_write())
            .to_std()
            .unwrap_or(Duration::ZERO);
        if idle < self.config.quiet_period {
            return Ok(Vec::new());
        }
        let stale = idle >= self.config.stale_after;

        let actions = match observed {
            Observed::ApiVersion {
                parent,
                children,
                unbound_libraries,
            } => match source_stage_gate(parent, stale)? {
                Some(actions) => actions,
                None => plan_api_version(parent, children, unbound_libraries)?,
            },
            Observed::Child { child, parent } => plan_child(child, parent),
            Observed::Package { package } => match source_stage_gate(package, stale)? {
                Some(actions) => actions,
                None if package.pipeline == StageStatus::Ready
                    && package.status == ResourceStatus::Ready =>
                {
                    Vec::new()
                }
                None => vec![RepairAction::ResumePackageBuild {
                    package: package.id,
                }],
            },
            Observed::Other(_) => Vec::new(),
        };

        if actions.is_empty() && stale && resource.status != ResourceStatus::Unstable {
            return Ok(vec![RepairAction::MarkUnstable {
                id: resource.id,
                reason: format!("no progress for {}s", idle.as_secs()),
            }]);
        }
        Ok(actions)
    }

    /// Apply a list of actions.
    async fn apply_actions(
        &self,
        ctx: &SecurityContext,
        actions: Vec<RepairAction>,
    ) -> (Vec<RepairAction>, Vec<(RepairAction, String)>) {
        let mut taken = Vec::new();
        let mut failed = Vec::new();

        for action in actions {
            debug!(action = %action.description(), "Applying repair");
            match self.apply(ctx, &action).await {
                Ok(()) => taken.push(action),
                Err(e) => {
                    warn!(action = %action.description(), error = %e, "Repair failed");
                    failed.push((action, e.to_string()));
                }
            }
        }

        (taken, failed)
    }

    async fn apply(&self, ctx: &SecurityContext, action: &RepairAction) -> Result<()> {
        let store = &self.workflows.collaborators().store;
        match action {
            RepairAction::CreateChild { parent, library } => {
                let parent = store.get(ctx, *parent).await?;
                let library = store.get(ctx, *library).await?;
                let children = self.workflows.library_api_versions();
                let child = children.register(ctx, &parent, &library).await?;
                store
                    .patch(ctx, parent.id, &StatusPatch::new().add_child(child.id), None)
                    .await?;
                children.launch_source_stage(ctx, child.id);
            }
            RepairAction::RelaunchSourceStage { child } => {
                self.workflows
                    .library_api_versions()
                    .launch_source_stage(ctx, *child);
            }
            RepairAction::LaunchBuildStage { parent } => {
                let claimed = self
                    .workflows
                    .detector()
                    .on_source_resolved(ctx, *parent)
                    .await?;
                if claimed == SourceConvergence::LaunchBuild {
                    self.workflows.coordinator().spawn(ctx.clone(), *parent);
                }
            }
            RepairAction::ResumeBuildStage { parent } => {
                self.workflows.coordinator().spawn(ctx.clone(), *parent);
            }
            RepairAction::Finalize { parent } => {
                let convergence = self
                    .workflows
                    .detector()
                    .on_child_resolved(ctx, *parent)
                    .await?;
                debug!(parent_id = %parent, convergence = ?convergence, "Finalize checked");
            }
            RepairAction::ResumePackageBuild { package } => {
                let packages = self.workflows.catalog_packages();
                let ctx = ctx.clone();
                let package = *package;
                tokio::spawn(async move { packages.build(&ctx, package).await });
            }
            RepairAction::MarkUnstable { id, reason } => {
                let patch = StatusPatch::new()
                    .status(ResourceStatus::Unstable)
                    .message(reason.clone());
                store.patch(ctx, *id, &patch, None).await?;
                info!(resource_id = %id, reason = %reason, "Marked UNSTABLE");
            }
            RepairAction::Fail { id, reason } => {
                let patch = StatusPatch::new()
                    .status(ResourceStatus::Error)
                    .message(reason.clone());
                store.patch(ctx, *id, &patch, None).await?;
                info!(resource_id = %id, reason = %reason, "Marked ERROR");
            }
        }
        Ok(())
    }

    /// Sweep every non-terminal resource, shared ones first, then one pass
    /// per tenant under that tenant's identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared pass cannot list resources or the
    /// tenant identities cannot be fetched. Per-resource failures are
    /// recorded in the reports.
    pub async fn sweep(&self) -> Result<Vec<SweepReport>> {
        let system = self.identity.system_context();
        let mut reports = vec![
            self.sweep_pass(&system, TenantScope::Shared, "shared")
                .await?,
        ];

        for ctx in self.identity.tenant_contexts().await? {
            let Some(tenant) = ctx.tenant.clone() else {
                warn!(principal = %ctx.principal, "Tenant identity without a tenant, skipping");
                continue;
            };
            match self
                .sweep_pass(&ctx, TenantScope::Tenant(tenant.clone()), tenant.as_str())
                .await
            {
                Ok(report) => reports.push(report),
                Err(e) => warn!(tenant = %tenant, error = %e, "Sweep pass failed"),
            }
        }

        for report in &reports {
            info!(
                scope = %report.scope,
                examined = report.examined,
                repaired = report.repaired,
                failed = report.failed.len(),
                "Sweep pass finished"
            );
        }
        Ok(reports)
    }

    async fn sweep_pass(
        &self,
        ctx: &SecurityContext,
        scope: TenantScope,
        label: &str,
    ) -> Result<SweepReport> {
        let filter = ResourceFilter::new()
            .statuses([
                ResourceStatus::Pending,
                ResourceStatus::Updating,
                ResourceStatus::Unstable,
            ])
            .scope(scope);
        let candidates = self
            .workflows
            .collaborators()
            .store
            .find(ctx, &filter)
            .await?;

        let mut report = SweepReport::new(label);
        for resource in candidates {
            let result = self.reconcile(ctx, resource.id).await.map_err(|e| {
                warn!(resource_id = %resource.id, error = %e, "Reconcile failed");
                e.to_string()
            });
            report.record(resource.id, &result);
        }
        Ok(report)
    }

    /// Get the configuration.
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

#[async_trait]
impl Sweeper for Reconciler {
    async fn sweep(&self) -> Result<Vec<SweepReport>> {
        Reconciler::sweep(self).await
    }
}

/// Repairs for a resource whose source stage is not READY, or `None` to
/// continue planning.
fn source_stage_gate(resource: &Resource, stale: bool) -> Result<Option<Vec<RepairAction>>> {
    match resource.repository {
        StageStatus::Ready => Ok(None),
        StageStatus::Error => Ok(Some(vec![RepairAction::Fail {
            id: resource.id,
            reason: resource
                .message
                .clone()
                .unwrap_or_else(|| "source stage failed".to_string()),
        }])),
        // Escalated by the caller.
        _ if stale => Ok(Some(Vec::new())),
        stage => Err(appmgr_core::Error::precondition(
            resource.id,
            format!("source stage is {stage}"),
        )
        .into()),
    }
}

fn plan_api_version(
    parent: &Resource,
    children: &[Resource],
    unbound_libraries: &[Resource],
) -> Result<Vec<RepairAction>> {
    let spec = parent.api_version()?;
    let missing = spec.expected_children.saturating_sub(children.len());

    let mut actions: Vec<RepairAction> = unbound_libraries
        .iter()
        .take(missing)
        .map(|library| RepairAction::CreateChild {
            parent: parent.id,
            library: library.id,
        })
        .collect();
    actions.extend(
        children
            .iter()
            .filter(|c| c.status.is_in_progress() && !c.repository.is_resolved())
            .map(|c| RepairAction::RelaunchSourceStage { child: c.id }),
    );
    if missing > 0 || !actions.is_empty() {
        return Ok(actions);
    }

    let action = if parent.pipeline == StageStatus::Pending {
        RepairAction::LaunchBuildStage { parent: parent.id }
    } else if children.iter().any(|c| !c.status.is_terminal()) {
        RepairAction::ResumeBuildStage { parent: parent.id }
    } else {
        RepairAction::Finalize { parent: parent.id }
    };
    Ok(vec![action])
}

fn plan_child(child: &Resource, parent: &Resource) -> Vec<RepairAction> {
    if parent.status.is_terminal() && !child.status.is_terminal() {
        vec![RepairAction::Fail {
            id: child.id,
            reason: format!("parent {} is {}", parent.id, parent.status),
        }]
    } else {
        Vec::new()
    }
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    workflows: Option<Workflows>,
    identity: Option<Arc<dyn IdentityProvider>>,
    config: Option<ReconcilerConfig>,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub const fn new() -> Self {
        Self {
            workflows: None,
            identity: None,
            config: None,
        }
    }

    /// Set the workflows to drive.
    #[must_use]
    pub fn with_workflows(mut self, workflows: Workflows) -> Self {
        self.workflows = Some(workflows);
        self
    }

    /// Set the identity provider.
    #[must_use]
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the workflows or the identity
    /// provider are missing, or the configuration is invalid.
    pub fn build(self) -> Result<Reconciler> {
        let workflows = self
            .workflows
            .ok_or_else(|| Error::invalid_config("workflows are required"))?;
        let identity = self
            .identity
            .ok_or_else(|| Error::invalid_config("identity provider is required"))?;
        let config = self
            .config
            .unwrap_or_else(|| ReconcilerConfig::from_workflow(workflows.config()));
        config.validate()?;

        Ok(Reconciler {
            workflows,
            identity,
            config,
        })
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
