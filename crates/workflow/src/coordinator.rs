//! Build-stage fan-out and fan-in.
//!
//! Each language chain runs as its own task in a [`JoinSet`]. Inside a
//! chain a step that does not succeed fails every later step without
//! building it. After each step the parent is re-evaluated, and once more
//! at the join.

use std::sync::Arc;

use appmgr_core::{ResourceId, Result, ResultExt, SecurityContext};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info};

use crate::detector::{load_children, ConvergenceDetector};
use crate::engine::Shared;
use crate::library_api_version::LibraryApiVersionOrchestrator;
use crate::plan::{BuildChain, BuildPlan};
use crate::watcher::StepOutcome;

/// Per-child results of one build stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanInReport {
    pub outcomes: Vec<(ResourceId, StepOutcome)>,
}

impl FanInReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Outcome recorded for `child`.
    pub fn outcome(&self, child: ResourceId) -> Option<&StepOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == child)
            .map(|(_, outcome)| outcome)
    }
}

/// Runs the build stage of one parent.
#[derive(Clone)]
pub struct BuildCoordinator {
    shared: Arc<Shared>,
}

impl BuildCoordinator {
    pub(crate) const fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    fn children(&self) -> LibraryApiVersionOrchestrator {
        LibraryApiVersionOrchestrator::new(Arc::clone(&self.shared))
    }

    fn detector(&self) -> ConvergenceDetector {
        ConvergenceDetector::new(Arc::clone(&self.shared))
    }

    /// Run the build stage in the background.
    pub fn spawn(&self, ctx: SecurityContext, parent: ResourceId) -> JoinHandle<Option<FanInReport>> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator
                .run(&ctx, parent)
                .await
                .log_double_failure("build stage failed to start")
        })
    }

    /// Build every child of `parent` and wait for all chains.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent or its children cannot be read.
    pub async fn run(&self, ctx: &SecurityContext, parent: ResourceId) -> Result<FanInReport> {
        let store = self.shared.collaborators.store.as_ref();
        let record = store.get(ctx, parent).await?;
        let children = load_children(store, ctx, &record).await?;
        let plan = BuildPlan::from_children(&children)?;
        info!(
            parent_id = %parent,
            chains = plan.chains.len(),
            steps = plan.step_count(),
            "Starting build stage"
        );

        let mut chains = JoinSet::new();
        for chain in plan.chains {
            let coordinator = self.clone();
            let ctx = ctx.clone();
            chains.spawn(async move { coordinator.run_chain(&ctx, parent, chain).await });
        }

        let mut report = FanInReport::default();
        while let Some(joined) = chains.join_next().await {
            match joined {
                Ok(outcomes) => report.outcomes.extend(outcomes),
                Err(e) => error!(parent_id = %parent, error = %e, "Build chain task failed"),
            }
        }

        self.detector()
            .on_child_resolved(ctx, parent)
            .await
            .log_failure("convergence check after build stage failed");
        info!(
            parent_id = %parent,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Build stage finished"
        );
        Ok(report)
    }

    async fn run_chain(
        &self,
        ctx: &SecurityContext,
        parent: ResourceId,
        chain: BuildChain,
    ) -> Vec<(ResourceId, StepOutcome)> {
        let children = self.children();
        let detector = self.detector();
        let mut blocked: Option<String> = None;
        let mut outcomes = Vec::with_capacity(chain.steps.len());

        for step in chain.steps {
            let outcome = match &blocked {
                Some(reason) => children.skip(ctx, step.child, reason).await,
                None => children.build(ctx, step.child).await,
            };
            if !outcome.is_success() && blocked.is_none() {
                blocked = Some(format!(
                    "dependency failed: {} {} did not build",
                    chain.language, step.artifact_type
                ));
            }
            detector
                .on_child_resolved(ctx, parent)
                .await
                .log_failure("convergence check failed");
            outcomes.push((step.child, outcome));
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let ok = ResourceId::new();
        let bad = ResourceId::new();
        let report = FanInReport {
            outcomes: vec![
                (ok, StepOutcome::Succeeded),
                (
                    bad,
                    StepOutcome::Skipped {
                        reason: "dependency failed".into(),
                    },
                ),
            ],
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.outcome(ok), Some(&StepOutcome::Succeeded));
        assert_eq!(report.outcome(ResourceId::new()), None);
    }
}
