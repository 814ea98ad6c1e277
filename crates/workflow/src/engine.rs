//! Workflow engine: the shared context every orchestrator runs against.
//!
//! Orchestrators are cheap handles over one [`Shared`] value. Continuations
//! capture a handle by value, so a spawned task never borrows from the
//! request that launched it.

use std::sync::Arc;

use appmgr_core::{ResourceId, Result};

use crate::api_version::ApiVersionOrchestrator;
use crate::catalog_package::CatalogPackageOrchestrator;
use crate::collaborators::{CodeGenerator, PipelineRunner, RecordStore, SourceControl};
use crate::config::WorkflowConfig;
use crate::coordinator::BuildCoordinator;
use crate::detector::ConvergenceDetector;
use crate::library_api_version::LibraryApiVersionOrchestrator;
use crate::lock::KeyedMutex;
use crate::watcher::BuildWatcher;

/// The external services the workflows drive.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn RecordStore>,
    pub source_control: Arc<dyn SourceControl>,
    pub pipelines: Arc<dyn PipelineRunner>,
    pub codegen: Arc<dyn CodeGenerator>,
}

impl Collaborators {
    /// Bundle the collaborators.
    pub fn new(
        store: Arc<dyn RecordStore>,
        source_control: Arc<dyn SourceControl>,
        pipelines: Arc<dyn PipelineRunner>,
        codegen: Arc<dyn CodeGenerator>,
    ) -> Self {
        Self {
            store,
            source_control,
            pipelines,
            codegen,
        }
    }
}

pub(crate) struct Shared {
    pub(crate) collaborators: Collaborators,
    pub(crate) config: WorkflowConfig,
    /// Per-parent critical section of the convergence check.
    pub(crate) parent_locks: KeyedMutex<ResourceId>,
}

/// Entry point to the workflows.
#[derive(Clone)]
pub struct Workflows {
    shared: Arc<Shared>,
}

impl Workflows {
    /// Create the workflows over `collaborators`.
    ///
    /// # Errors
    ///
    /// Returns [`appmgr_core::Error::InvalidConfig`] if `config` is unusable.
    pub fn new(collaborators: Collaborators, config: WorkflowConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                collaborators,
                config,
                parent_locks: KeyedMutex::new(),
            }),
        })
    }

    /// API version (parent) workflows.
    pub fn api_versions(&self) -> ApiVersionOrchestrator {
        ApiVersionOrchestrator::new(Arc::clone(&self.shared))
    }

    /// Library API version (child) workflows.
    pub fn library_api_versions(&self) -> LibraryApiVersionOrchestrator {
        LibraryApiVersionOrchestrator::new(Arc::clone(&self.shared))
    }

    /// Catalog package workflows.
    pub fn catalog_packages(&self) -> CatalogPackageOrchestrator {
        CatalogPackageOrchestrator::new(Arc::clone(&self.shared))
    }

    /// Parent convergence checks.
    pub fn detector(&self) -> ConvergenceDetector {
        ConvergenceDetector::new(Arc::clone(&self.shared))
    }

    /// Build-stage fan-out.
    pub fn coordinator(&self) -> BuildCoordinator {
        BuildCoordinator::new(Arc::clone(&self.shared))
    }

    /// Bounded build polling.
    pub fn watcher(&self) -> BuildWatcher {
        BuildWatcher::new(Arc::clone(&self.shared))
    }

    /// The collaborators the workflows drive.
    pub fn collaborators(&self) -> &Collaborators {
        &self.shared.collaborators
    }

    /// Active configuration.
    pub fn config(&self) -> &WorkflowConfig {
        &self.shared.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{
        InMemoryRecordStore, InMemorySourceControl, ScriptedPipelineRunner, TemplateCodeGenerator,
    };
    use std::time::Duration;

    fn collaborators() -> Collaborators {
        Collaborators::new(
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemorySourceControl::new()),
            Arc::new(ScriptedPipelineRunner::new()),
            Arc::new(TemplateCodeGenerator::new()),
        )
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config =
            WorkflowConfig::default().build_timing(Duration::ZERO, Duration::from_secs(1));
        assert!(Workflows::new(collaborators(), config).is_err());
    }

    #[test]
    fn test_handles_share_one_context() {
        let workflows = Workflows::new(collaborators(), WorkflowConfig::default());
        assert!(workflows.is_ok());
        if let Ok(workflows) = workflows {
            let detector = workflows.detector();
            assert!(Arc::ptr_eq(&detector.shared, &workflows.shared));
        }
    }
}
