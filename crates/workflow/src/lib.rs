//! Multi-stage resource workflows with fan-out/fan-in convergence.
//!
//! This crate drives the asynchronous lifecycle of API versions, their
//! per-library children and catalog packages against external
//! collaborators. Key features include:
//!
//! - **Fast synchronous validation**: every request is checked before
//!   anything is registered; work after registration runs in continuations.
//! - **Two progress axes**: each record tracks its source-control stage and
//!   its build stage separately from its overall status.
//! - **Fan-out/fan-in**: one child per library, built in per-language chains
//!   ordered MODEL, INTERFACE, CLIENT, with distinct languages in parallel.
//! - **Exactly-once convergence**: a per-parent critical section plus
//!   revision-checked writes resolve each parent once.
//! - **Bounded build polling**: builds that outlive the bound mark their
//!   resource UNSTABLE.
//!
//! # Example
//!
//! ```ignore
//! use appmgr_workflow::{
//!     ApiVersionRequest, Collaborators, InMemoryRecordStore, InMemorySourceControl,
//!     ScriptedPipelineRunner, TemplateCodeGenerator, WorkflowConfig, Workflows,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> appmgr_core::Result<()> {
//!     let collaborators = Collaborators::new(
//!         Arc::new(InMemoryRecordStore::new()),
//!         Arc::new(InMemorySourceControl::new()),
//!         Arc::new(ScriptedPipelineRunner::new()),
//!         Arc::new(TemplateCodeGenerator::new()),
//!     );
//!     let workflows = Workflows::new(collaborators, WorkflowConfig::default())?;
//!
//!     let parent = workflows.api_versions().create(&ctx, request).await?;
//!     println!("registered {} in {}", parent.id, parent.status);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod api_version;
pub mod catalog_package;
pub mod collaborators;
pub mod config;
pub mod contract;
pub mod coordinator;
pub mod detector;
pub mod engine;
pub mod library_api_version;
pub mod lock;
pub mod memory;
pub mod plan;
pub mod watcher;

pub use api_version::{ApiVersionOrchestrator, ApiVersionRequest};
pub use catalog_package::{package_tag, CatalogPackageOrchestrator, CatalogPackageRequest};
pub use collaborators::{
    BuildHandle, BuildState, CodeGenerator, CommitOutcome, IdentityProvider, PipelineInfo,
    PipelineRunner, RecordStore, ResourceFilter, SourceControl, TenantScope,
};
pub use config::WorkflowConfig;
pub use coordinator::{BuildCoordinator, FanInReport};
pub use detector::{aggregate, load_children, Convergence, ConvergenceDetector, SourceConvergence};
pub use engine::{Collaborators, Workflows};
pub use library_api_version::LibraryApiVersionOrchestrator;
pub use lock::KeyedMutex;
pub use memory::{
    InMemoryRecordStore, InMemorySourceControl, PipelineScript, ScriptedPipelineRunner,
    StaticIdentityProvider, TemplateCodeGenerator,
};
pub use plan::{BuildChain, BuildPlan, BuildStep};
pub use watcher::{current_build, BuildRequest, BuildWait, BuildWatcher, StepOutcome};
