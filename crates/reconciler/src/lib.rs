//! Background repair of resources left mid-workflow.
//!
//! Workflow continuations run detached from the request that started them.
//! A crash, or a failure while reporting a failure, can leave a resource
//! PENDING forever. The reconciler finds such resources and finishes them:
//!
//! - **Observe**: read the resource with its children, its unbound
//!   libraries or its parent
//! - **Diff**: plan [`RepairAction`]s from what was read
//! - **Apply**: hand each action back to the workflows
//!
//! A family written to within the quiet period is still in flight and is
//! left alone. A resource whose source stage never finished is not resumed;
//! reconciling it fails until it is stale enough to be marked UNSTABLE.
//!
//! ## Sweep
//!
//! [`Reconciler::sweep`] runs one pass over shared resources with the system
//! identity, then one pass per tenant with that tenant's identity. A
//! failure on one resource is logged and reported; the pass goes on.
//! [`ReconciliationLoop`] repeats the sweep on an interval.
//!
//! # Example
//!
//! ```ignore
//! use appmgr_reconciler::{LoopConfig, ReconcilerBuilder, ReconciliationLoop};
//! use std::sync::Arc;
//!
//! let reconciler = ReconcilerBuilder::new()
//!     .with_workflows(workflows)
//!     .with_identity(identity)
//!     .build()?;
//! let mut loop_runner = ReconciliationLoop::new(Arc::new(reconciler), LoopConfig::default());
//! let stopper = loop_runner.stopper();
//! tokio::spawn(async move { loop_runner.run().await });
//! // ...
//! stopper.stop();
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod r#loop;
pub mod reconciler;
pub mod types;

// Re-export main types
pub use error::{Error, Result};
pub use r#loop::{LoopConfig, LoopStopper, ReconciliationLoop, Sweeper};
pub use reconciler::{Reconciler, ReconcilerBuilder, ReconcilerConfig};
pub use types::{Observed, ReconcileResult, RepairAction, SweepReport};
