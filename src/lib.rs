#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # appmgr
//!
//! Command line and configuration of the app manager binary, plus
//! re-exports of the workspace crates.

pub use appmgr_core;
pub use appmgr_reconciler;
pub use appmgr_workflow;

pub mod cli;
pub mod config;
