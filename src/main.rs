//! # appmgr - Reconciliation scheduler
//!
//! ## Initialization Sequence
//!
//! 1. **Configuration** - TOML file, then environment overrides
//! 2. **Collaborators** - record store, source control, pipeline runner and
//!    code generator backends
//! 3. **Workflows** - the orchestrators over those collaborators
//! 4. **Reconciliation Loop** - sweeps shared resources, then each tenant
//!
//! Any failure during initialization halts startup with a clear error.
//! Ctrl+C stops the loop after the sweep in progress.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use std::sync::Arc;

use anyhow::{Context, Result};
use appmgr::cli::Cli;
use appmgr::config::AppConfig;
use appmgr_core::{SecurityContext, TenantId};
use appmgr_reconciler::{ReconcilerBuilder, ReconciliationLoop};
use appmgr_workflow::{
    Collaborators, IdentityProvider, InMemoryRecordStore, InMemorySourceControl,
    ScriptedPipelineRunner, StaticIdentityProvider, TemplateCodeGenerator, Workflows,
};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context(
        "Configuration is invalid. Check the file passed with --config and the APPMGR_* variables",
    )?;
    info!(
        tenants = config.tenants.len(),
        interval_secs = config.sweep.interval.as_secs(),
        "Configuration loaded"
    );

    let workflows = Workflows::new(init_collaborators(), config.workflow.clone())
        .context("Failed to initialize workflows")?;
    let reconciler = ReconcilerBuilder::new()
        .with_workflows(workflows)
        .with_identity(init_identity(&config))
        .build()
        .context("Failed to initialize reconciler")?;
    let mut loop_runner = ReconciliationLoop::new(Arc::new(reconciler), config.sweep.clone());

    if cli.once {
        let reports = loop_runner.run_once().await.context("Sweep failed")?;
        for report in reports {
            info!(
                scope = %report.scope,
                examined = report.examined,
                repaired = report.repaired,
                failed = report.failed.len(),
                "Sweep report"
            );
        }
        return Ok(());
    }

    let stopper = loop_runner.stopper();
    let handle = tokio::spawn(async move { loop_runner.run().await });
    info!("appmgr is running. Press Ctrl+C to stop.");
    wait_for_shutdown().await;
    stopper.stop();

    handle
        .await
        .context("Reconciliation loop task failed")?
        .context("Reconciliation loop stopped with an error")?;
    info!("appmgr stopped gracefully");
    Ok(())
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Backends the workflows run against.
fn init_collaborators() -> Collaborators {
    Collaborators::new(
        Arc::new(InMemoryRecordStore::new()),
        Arc::new(InMemorySourceControl::new()),
        Arc::new(ScriptedPipelineRunner::new()),
        Arc::new(TemplateCodeGenerator::new()),
    )
}

/// The system identity plus one identity per configured tenant.
fn init_identity(config: &AppConfig) -> Arc<dyn IdentityProvider> {
    let tenants = config
        .tenants
        .iter()
        .map(|tenant| SecurityContext::new(format!("reconciler@{tenant}"), Some(TenantId::new(tenant))))
        .collect();
    Arc::new(StaticIdentityProvider::new(SecurityContext::system(), tenants))
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
