//! Periodic sweep loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::types::SweepReport;

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Interval between sweeps.
    #[serde(with = "appmgr_core::duration::secs", default = "default_interval")]
    pub interval: Duration,
    /// Maximum consecutive failed sweeps before stopping.
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,
    /// Whether to stop on the first failed sweep.
    #[serde(default)]
    pub stop_on_error: bool,
}

fn default_interval() -> Duration {
    Duration::from_secs(300)
}

const fn default_max_errors() -> usize {
    10
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            max_errors: default_max_errors(),
            stop_on_error: false,
        }
    }
}

impl LoopConfig {
    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero interval or error budget.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::invalid_config("sweep interval must be positive"));
        }
        if self.max_errors == 0 {
            return Err(Error::invalid_config("max_errors must be at least 1"));
        }
        Ok(())
    }
}

/// One full sweep over every resource the loop is responsible for.
#[async_trait]
pub trait Sweeper: Send + Sync {
    async fn sweep(&self) -> Result<Vec<SweepReport>>;
}

/// Scheduler trigger that runs a [`Sweeper`] on a fixed interval.
pub struct ReconciliationLoop {
    sweeper: Arc<dyn Sweeper>,
    config: LoopConfig,
    stop_rx: watch::Receiver<bool>,
    stop_tx: watch::Sender<bool>,
}

impl ReconciliationLoop {
    /// Create a new reconciliation loop.
    pub fn new(sweeper: Arc<dyn Sweeper>, config: LoopConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            sweeper,
            config,
            stop_rx,
            stop_tx,
        }
    }

    /// Run until stopped or the error budget is spent.
    ///
    /// # Errors
    ///
    /// Returns the sweep error with `stop_on_error`, or
    /// [`Error::ReconcileFailed`] after `max_errors` consecutive failures.
    pub async fn run(&mut self) -> Result<()> {
        self.config.validate()?;
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting reconciliation loop"
        );

        let mut consecutive_errors = 0usize;
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_once().await {
                        Ok(reports) => {
                            consecutive_errors = 0;
                            let failed: usize = reports.iter().map(|r| r.failed.len()).sum();
                            debug!(passes = reports.len(), failed, "Sweep finished");
                        }
                        Err(e) => {
                            consecutive_errors += 1;
                            error!(
                                error = %e,
                                consecutive = consecutive_errors,
                                "Sweep error"
                            );

                            if self.config.stop_on_error {
                                return Err(e);
                            }

                            if consecutive_errors >= self.config.max_errors {
                                error!("Max errors reached, stopping loop");
                                return Err(Error::reconcile_failed(format!(
                                    "max errors ({}) reached",
                                    self.config.max_errors
                                )));
                            }
                        }
                    }
                }
                _ = self.stop_rx.changed() => {
                    if *self.stop_rx.borrow() {
                        info!("Reconciliation loop stopped");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Run a single sweep.
    ///
    /// # Errors
    ///
    /// Returns the sweeper's error.
    pub async fn run_once(&self) -> Result<Vec<SweepReport>> {
        self.sweeper.sweep().await
    }

    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }
}

/// Handle to stop a reconciliation loop.
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}
