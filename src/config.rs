//! Application configuration: a TOML file, then environment overrides.

use std::path::Path;
use std::time::Duration;

use appmgr_core::{Error, Result};
use appmgr_reconciler::LoopConfig;
use appmgr_workflow::WorkflowConfig;
use serde::{Deserialize, Serialize};

/// Overrides the sweep interval, in seconds.
pub const ENV_SWEEP_INTERVAL: &str = "APPMGR_SWEEP_INTERVAL_SECS";
/// Overrides the bounded build wait, in seconds.
pub const ENV_BUILD_MAX_WAIT: &str = "APPMGR_BUILD_MAX_WAIT_SECS";
/// Overrides the build polling interval, in seconds.
pub const ENV_BUILD_POLL_INTERVAL: &str = "APPMGR_BUILD_POLL_INTERVAL_SECS";

/// Everything the binary needs to start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Workflow timing and branches.
    pub workflow: WorkflowConfig,

    /// Scheduler trigger.
    #[serde(rename = "loop")]
    pub sweep: LoopConfig,

    /// Tenants swept after the shared pass.
    pub tenants: Vec<String>,
}

impl AppConfig {
    /// Load from `path` if given, apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for unparsable files or values, and
    /// an I/O error if the file cannot be read.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a TOML document. Missing sections take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the document does not parse.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::invalid_config(format!("failed to parse config: {e}")))
    }

    /// Apply overrides looked up by environment variable name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a value that is not a whole
    /// number of seconds.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secs) = seconds(&lookup, ENV_SWEEP_INTERVAL)? {
            self.sweep.interval = secs;
        }
        if let Some(secs) = seconds(&lookup, ENV_BUILD_MAX_WAIT)? {
            self.workflow.build_max_wait = secs;
        }
        if let Some(secs) = seconds(&lookup, ENV_BUILD_POLL_INTERVAL)? {
            self.workflow.build_poll_interval = secs;
        }
        Ok(())
    }

    /// Reject settings the workflows or the loop cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.workflow.validate()?;
        self.sweep
            .validate()
            .map_err(|e| Error::invalid_config(e.to_string()))?;
        if self.tenants.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::invalid_config("tenant names must not be empty"));
        }
        Ok(())
    }
}

fn seconds<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| Error::invalid_config(format!("{key}='{raw}': {e}")))
        })
        .transpose()
}
