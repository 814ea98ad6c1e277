//! Configuration for the workflows.

use std::time::Duration;

use appmgr_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Workflow configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Branch receiving contract files in component repositories.
    #[serde(default = "default_contract_branch")]
    pub contract_branch: String,

    /// Branch receiving generated sources in library repositories.
    #[serde(default = "default_library_branch")]
    pub library_branch: String,

    /// Branch receiving catalog package archives.
    #[serde(default = "default_catalog_branch")]
    pub catalog_branch: String,

    /// Delay between two status reads of a running build.
    #[serde(with = "appmgr_core::duration::millis", default = "default_poll_interval")]
    pub build_poll_interval: Duration,

    /// How long a build may run before its resource is marked UNSTABLE.
    #[serde(with = "appmgr_core::duration::secs", default = "default_max_wait")]
    pub build_max_wait: Duration,

    /// Re-reads attempted when a convergence write loses a revision race.
    #[serde(default = "default_convergence_retries")]
    pub convergence_retries: u32,

    /// Age after which the reconciler escalates a stuck resource to UNSTABLE.
    #[serde(with = "appmgr_core::duration::secs", default = "default_stale_after")]
    pub stale_after: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            contract_branch: default_contract_branch(),
            library_branch: default_library_branch(),
            catalog_branch: default_catalog_branch(),
            build_poll_interval: default_poll_interval(),
            build_max_wait: default_max_wait(),
            convergence_retries: default_convergence_retries(),
            stale_after: default_stale_after(),
        }
    }
}

impl WorkflowConfig {
    /// Set the build polling interval and bounded wait.
    #[must_use]
    pub const fn build_timing(mut self, poll_interval: Duration, max_wait: Duration) -> Self {
        self.build_poll_interval = poll_interval;
        self.build_max_wait = max_wait;
        self
    }

    /// Set the stale threshold.
    #[must_use]
    pub const fn stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Reject settings the workflows cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for zero durations, a poll interval
    /// longer than the bounded wait, or blank branch names.
    pub fn validate(&self) -> Result<()> {
        if self.build_poll_interval.is_zero() {
            return Err(Error::invalid_config("build_poll_interval must be positive"));
        }
        if self.build_max_wait < self.build_poll_interval {
            return Err(Error::invalid_config(
                "build_max_wait must not be shorter than build_poll_interval",
            ));
        }
        if self.stale_after.is_zero() {
            return Err(Error::invalid_config("stale_after must be positive"));
        }
        let branches = [
            &self.contract_branch,
            &self.library_branch,
            &self.catalog_branch,
        ];
        if branches.iter().any(|b| b.trim().is_empty()) {
            return Err(Error::invalid_config("branch names must not be empty"));
        }
        Ok(())
    }
}

fn default_contract_branch() -> String {
    "master".to_string()
}

fn default_library_branch() -> String {
    "master".to_string()
}

fn default_catalog_branch() -> String {
    "catalog".to_string()
}

const fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

const fn default_max_wait() -> Duration {
    Duration::from_secs(30 * 60)
}

const fn default_convergence_retries() -> u32 {
    5
}

const fn default_stale_after() -> Duration {
    Duration::from_secs(60 * 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WorkflowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.contract_branch, "master");
        assert_eq!(config.convergence_retries, 5);
    }

    #[test]
    fn test_poll_longer_than_wait_is_rejected() {
        let config = WorkflowConfig::default()
            .build_timing(Duration::from_secs(60), Duration::from_secs(10));
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: std::result::Result<WorkflowConfig, _> =
            serde_json::from_str(r#"{"build_poll_interval": 250, "build_max_wait": 120}"#);
        let config = config.ok();
        assert_eq!(
            config.as_ref().map(|c| c.build_poll_interval),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            config.as_ref().map(|c| c.build_max_wait),
            Some(Duration::from_secs(120))
        );
        assert_eq!(
            config.map(|c| c.catalog_branch),
            Some("catalog".to_string())
        );
    }
}
