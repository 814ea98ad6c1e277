//! CLI definitions using clap.

use std::path::PathBuf;

use clap::Parser;

/// App manager orchestration core.
#[derive(Parser, Debug)]
#[command(name = "appmgr")]
#[command(version)]
#[command(about = "Runs the app manager reconciliation sweep")]
#[command(
    long_about = "Repairs API versions, library API versions and catalog packages left mid-workflow. \
                  Sweeps shared resources, then each configured tenant, on a fixed interval until Ctrl+C."
)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Run a single sweep and exit
    #[arg(long, default_value_t = false)]
    pub once: bool,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_defaults_run_the_loop() {
        let cli = Cli::try_parse_from(["appmgr"]).unwrap();
        assert!(cli.config.is_none());
        assert!(!cli.once);
    }

    #[test]
    fn test_once_with_config() {
        let cli = Cli::try_parse_from(["appmgr", "--config", "appmgr.toml", "--once"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("appmgr.toml")));
        assert!(cli.once);
    }
}
