use std::{path::PathBuf, time::Duration};

use clap::Parser;
use rollnet_devnet::DEFAULT_CONCURRENCY;
use tracing::level_filters::LevelFilter;

use crate::suites::SuiteName;

/// Default bound on a whole run, in minutes.
const DEFAULT_TIMEOUT_MINUTES: u64 = 60;

#[derive(Parser)]
#[command(name = "rollnet")]
#[command(
    author,
    version,
    about = "Run scenario suites against ephemeral rollup devnets"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "ROLLNET_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to a rollnet.toml configuration file, or a directory containing one.
    #[arg(long, alias = "conf", env = "ROLLNET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base name of the docker networks created for the run.
    ///
    /// Overrides `docker.net_name` from the configuration.
    #[arg(short, long, visible_alias = "name", env = "ROLLNET_NETWORK_NAME")]
    pub network: Option<String>,

    /// Maximum number of scenarios running at once within a suite.
    #[arg(short, long, env = "ROLLNET_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Bound on the whole run, in minutes.
    #[arg(long, env = "ROLLNET_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_MINUTES)]
    pub timeout: u64,

    /// Only run these suites. Can be repeated.
    #[arg(short, long, env = "ROLLNET_SUITE", value_delimiter = ',')]
    pub suite: Vec<SuiteName>,

    /// Only run scenarios whose name contains one of these patterns. Can be repeated.
    #[arg(long, env = "ROLLNET_SCENARIO", value_delimiter = ',')]
    pub scenario: Vec<String>,

    /// List the suites and their scenarios, then exit.
    #[arg(long)]
    pub list: bool,

    /// Skips the cleanup of docker containers when the program exits.
    #[arg(long, env = "ROLLNET_NO_CLEANUP")]
    pub no_cleanup: bool,
}

impl Cli {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.saturating_mul(60))
    }

    pub fn selects_suite(&self, suite: SuiteName) -> bool {
        self.suite.is_empty() || self.suite.contains(&suite)
    }

    pub fn selects_scenario(&self, scenario: &str) -> bool {
        self.scenario.is_empty() || self.scenario.iter().any(|p| scenario.contains(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["rollnet"]);

        assert_eq!(cli.verbosity, LevelFilter::INFO);
        assert_eq!(cli.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(cli.timeout(), Duration::from_secs(3600));
        assert!(cli.selects_suite(SuiteName::Sync));
        assert!(cli.selects_scenario("anything"));
    }

    #[test]
    fn test_filters() {
        let cli = Cli::parse_from([
            "rollnet",
            "--suite",
            "blocks,proposals",
            "--scenario",
            "invalid",
            "-v",
            "debug",
        ]);

        assert_eq!(cli.verbosity, LevelFilter::DEBUG);
        assert!(cli.selects_suite(SuiteName::Blocks));
        assert!(!cli.selects_suite(SuiteName::Sync));
        assert!(cli.selects_scenario("propose-invalid-tx-list-bytes"));
        assert!(!cli.selects_scenario("too-many-pending-blocks"));
    }
}
