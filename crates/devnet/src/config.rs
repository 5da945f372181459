//! Devnet configuration.
//!
//! One [`DevnetConfig`] is built at process start and shared by reference with every component.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::{Address, address};
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{Accounts, ClientDefinition};

/// Default name of the configuration file.
pub const CONFIG_FILENAME: &str = "rollnet.toml";

/// Prefix of environment variables overriding the configuration (`ROLLNET_L1__CHAIN_ID`).
pub const ENV_PREFIX: &str = "ROLLNET_";

pub const DEFAULT_L1_CHAIN_ID: u64 = 31336;
pub const DEFAULT_CLIQUE_PERIOD: u64 = 0;
pub const DEFAULT_L2_CHAIN_ID: u64 = 167003;

pub const DEFAULT_DEPLOYER_PRIVATE_KEY: &str =
    "2bdd21761a483f71054e14f5b827213567971c676928d9a1808cbfa4b7501200";
pub const DEFAULT_PROVER_PRIVATE_KEY: &str =
    "6bff9a8ffd7f94f43f4f5f642be8a3f32a94c1f316d90862884b2e276293b6ee";
/// The rollup's golden-touch key, used by the relay agent for throwaway blocks.
pub const DEFAULT_THROWAWAY_PRIVATE_KEY: &str =
    "92954368afd3caa1f3ce3ead0069c1af414054aefe1ef9aeacc1bf426222ce38";
pub const DEFAULT_JWT_SECRET: &str =
    "c49690b5a9bc72c7b451b48c5fee2b542e66559d840a133d090769abc56e39e7";

pub const DEFAULT_L1_ROLLUP_ADDRESS: Address = address!("232e1128a21bbffbc8d6befacb10137f37a653a0");
/// The rollup-side contract is predeployed in the rollup genesis.
pub const DEFAULT_L2_ROLLUP_ADDRESS: Address = address!("0000777700000000000000000000000000000001");

pub const DEFAULT_PROPOSE_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_NODE_UP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_GENESIS_PATH: &str = "/genesis.json";
pub const DEFAULT_NETWORK_NAME: &str = "rollnet";

/// Settlement chain configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1Config {
    pub chain_id: u64,
    pub network_id: u64,
    /// Clique block period in seconds. 0 mines on demand.
    pub clique_period: u64,
    pub deployer_private_key: String,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_L1_CHAIN_ID,
            network_id: DEFAULT_L1_CHAIN_ID,
            clique_period: DEFAULT_CLIQUE_PERIOD,
            deployer_private_key: DEFAULT_DEPLOYER_PRIVATE_KEY.to_string(),
        }
    }
}

/// Rollup chain configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Config {
    pub chain_id: u64,
    pub network_id: u64,
    pub jwt_secret: String,
    pub proposer_private_key: String,
    pub fee_recipient_private_key: String,
    pub prover_private_key: String,
    pub throwaway_private_key: String,
    pub propose_interval_secs: u64,
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_L2_CHAIN_ID,
            network_id: DEFAULT_L2_CHAIN_ID,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            proposer_private_key: DEFAULT_DEPLOYER_PRIVATE_KEY.to_string(),
            fee_recipient_private_key: DEFAULT_DEPLOYER_PRIVATE_KEY.to_string(),
            prover_private_key: DEFAULT_PROVER_PRIVATE_KEY.to_string(),
            throwaway_private_key: DEFAULT_THROWAWAY_PRIVATE_KEY.to_string(),
            propose_interval_secs: DEFAULT_PROPOSE_INTERVAL_SECS,
        }
    }
}

impl L2Config {
    pub fn propose_interval(&self) -> Duration {
        Duration::from_secs(self.propose_interval_secs)
    }
}

/// Addresses the rollup contracts are deployed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployments {
    pub l1_rollup_address: Address,
    pub l2_rollup_address: Address,
}

impl Default for Deployments {
    fn default() -> Self {
        Self {
            l1_rollup_address: DEFAULT_L1_ROLLUP_ADDRESS,
            l2_rollup_address: DEFAULT_L2_ROLLUP_ADDRESS,
        }
    }
}

/// Configuration for the Docker runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DockerConfig {
    /// The name of the Docker network to create.
    pub net_name: String,
    /// Whether to skip cleanup of containers on exit.
    pub no_cleanup: bool,
    /// Whether to forward container logs to the tracing output.
    pub stream_logs: bool,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            net_name: DEFAULT_NETWORK_NAME.to_string(),
            no_cleanup: false,
            stream_logs: false,
        }
    }
}

/// The complete devnet configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevnetConfig {
    pub l1: L1Config,
    pub l2: L2Config,
    pub deployments: Deployments,
    pub docker: DockerConfig,

    /// Client images available to the devnet.
    #[serde(default)]
    pub clients: Vec<ClientDefinition>,

    /// Timeout of a scenario's bounded contexts.
    pub rpc_timeout_secs: u64,
    /// How long a freshly started engine gets to answer its first RPC call.
    pub node_up_timeout_secs: u64,

    /// Settlement genesis file. When it exists its chain id takes precedence over `l1.chain_id`.
    pub genesis_path: Option<PathBuf>,
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            l1: L1Config::default(),
            l2: L2Config::default(),
            deployments: Deployments::default(),
            docker: DockerConfig::default(),
            clients: Vec::new(),
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
            node_up_timeout_secs: DEFAULT_NODE_UP_TIMEOUT_SECS,
            genesis_path: Some(PathBuf::from(DEFAULT_GENESIS_PATH)),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenesisChainConfig {
    chain_id: Option<u64>,
}

#[derive(Deserialize)]
struct Genesis {
    config: Option<GenesisChainConfig>,
}

impl DevnetConfig {
    /// Load the configuration from defaults, an optional TOML file and `ROLLNET_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.exists() {
                anyhow::bail!("Configuration file not found: {}", path.display());
            }
            let file = if path.is_dir() {
                path.join(CONFIG_FILENAME)
            } else {
                path.to_path_buf()
            };
            figment = figment.merge(Toml::file(file));
        }

        let mut config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to load configuration")?;

        config.apply_genesis()?;
        config.validate()?;

        tracing::debug!(
            l1_chain_id = config.l1.chain_id,
            l2_chain_id = config.l2.chain_id,
            clients = config.clients.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Save the configuration as TOML.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Read the settlement chain id from the genesis file, if present.
    fn apply_genesis(&mut self) -> Result<()> {
        let Some(path) = self.genesis_path.as_ref().filter(|p| p.exists()) else {
            return Ok(());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read genesis from {}", path.display()))?;
        let genesis: Genesis = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse genesis {}", path.display()))?;

        if let Some(chain_id) = genesis.config.and_then(|c| c.chain_id) {
            tracing::debug!(chain_id, path = %path.display(), "Using settlement chain id from genesis");
            self.l1.chain_id = chain_id;
        }

        Ok(())
    }

    /// Check the configuration is usable before anything is launched.
    pub fn validate(&self) -> Result<()> {
        Accounts::from_config(self).context("Invalid account configuration")?;

        let jwt = self.l2.jwt_secret.trim_start_matches("0x");
        if jwt.len() != 64 || hex::decode(jwt).is_err() {
            anyhow::bail!("l2.jwt_secret must be 32 bytes of hex");
        }
        if self.l2.propose_interval_secs == 0 {
            anyhow::bail!("l2.propose_interval_secs must be greater than 0");
        }
        if self.rpc_timeout_secs == 0 || self.node_up_timeout_secs == 0 {
            anyhow::bail!("timeouts must be greater than 0");
        }
        if self.deployments.l1_rollup_address.is_zero() || self.deployments.l2_rollup_address.is_zero() {
            anyhow::bail!("rollup contract addresses must be non-zero");
        }

        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn node_up_timeout(&self) -> Duration {
        Duration::from_secs(self.node_up_timeout_secs)
    }
}
