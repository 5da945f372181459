//! Node configuration, launch and handles.

mod execution;

use std::{
    collections::BTreeMap,
    fmt,
    net::IpAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use alloy_core::primitives::{Address, B256};
use anyhow::Context;
use url::Url;

pub use execution::ExecutionNode;

use crate::{
    ClientDefinition, ContainerHandle, ContainerRuntime, ContainerSpec, ExecOutput, Role,
    SetupError, env,
};

/// Container ports every engine image listens on.
pub const HTTP_RPC_PORT: u16 = 8545;
pub const WS_RPC_PORT: u16 = 8546;
pub const ENGINE_PORT: u16 = 8551;

/// Launch options for one node.
///
/// Every set option maps to one launch environment key; see [`NodeConfig::env`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeConfig {
    pub role: Option<Role>,
    pub client: Option<ClientDefinition>,
    /// Container name. Defaults to the client name.
    pub name: Option<String>,

    pub network_id: Option<u64>,
    pub l1_chain_id: Option<u64>,
    pub l2_chain_id: Option<u64>,
    pub clique_period: Option<u64>,
    pub bootnodes: Vec<String>,
    /// `full`, `light` or `snap`.
    pub node_type: Option<String>,
    pub log_level: Option<String>,
    pub jwt_secret: Option<String>,

    pub l1_endpoint: Option<Url>,
    pub l2_endpoint: Option<Url>,
    pub l2_engine_endpoint: Option<Url>,
    pub l1_rollup_address: Option<Address>,
    pub l2_rollup_address: Option<Address>,

    pub proposer_private_key: Option<String>,
    pub prover_private_key: Option<String>,
    pub throwaway_private_key: Option<String>,
    pub deployer_private_key: Option<String>,
    pub deployer_address: Option<Address>,
    pub fee_recipient: Option<Address>,

    pub propose_interval: Option<Duration>,
    /// Seconds between deliberately invalid proposals.
    pub produce_invalid_blocks_interval: Option<u64>,
    pub l2_genesis_hash: Option<B256>,

    pub enable_l2_p2p: bool,
    /// Disable the runtime's check that the node opened its RPC port.
    pub no_live_check: bool,
}

fn format_interval(interval: Duration) -> String {
    if interval.subsec_millis() == 0 {
        format!("{}s", interval.as_secs())
    } else {
        format!("{}ms", interval.as_millis())
    }
}

impl NodeConfig {
    /// The flat launch environment.
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let mut set = |key: &str, value: String| {
            out.insert(key.to_string(), value);
        };

        if let Some(role) = self.role {
            set(env::TAIKO_ROLE, role.to_string());
        }

        let rollup_engine = self.role == Some(Role::RollupEngine);
        if let Some(id) = self.network_id {
            let key = if rollup_engine { env::TAIKO_NETWORK_ID } else { env::NETWORK_ID };
            set(key, id.to_string());
        }
        if !self.bootnodes.is_empty() {
            let key = if rollup_engine { env::TAIKO_BOOTNODE } else { env::BOOTNODE };
            set(key, self.bootnodes.join(","));
        }
        if let Some(id) = self.l1_chain_id {
            set(env::TAIKO_L1_CHAIN_ID, id.to_string());
        }
        if let Some(id) = self.l2_chain_id {
            set(env::TAIKO_L2_CHAIN_ID, id.to_string());
        }
        if let Some(period) = self.clique_period {
            set(env::CLIQUE_PERIOD, period.to_string());
            set(env::TAIKO_L1_CLIQUE_PERIOD, period.to_string());
        }
        if let Some(node_type) = &self.node_type {
            set(env::NODE_TYPE, node_type.clone());
        }
        if let Some(level) = &self.log_level {
            set(env::LOG_LEVEL, level.clone());
        }
        if let Some(secret) = &self.jwt_secret {
            set(env::TAIKO_JWT_SECRET, secret.clone());
        }

        if let Some(url) = &self.l1_endpoint {
            // The deployer reads the settlement chain from its own key.
            let key = if self.role == Some(Role::ContractDeployer) {
                env::TAIKO_MAINNET_URL
            } else {
                env::TAIKO_L1_RPC_ENDPOINT
            };
            set(key, url.to_string());
        }
        if let Some(url) = &self.l2_endpoint {
            set(env::TAIKO_L2_RPC_ENDPOINT, url.to_string());
        }
        if let Some(url) = &self.l2_engine_endpoint {
            set(env::TAIKO_L2_ENGINE_ENDPOINT, url.to_string());
        }
        if let Some(address) = self.l1_rollup_address {
            set(env::TAIKO_L1_ROLLUP_ADDRESS, address.to_checksum(None));
        }
        if let Some(address) = self.l2_rollup_address {
            set(env::TAIKO_L2_ROLLUP_ADDRESS, address.to_checksum(None));
        }

        if let Some(key) = &self.proposer_private_key {
            set(env::TAIKO_PROPOSER_PRIVATE_KEY, key.clone());
        }
        if let Some(key) = &self.prover_private_key {
            set(env::TAIKO_PROVER_PRIVATE_KEY, key.clone());
        }
        if let Some(key) = &self.throwaway_private_key {
            set(env::TAIKO_THROWAWAY_BLOCK_BUILDER_PRIVATE_KEY, key.clone());
        }
        if let Some(key) = &self.deployer_private_key {
            set(env::TAIKO_PRIVATE_KEY, key.clone());
        }
        if let Some(address) = self.deployer_address {
            set(env::TAIKO_L1_DEPLOYER_ADDRESS, address.to_checksum(None));
        }
        if let Some(address) = self.fee_recipient {
            set(env::TAIKO_SUGGESTED_FEE_RECIPIENT, address.to_checksum(None));
        }

        if let Some(interval) = self.propose_interval {
            set(env::TAIKO_PROPOSE_INTERVAL, format_interval(interval));
        }
        if let Some(interval) = self.produce_invalid_blocks_interval {
            set(env::TAIKO_PRODUCE_INVALID_BLOCKS_INTERVAL, interval.to_string());
        }
        if let Some(hash) = self.l2_genesis_hash {
            set(env::TAIKO_L2_GENESIS_BLOCK_HASH, format!("0x{}", hex::encode(hash)));
        }

        if self.enable_l2_p2p {
            set(env::TAIKO_ENABLE_L2_P2P, "true".to_string());
        }
        if self.no_live_check {
            set(env::CHECK_LIVE_PORT, "0".to_string());
        }

        out
    }

    /// Check required fields for the configured role.
    pub fn validate(&self) -> Result<(), SetupError> {
        let role = self.role.ok_or_else(|| SetupError::Topology {
            reason: "node configuration has no role".to_string(),
        })?;
        let invalid = |reason: String| SetupError::InvalidNodeConfig { role, reason };

        let client = self
            .client
            .as_ref()
            .ok_or_else(|| invalid("no client definition".to_string()))?;
        if !client.has_role(role) {
            return Err(invalid(format!("client {} does not declare the role", client.name)));
        }

        let mut missing = Vec::new();
        let mut require = |present: bool, field: &'static str| {
            if !present {
                missing.push(field);
            }
        };

        match role {
            Role::SettlementEngine | Role::RollupEngine => {
                require(self.network_id.is_some(), "network_id");
            }
            Role::RelayAgent => {
                require(self.l1_endpoint.is_some(), "l1_endpoint");
                require(self.l2_endpoint.is_some(), "l2_endpoint");
                require(self.l2_engine_endpoint.is_some(), "l2_engine_endpoint");
                require(self.l1_rollup_address.is_some(), "l1_rollup_address");
                require(self.l2_rollup_address.is_some(), "l2_rollup_address");
                require(self.throwaway_private_key.is_some(), "throwaway_private_key");
                require(self.jwt_secret.is_some(), "jwt_secret");
            }
            Role::Proposer => {
                require(self.l1_endpoint.is_some(), "l1_endpoint");
                require(self.l2_endpoint.is_some(), "l2_endpoint");
                require(self.l1_rollup_address.is_some(), "l1_rollup_address");
                require(self.l2_rollup_address.is_some(), "l2_rollup_address");
                require(self.proposer_private_key.is_some(), "proposer_private_key");
                require(self.fee_recipient.is_some(), "fee_recipient");
                require(self.propose_interval.is_some(), "propose_interval");
            }
            Role::Prover => {
                require(self.l1_endpoint.is_some(), "l1_endpoint");
                require(self.l2_endpoint.is_some(), "l2_endpoint");
                require(self.l1_rollup_address.is_some(), "l1_rollup_address");
                require(self.l2_rollup_address.is_some(), "l2_rollup_address");
                require(self.prover_private_key.is_some(), "prover_private_key");
            }
            Role::ContractDeployer => {
                require(self.l1_endpoint.is_some(), "l1_endpoint");
                require(self.deployer_private_key.is_some(), "deployer_private_key");
                require(self.deployer_address.is_some(), "deployer_address");
                require(self.l2_genesis_hash.is_some(), "l2_genesis_hash");
                require(self.l2_rollup_address.is_some(), "l2_rollup_address");
                require(self.l2_chain_id.is_some(), "l2_chain_id");
            }
        }

        if !missing.is_empty() {
            return Err(invalid(format!("missing {}", missing.join(", "))));
        }

        let zero_address = [self.l1_rollup_address, self.l2_rollup_address]
            .into_iter()
            .flatten()
            .any(|a| a.is_zero());
        if zero_address {
            return Err(invalid("rollup contract address is zero".to_string()));
        }

        if self.propose_interval.is_some_and(|i| i.is_zero()) {
            return Err(invalid("propose_interval must be greater than 0".to_string()));
        }

        Ok(())
    }
}

/// Builder for [`NodeConfig`]. Required fields are checked by [`NodeBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct NodeBuilder {
    config: NodeConfig,
}

impl NodeBuilder {
    pub fn new(role: Role, client: ClientDefinition) -> Self {
        Self {
            config: NodeConfig {
                role: Some(role),
                client: Some(client),
                ..Default::default()
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    pub fn network_id(mut self, id: u64) -> Self {
        self.config.network_id = Some(id);
        self
    }

    pub fn l1_chain_id(mut self, id: u64) -> Self {
        self.config.l1_chain_id = Some(id);
        self
    }

    pub fn l2_chain_id(mut self, id: u64) -> Self {
        self.config.l2_chain_id = Some(id);
        self
    }

    pub fn clique_period(mut self, seconds: u64) -> Self {
        self.config.clique_period = Some(seconds);
        self
    }

    pub fn bootnodes(mut self, urls: impl IntoIterator<Item = String>) -> Self {
        self.config.bootnodes.extend(urls);
        self
    }

    pub fn node_type(mut self, node_type: impl Into<String>) -> Self {
        self.config.node_type = Some(node_type.into());
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = Some(level.into());
        self
    }

    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.jwt_secret = Some(secret.into());
        self
    }

    pub fn l1_endpoint(mut self, url: Url) -> Self {
        self.config.l1_endpoint = Some(url);
        self
    }

    pub fn l2_endpoint(mut self, url: Url) -> Self {
        self.config.l2_endpoint = Some(url);
        self
    }

    pub fn l2_engine_endpoint(mut self, url: Url) -> Self {
        self.config.l2_engine_endpoint = Some(url);
        self
    }

    pub fn l1_rollup_address(mut self, address: Address) -> Self {
        self.config.l1_rollup_address = Some(address);
        self
    }

    pub fn l2_rollup_address(mut self, address: Address) -> Self {
        self.config.l2_rollup_address = Some(address);
        self
    }

    pub fn proposer_private_key(mut self, key: impl Into<String>) -> Self {
        self.config.proposer_private_key = Some(key.into());
        self
    }

    pub fn prover_private_key(mut self, key: impl Into<String>) -> Self {
        self.config.prover_private_key = Some(key.into());
        self
    }

    pub fn throwaway_private_key(mut self, key: impl Into<String>) -> Self {
        self.config.throwaway_private_key = Some(key.into());
        self
    }

    pub fn deployer(mut self, private_key: impl Into<String>, address: Address) -> Self {
        self.config.deployer_private_key = Some(private_key.into());
        self.config.deployer_address = Some(address);
        self
    }

    pub fn fee_recipient(mut self, address: Address) -> Self {
        self.config.fee_recipient = Some(address);
        self
    }

    pub fn propose_interval(mut self, interval: Duration) -> Self {
        self.config.propose_interval = Some(interval);
        self
    }

    pub fn produce_invalid_blocks_interval(mut self, seconds: u64) -> Self {
        self.config.produce_invalid_blocks_interval = Some(seconds);
        self
    }

    pub fn l2_genesis_hash(mut self, hash: B256) -> Self {
        self.config.l2_genesis_hash = Some(hash);
        self
    }

    pub fn enable_l2_p2p(mut self, enable: bool) -> Self {
        self.config.enable_l2_p2p = enable;
        self
    }

    pub fn no_live_check(mut self) -> Self {
        self.config.no_live_check = true;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<NodeConfig, SetupError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Validate, then start exactly one container.
    pub async fn launch(self, runtime: Arc<dyn ContainerRuntime>) -> anyhow::Result<Node> {
        let config = self.build()?;
        Node::launch(config, runtime).await
    }
}

/// A running node.
pub struct Node {
    role: Role,
    client: ClientDefinition,
    container: ContainerHandle,
    config: NodeConfig,
    runtime: Arc<dyn ContainerRuntime>,
    stopped: AtomicBool,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("role", &self.role)
            .field("client", &self.client.name)
            .field("container", &self.container)
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl Node {
    async fn launch(config: NodeConfig, runtime: Arc<dyn ContainerRuntime>) -> anyhow::Result<Self> {
        let (Some(role), Some(client)) = (config.role, config.client.clone()) else {
            return Err(SetupError::Topology {
                reason: "node configuration is incomplete".to_string(),
            }
            .into());
        };

        let spec = ContainerSpec {
            name: config.name.clone().unwrap_or_else(|| client.name.clone()),
            image: client.image.clone(),
            env: config.env(),
        };

        tracing::debug!(%role, client = %client.name, container = %spec.name, "Launching node");

        let container = runtime
            .start(&spec)
            .await
            .map_err(|e| SetupError::Launch {
                role,
                client: client.name.clone(),
                reason: format!("{e:#}"),
            })?;

        tracing::info!(
            %role,
            client = %client.name,
            container = %container.container_name,
            ip = %container.ip,
            "Node started"
        );

        Ok(Self {
            role,
            client,
            container,
            config,
            runtime,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn client(&self) -> &ClientDefinition {
        &self.client
    }

    /// The container name, unique within the devnet.
    pub fn name(&self) -> &str {
        &self.container.container_name
    }

    pub fn container(&self) -> &ContainerHandle {
        &self.container
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn ip(&self) -> IpAddr {
        self.container.ip
    }

    pub fn http_rpc_url(&self) -> anyhow::Result<Url> {
        Url::parse(&format!("http://{}:{}", self.ip(), HTTP_RPC_PORT))
            .context("Failed to parse HTTP URL")
    }

    /// WebSocket endpoint. Some clients serve it under `/ws`.
    pub fn ws_rpc_url(&self) -> anyhow::Result<Url> {
        let url = match self.client.name.as_str() {
            "besu" => format!("ws://{}:{}/ws", self.ip(), WS_RPC_PORT),
            "nethermind" => format!("http://{}:{}/ws", self.ip(), WS_RPC_PORT),
            _ => format!("ws://{}:{}", self.ip(), WS_RPC_PORT),
        };
        Url::parse(&url).context("Failed to parse WebSocket URL")
    }

    pub fn engine_url(&self) -> anyhow::Result<Url> {
        Url::parse(&format!("http://{}:{}", self.ip(), ENGINE_PORT))
            .context("Failed to parse engine URL")
    }

    /// The node's peer-discovery URL, as reported by the process inside the container.
    pub async fn enode_url(&self) -> anyhow::Result<String> {
        let output = self.exec(&["enode.sh"]).await?;
        let enode = output.stdout.trim();

        if !output.success() || !enode.starts_with("enode://") {
            anyhow::bail!(
                "{} has no enode URL yet (exit code {}): {}",
                self.name(),
                output.exit_code,
                if enode.is_empty() { output.stderr.trim() } else { enode }
            );
        }

        Ok(enode.to_string())
    }

    pub async fn exec(&self, cmd: &[&str]) -> anyhow::Result<ExecOutput> {
        self.runtime
            .exec(&self.container.container_id, cmd)
            .await
            .with_context(|| format!("Failed to exec {cmd:?} in {}", self.name()))
    }

    /// False once [`Node::stop`] has been called.
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Stop the container. Stopping twice is a no-op.
    pub async fn stop(&self) -> anyhow::Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!(node = %self.name(), role = %self.role, "Stopping node");
        self.runtime
            .stop(&self.container.container_id)
            .await
            .with_context(|| format!("Failed to stop {}", self.name()))
    }
}
