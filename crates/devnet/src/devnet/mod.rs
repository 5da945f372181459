//! The devnet topology: every node launched for a run, grouped by role.

mod agents;
mod engines;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use alloy_core::primitives::U256;
use anyhow::Context;
use parking_lot::RwLock;
use url::Url;

use crate::{
    Accounts, ClientDefinition, ClientsByRole, ContainerRuntime, Ctx, DevnetConfig, ExecutionNode,
    Node, ProtocolConstants, Role, SetupError, Vault, classify, rpc::Dialer, wait,
};

/// Value of the transfers that [`Devnet::gen_some_l1_blocks`] mines blocks with.
const BLOCK_FILLER_VALUE: u64 = 1_000_000_000;

/// Nodes by role, in launch order. Index 0 is the primary node of a role.
#[derive(Debug, Default)]
struct Topology {
    l1_engines: Vec<Arc<ExecutionNode>>,
    l2_engines: Vec<Arc<ExecutionNode>>,
    relay_agents: Vec<Arc<Node>>,
    /// Engine endpoints of relay agents still being launched.
    pending_relays: Vec<Url>,
    proposers: Vec<Arc<Node>>,
    provers: Vec<Arc<Node>>,
    deployer: Option<Arc<Node>>,
}

fn node_at<T>(nodes: &[Arc<T>], role: Role, index: usize) -> Result<Arc<T>, SetupError> {
    nodes
        .get(index)
        .cloned()
        .ok_or(SetupError::NodeIndexOutOfRange {
            role,
            len: nodes.len(),
            index,
        })
}

/// A rollup devnet assembled from containers.
///
/// Nodes are added in dependency order: rollup engine, settlement engine (which deploys the
/// rollup contracts), then the agents. Node lists only grow; the lock guarding them is held for
/// the append and never across a launch or a remote call.
pub struct Devnet {
    config: Arc<DevnetConfig>,
    clients: ClientsByRole,
    accounts: Accounts,
    runtime: Arc<dyn ContainerRuntime>,
    dialer: Arc<dyn Dialer>,
    topology: RwLock<Topology>,
    launched: AtomicUsize,
    l1_vault: Vault,
    l2_vault: Vault,
}

impl std::fmt::Debug for Devnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Devnet")
            .field("clients", &self.clients.to_string())
            .field("topology", &*self.topology.read())
            .finish()
    }
}

impl Devnet {
    pub fn new(
        config: Arc<DevnetConfig>,
        runtime: Arc<dyn ContainerRuntime>,
        dialer: Arc<dyn Dialer>,
    ) -> anyhow::Result<Self> {
        let clients = classify(&config.clients);
        let accounts = Accounts::from_config(&config).context("Failed to load devnet accounts")?;

        tracing::info!(roles = %clients, "Creating devnet");

        Ok(Self {
            l1_vault: Vault::new(config.l1.chain_id)?,
            l2_vault: Vault::new(config.l2.chain_id)?,
            config,
            clients,
            accounts,
            runtime,
            dialer,
            topology: RwLock::new(Topology::default()),
            launched: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &DevnetConfig {
        &self.config
    }

    pub fn clients(&self) -> &ClientsByRole {
        &self.clients
    }

    pub fn accounts(&self) -> &Accounts {
        &self.accounts
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn l1_vault(&self) -> &Vault {
        &self.l1_vault
    }

    pub fn l2_vault(&self) -> &Vault {
        &self.l2_vault
    }

    fn client(&self, role: Role, index: usize) -> Result<ClientDefinition, SetupError> {
        self.clients.get(role, index).cloned()
    }

    /// A container name unique within this devnet.
    fn container_name(&self, client: &ClientDefinition) -> String {
        let n = self.launched.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}-{n}", self.config.docker.net_name, client.name)
    }

    pub fn l1_engine(&self, index: usize) -> Result<Arc<ExecutionNode>, SetupError> {
        node_at(&self.topology.read().l1_engines, Role::SettlementEngine, index)
    }

    pub fn l2_engine(&self, index: usize) -> Result<Arc<ExecutionNode>, SetupError> {
        node_at(&self.topology.read().l2_engines, Role::RollupEngine, index)
    }

    pub fn relay_agent(&self, index: usize) -> Result<Arc<Node>, SetupError> {
        node_at(&self.topology.read().relay_agents, Role::RelayAgent, index)
    }

    pub fn proposer(&self, index: usize) -> Result<Arc<Node>, SetupError> {
        node_at(&self.topology.read().proposers, Role::Proposer, index)
    }

    pub fn prover(&self, index: usize) -> Result<Arc<Node>, SetupError> {
        node_at(&self.topology.read().provers, Role::Prover, index)
    }

    /// The node that deployed the rollup contracts, once a settlement engine was added.
    pub fn deployer(&self) -> Option<Arc<Node>> {
        self.topology.read().deployer.clone()
    }

    /// Number of nodes launched for `role`, stopped ones included.
    pub fn count(&self, role: Role) -> usize {
        let topology = self.topology.read();
        match role {
            Role::SettlementEngine => topology.l1_engines.len(),
            Role::RollupEngine => topology.l2_engines.len(),
            Role::RelayAgent => topology.relay_agents.len(),
            Role::Proposer => topology.proposers.len(),
            Role::Prover => topology.provers.len(),
            Role::ContractDeployer => usize::from(topology.deployer.is_some()),
        }
    }

    /// Stop a node. It stays in the topology so indices remain stable.
    pub async fn stop_node(&self, node: &Node) -> anyhow::Result<()> {
        node.stop().await
    }

    /// Peer URLs of every rollup engine added so far.
    pub async fn l2_enode_urls(&self) -> anyhow::Result<Vec<String>> {
        let engines = self.topology.read().l2_engines.clone();

        let mut urls = Vec::with_capacity(engines.len());
        for engine in engines.iter().filter(|e| e.is_running()) {
            urls.push(
                engine
                    .enode_url()
                    .await
                    .with_context(|| format!("Failed to get enode URL of {}", engine.name()))?,
            );
        }
        Ok(urls)
    }

    /// Wait until settlement engine `index` reaches `height`.
    pub async fn wait_l1_block(&self, ctx: &Ctx, index: usize, height: u64) -> anyhow::Result<u64> {
        let l1 = self.l1_engine(index)?;
        wait::wait_height(ctx, l1.rpc().as_ref(), wait::greater_equal(height)).await
    }

    /// Protocol constants of the rollup contract on the primary settlement engine.
    pub async fn protocol_constants(&self, ctx: &Ctx) -> anyhow::Result<ProtocolConstants> {
        let contract = self.l1_engine(0)?.rollup_contract()?;
        ctx.run(contract.constants()).await
    }

    /// Grow `engine`'s chain by `count` blocks, funding one fresh account per block.
    async fn gen_some_blocks(
        &self,
        ctx: &Ctx,
        engine: &ExecutionNode,
        vault: &Vault,
        count: u64,
    ) -> anyhow::Result<()> {
        let rpc = engine.rpc().as_ref();
        let start = ctx.run(rpc.block_number()).await?;

        for i in 0..count {
            vault
                .create_account(ctx, rpc, U256::from(BLOCK_FILLER_VALUE))
                .await?;
            wait::wait_height(ctx, rpc, wait::greater(start + i)).await?;
        }

        tracing::debug!(node = %engine.name(), from = start, count, "Generated blocks");
        Ok(())
    }

    pub async fn gen_some_l1_blocks(&self, ctx: &Ctx, count: u64) -> anyhow::Result<()> {
        let l1 = self.l1_engine(0)?;
        self.gen_some_blocks(ctx, &l1, &self.l1_vault, count).await
    }

    pub async fn gen_some_l2_blocks(&self, ctx: &Ctx, count: u64) -> anyhow::Result<()> {
        let l2 = self.l2_engine(0)?;
        self.gen_some_blocks(ctx, &l2, &self.l2_vault, count).await
    }

    /// Mine the settlement blocks a commitment has to age before it can be proposed.
    pub async fn gen_commit_delay_blocks(&self, ctx: &Ctx) -> anyhow::Result<()> {
        let constants = self.protocol_constants(ctx).await?;
        self.gen_some_l1_blocks(ctx, constants.commit_confirmations)
            .await
    }
}
