//! Orchestration and condition-sync engine for ephemeral rollup devnets.
//!
//! A [`Devnet`] assembles a settlement chain, a rollup chain and the agents that connect them
//! (relay, proposer, prover) as containers, in dependency order. Scenarios are then run against
//! it with [`run_scenarios`], using the blocking primitives from [`wait`] to synchronize with the
//! eventually-consistent state of the chains.

mod accounts;
pub use accounts::{Account, Accounts};

mod config;
pub use config::{
    CONFIG_FILENAME, DEFAULT_CLIQUE_PERIOD, DEFAULT_DEPLOYER_PRIVATE_KEY, DEFAULT_GENESIS_PATH,
    DEFAULT_JWT_SECRET, DEFAULT_L1_CHAIN_ID, DEFAULT_L1_ROLLUP_ADDRESS, DEFAULT_L2_CHAIN_ID,
    DEFAULT_L2_ROLLUP_ADDRESS, DEFAULT_NODE_UP_TIMEOUT_SECS, DEFAULT_PROPOSE_INTERVAL_SECS,
    DEFAULT_PROVER_PRIVATE_KEY, DEFAULT_RPC_TIMEOUT_SECS, DEFAULT_THROWAWAY_PRIVATE_KEY,
    Deployments, DevnetConfig, DockerConfig, ENV_PREFIX, L1Config, L2Config,
};

mod context;
pub use context::{Ctx, CtxError};

pub mod contracts;
pub use contracts::{BlockProven, ProtocolConstants, RollupContract, StateVariables};

pub mod docker;
pub use docker::{ContainerHandle, ContainerRuntime, ContainerSpec, DockerImage, DockerRuntime, ExecOutput};

mod devnet;
pub use devnet::Devnet;

mod error;
pub use error::SetupError;

pub mod env;

pub mod node;
pub use node::{ExecutionNode, Node, NodeBuilder, NodeConfig};

pub mod pipelines;
pub use pipelines::{Pipeline, PipelineParams};

mod proposer;
pub use proposer::{CommitReceipt, ProposalMeta, TestProposer};

mod roles;
pub use roles::{ClientDefinition, ClientsByRole, Role, classify};

pub mod rpc;
pub use rpc::{ChainRpc, Dialer, HttpDialer, RpcClient, TxReceipt};

mod runner;
pub use runner::{
    DEFAULT_CONCURRENCY, Outcome, RunParams, RunReport, Scenario, ScenarioEnv, ScenarioFn,
    ScenarioOutcome, run_scenarios,
};

mod vault;
pub use vault::{VAULT_SOURCE_ADDRESS, Vault};

pub mod wait;

#[cfg(test)]
pub(crate) mod testing;
