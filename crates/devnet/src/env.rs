//! Environment keys understood by the node images.

pub const NETWORK_ID: &str = "HIVE_NETWORK_ID";
pub const BOOTNODE: &str = "HIVE_BOOTNODE";
pub const CLIQUE_PERIOD: &str = "HIVE_CLIQUE_PERIOD";
/// `full`, `light` or `snap`.
pub const NODE_TYPE: &str = "HIVE_NODETYPE";
pub const LOG_LEVEL: &str = "HIVE_LOGLEVEL";
/// Set to `0` for agents that expose no RPC port to probe.
pub const CHECK_LIVE_PORT: &str = "HIVE_CHECK_LIVE_PORT";

pub const TAIKO_NETWORK_ID: &str = "HIVE_TAIKO_NETWORK_ID";
pub const TAIKO_BOOTNODE: &str = "HIVE_TAIKO_BOOTNODE";
pub const TAIKO_ROLE: &str = "HIVE_TAIKO_ROLE";
pub const TAIKO_JWT_SECRET: &str = "HIVE_TAIKO_JWT_SECRET";
pub const TAIKO_ENABLE_L2_P2P: &str = "HIVE_TAIKO_ENABLE_L2_P2P";

pub const TAIKO_L1_RPC_ENDPOINT: &str = "HIVE_TAIKO_L1_RPC_ENDPOINT";
pub const TAIKO_L2_RPC_ENDPOINT: &str = "HIVE_TAIKO_L2_RPC_ENDPOINT";
pub const TAIKO_L2_ENGINE_ENDPOINT: &str = "HIVE_TAIKO_L2_ENGINE_ENDPOINT";
pub const TAIKO_L1_ROLLUP_ADDRESS: &str = "HIVE_TAIKO_L1_ROLLUP_ADDRESS";
pub const TAIKO_L2_ROLLUP_ADDRESS: &str = "HIVE_TAIKO_L2_ROLLUP_ADDRESS";

pub const TAIKO_PROPOSER_PRIVATE_KEY: &str = "HIVE_TAIKO_PROPOSER_PRIVATE_KEY";
pub const TAIKO_SUGGESTED_FEE_RECIPIENT: &str = "HIVE_TAIKO_SUGGESTED_FEE_RECIPIENT";
pub const TAIKO_PROPOSE_INTERVAL: &str = "HIVE_TAIKO_PROPOSE_INTERVAL";
pub const TAIKO_PRODUCE_INVALID_BLOCKS_INTERVAL: &str =
    "HIVE_TAIKO_PRODUCE_INVALID_BLOCKS_INTERVAL";
pub const TAIKO_THROWAWAY_BLOCK_BUILDER_PRIVATE_KEY: &str =
    "HIVE_TAIKO_THROWAWAY_BLOCK_BUILDER_PRIVATE_KEY";
pub const TAIKO_PROVER_PRIVATE_KEY: &str = "HIVE_TAIKO_PROVER_PRIVATE_KEY";

pub const TAIKO_L1_CHAIN_ID: &str = "HIVE_TAIKO_L1_CHAIN_ID";
pub const TAIKO_L1_CLIQUE_PERIOD: &str = "HIVE_TAIKO_L1_CLIQUE_PERIOD";
pub const TAIKO_L2_CHAIN_ID: &str = "HIVE_TAIKO_L2_CHAIN_ID";

// Contract deployer inputs.
pub const TAIKO_L1_DEPLOYER_ADDRESS: &str = "HIVE_TAIKO_L1_DEPLOYER_ADDRESS";
pub const TAIKO_L2_GENESIS_BLOCK_HASH: &str = "HIVE_TAIKO_L2_GENESIS_BLOCK_HASH";
pub const TAIKO_MAINNET_URL: &str = "HIVE_TAIKO_MAINNET_URL";
pub const TAIKO_PRIVATE_KEY: &str = "HIVE_TAIKO_PRIVATE_KEY";
