use std::sync::{Arc, OnceLock};

use alloy_core::primitives::{Address, B256};
use derive_more::Deref;

use crate::{Node, RollupContract, SetupError, rpc::ChainRpc, rpc::Dialer};

/// An engine node with its chain client and the deployment facts recorded on it.
#[derive(Deref)]
pub struct ExecutionNode {
    #[deref]
    node: Node,
    rpc: Arc<dyn ChainRpc>,
    rollup_address: OnceLock<Address>,
    genesis_hash: OnceLock<B256>,
}

impl std::fmt::Debug for ExecutionNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionNode")
            .field("node", &self.node)
            .field("endpoint", &self.rpc.endpoint())
            .field("rollup_address", &self.rollup_address.get())
            .finish()
    }
}

impl ExecutionNode {
    /// Wrap a launched engine, dialing its HTTP endpoint.
    pub fn dial(node: Node, dialer: &dyn Dialer) -> Result<Self, SetupError> {
        let endpoint = node.http_rpc_url().map_err(|e| SetupError::Dial {
            endpoint: node.name().to_string(),
            reason: format!("{e:#}"),
        })?;
        let rpc = dialer.dial(&endpoint).map_err(|e| SetupError::Dial {
            endpoint: endpoint.to_string(),
            reason: format!("{e:#}"),
        })?;

        Ok(Self {
            node,
            rpc,
            rollup_address: OnceLock::new(),
            genesis_hash: OnceLock::new(),
        })
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn rpc(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }

    /// Record the rollup contract address. Recording the same address twice is a no-op.
    pub fn set_rollup_address(&self, address: Address) -> Result<(), SetupError> {
        if address.is_zero() {
            return Err(SetupError::Topology {
                reason: format!("zero rollup contract address for {}", self.name()),
            });
        }
        let stored = *self.rollup_address.get_or_init(|| address);
        if stored != address {
            return Err(SetupError::Topology {
                reason: format!(
                    "{} already has rollup contract {stored}, refusing {address}",
                    self.name()
                ),
            });
        }
        Ok(())
    }

    pub fn rollup_address(&self) -> Result<Address, SetupError> {
        self.rollup_address
            .get()
            .copied()
            .ok_or_else(|| SetupError::Topology {
                reason: format!("no rollup contract recorded on {}", self.name()),
            })
    }

    pub fn set_genesis_hash(&self, hash: B256) -> Result<(), SetupError> {
        let stored = *self.genesis_hash.get_or_init(|| hash);
        if stored != hash {
            return Err(SetupError::Topology {
                reason: format!("{} already has genesis hash {stored}", self.name()),
            });
        }
        Ok(())
    }

    pub fn genesis_hash(&self) -> Result<B256, SetupError> {
        self.genesis_hash
            .get()
            .copied()
            .ok_or_else(|| SetupError::Topology {
                reason: format!("no genesis hash recorded on {}", self.name()),
            })
    }

    /// Client for the rollup contract recorded on this node.
    pub fn rollup_contract(&self) -> Result<RollupContract, SetupError> {
        Ok(RollupContract::new(self.rollup_address()?, self.rpc.clone()))
    }
}
