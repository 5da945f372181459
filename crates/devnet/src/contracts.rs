//! Typed access to the rollup contracts.

use std::{sync::Arc, time::Duration};

use alloy_core::{
    primitives::{Address, B256, Bytes, U256},
    sol_types::{SolCall, SolEvent},
};
use anyhow::Context;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{
    Ctx,
    rpc::{CallRequest, ChainRpc, LogFilter},
};

/// Interval between log queries of an event watch.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Capacity of the channel an event watch delivers into.
const EVENT_CHANNEL_CAPACITY: usize = 64;

pub(crate) mod abi {
    alloy_core::sol! {
        struct StateVariables {
            uint64 genesisHeight;
            uint64 genesisTimestamp;
            uint64 nextBlockId;
            uint64 lastProposedAt;
            uint64 avgBlockTime;
            uint64 latestVerifiedHeight;
            uint64 latestVerifiedId;
            uint64 avgProofTime;
        }

        struct Config {
            uint256 chainId;
            uint256 maxNumBlocks;
            uint256 blockHashHistory;
            uint256 maxVerificationsPerTx;
            uint256 commitConfirmations;
            uint256 blockMaxGasLimit;
            uint256 maxTransactionsPerBlock;
            uint256 maxBytesPerTxList;
            uint256 minTxGasLimit;
        }

        struct BlockMetadata {
            uint256 id;
            uint256 l1Height;
            bytes32 l1Hash;
            address beneficiary;
            bytes32 txListHash;
            bytes32 mixHash;
            bytes extraData;
            uint64 gasLimit;
            uint64 timestamp;
            uint64 commitHeight;
            uint64 commitSlot;
        }

        interface IRollup {
            function getStateVariables() external view returns (StateVariables memory);
            function getConfig() external pure returns (Config memory);
            function whitelistProver(address prover, bool whitelisted) external;
            function commitBlock(uint64 commitSlot, bytes32 commitHash) external;
            function proposeBlock(bytes[] calldata inputs) external;

            event BlockProven(
                uint256 indexed id,
                bytes32 parentHash,
                bytes32 blockHash,
                address prover,
                uint64 provenAt
            );
        }

        interface IRollupAnchor {
            function anchor(uint256 l1Height, bytes32 l1Hash) external;
        }
    }
}

/// Snapshot of the settlement contract's protocol state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateVariables {
    pub genesis_height: u64,
    pub genesis_timestamp: u64,
    pub next_block_id: u64,
    pub last_proposed_at: u64,
    pub latest_verified_height: u64,
    pub latest_verified_id: u64,
}

impl From<abi::StateVariables> for StateVariables {
    fn from(s: abi::StateVariables) -> Self {
        Self {
            genesis_height: s.genesisHeight,
            genesis_timestamp: s.genesisTimestamp,
            next_block_id: s.nextBlockId,
            last_proposed_at: s.lastProposedAt,
            latest_verified_height: s.latestVerifiedHeight,
            latest_verified_id: s.latestVerifiedId,
        }
    }
}

/// Protocol constants of the settlement contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProtocolConstants {
    pub chain_id: u64,
    /// Maximum number of proposed but unverified blocks.
    pub max_num_blocks: u64,
    /// Settlement blocks a commitment must age before its proposal is accepted.
    pub commit_confirmations: u64,
    pub block_max_gas_limit: u64,
}

impl From<abi::Config> for ProtocolConstants {
    fn from(c: abi::Config) -> Self {
        Self {
            chain_id: c.chainId.saturating_to(),
            max_num_blocks: c.maxNumBlocks.saturating_to(),
            commit_confirmations: c.commitConfirmations.saturating_to(),
            block_max_gas_limit: c.blockMaxGasLimit.saturating_to(),
        }
    }
}

/// A decoded `BlockProven` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockProven {
    pub id: u64,
    pub parent_hash: B256,
    pub block_hash: B256,
    pub prover: Address,
    pub proven_at: u64,
    /// Settlement block the event was emitted in.
    pub block_number: Option<u64>,
}

/// Client for the rollup contract deployed on the settlement chain.
#[derive(Clone)]
pub struct RollupContract {
    address: Address,
    rpc: Arc<dyn ChainRpc>,
}

impl std::fmt::Debug for RollupContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollupContract")
            .field("address", &self.address)
            .field("endpoint", &self.rpc.endpoint())
            .finish()
    }
}

impl RollupContract {
    pub fn new(address: Address, rpc: Arc<dyn ChainRpc>) -> Self {
        Self { address, rpc }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn rpc(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }

    pub async fn state_variables(&self) -> anyhow::Result<StateVariables> {
        let output = self
            .rpc
            .call(&CallRequest::new(
                self.address,
                abi::IRollup::getStateVariablesCall {}.abi_encode(),
            ))
            .await
            .context("Failed to call getStateVariables")?;

        let state = abi::IRollup::getStateVariablesCall::abi_decode_returns(&output)
            .context("Failed to decode getStateVariables output")?;
        Ok(state.into())
    }

    pub async fn constants(&self) -> anyhow::Result<ProtocolConstants> {
        let output = self
            .rpc
            .call(&CallRequest::new(
                self.address,
                abi::IRollup::getConfigCall {}.abi_encode(),
            ))
            .await
            .context("Failed to call getConfig")?;

        let config = abi::IRollup::getConfigCall::abi_decode_returns(&output)
            .context("Failed to decode getConfig output")?;
        Ok(config.into())
    }

    /// `BlockProven` events in the inclusive range, `to_block = None` meaning latest.
    pub async fn block_proven_events(
        &self,
        from_block: u64,
        to_block: Option<u64>,
    ) -> anyhow::Result<Vec<BlockProven>> {
        let logs = self
            .rpc
            .logs(&LogFilter {
                address: self.address,
                topic0: abi::IRollup::BlockProven::SIGNATURE_HASH,
                from_block,
                to_block,
            })
            .await
            .context("Failed to query BlockProven logs")?;

        logs.into_iter()
            .map(|log| {
                let event =
                    abi::IRollup::BlockProven::decode_raw_log(log.topics.iter().copied(), &log.data)
                        .context("Failed to decode BlockProven log")?;
                Ok(BlockProven {
                    id: event.id.saturating_to(),
                    parent_hash: event.parentHash,
                    block_hash: event.blockHash,
                    prover: event.prover,
                    proven_at: event.provenAt,
                    block_number: log.block_number(),
                })
            })
            .collect()
    }

    /// Stream `BlockProven` events starting at `from_block`.
    ///
    /// A background task polls the logs and forwards every event in order. The task stops when
    /// the context ends or the receiver is dropped; a query error is forwarded and ends the stream.
    pub fn watch_block_proven(
        &self,
        ctx: &Ctx,
        from_block: u64,
    ) -> mpsc::Receiver<anyhow::Result<BlockProven>> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let contract = self.clone();
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let mut next_block = from_block;
            loop {
                let head = match ctx.run(contract.rpc.block_number()).await {
                    Ok(head) => head,
                    Err(e) => {
                        if !ctx.is_done() {
                            let _ = tx.send(Err(e)).await;
                        }
                        return;
                    }
                };

                if head >= next_block {
                    match ctx.run(contract.block_proven_events(next_block, Some(head))).await {
                        Ok(events) => {
                            for event in events {
                                if tx.send(Ok(event)).await.is_err() {
                                    return;
                                }
                            }
                            next_block = head + 1;
                        }
                        Err(e) => {
                            if !ctx.is_done() {
                                let _ = tx.send(Err(e)).await;
                            }
                            return;
                        }
                    }
                }

                tokio::select! {
                    _ = ctx.done() => return,
                    _ = tx.closed() => return,
                    _ = tokio::time::sleep(EVENT_POLL_INTERVAL) => {}
                }
            }
        });

        rx
    }
}

pub fn whitelist_prover_calldata(prover: Address, whitelisted: bool) -> Bytes {
    abi::IRollup::whitelistProverCall {
        prover,
        whitelisted,
    }
    .abi_encode()
    .into()
}

pub fn commit_block_calldata(commit_slot: u64, commit_hash: B256) -> Bytes {
    abi::IRollup::commitBlockCall {
        commitSlot: commit_slot,
        commitHash: commit_hash,
    }
    .abi_encode()
    .into()
}

pub fn propose_block_calldata(inputs: Vec<Bytes>) -> Bytes {
    abi::IRollup::proposeBlockCall { inputs }.abi_encode().into()
}

/// Calldata of the rollup-side anchor call that opens every rollup block.
pub fn anchor_calldata(l1_height: u64, l1_hash: B256) -> Bytes {
    abi::IRollupAnchor::anchorCall {
        l1Height: U256::from(l1_height),
        l1Hash: l1_hash,
    }
    .abi_encode()
    .into()
}

#[cfg(test)]
mod tests {
    use alloy_core::{
        primitives::{address, b256},
        sol_types::SolValue,
    };

    use super::*;
    use crate::testing::MockChain;

    fn rollup() -> (Arc<MockChain>, RollupContract) {
        let chain = Arc::new(MockChain::new(31336));
        let contract = RollupContract::new(
            address!("232e1128a21bbffbc8d6befacb10137f37a653a0"),
            chain.clone(),
        );
        (chain, contract)
    }

    #[tokio::test]
    async fn test_state_variables_decode() {
        let (chain, contract) = rollup();
        chain.set_state(StateVariables {
            genesis_height: 3,
            next_block_id: 5,
            latest_verified_height: 2,
            latest_verified_id: 2,
            ..Default::default()
        });

        let state = contract.state_variables().await.unwrap();
        assert_eq!(state.genesis_height, 3);
        assert_eq!(state.next_block_id, 5);
        assert_eq!(state.latest_verified_id, 2);
    }

    #[tokio::test]
    async fn test_constants_decode() {
        let (chain, contract) = rollup();
        chain.set_constants(ProtocolConstants {
            chain_id: 167003,
            max_num_blocks: 8,
            commit_confirmations: 2,
            block_max_gas_limit: 6_000_000,
        });

        let constants = contract.constants().await.unwrap();
        assert_eq!(constants.max_num_blocks, 8);
        assert_eq!(constants.commit_confirmations, 2);
    }

    #[tokio::test]
    async fn test_block_proven_events_decode() {
        let (chain, contract) = rollup();
        let block_hash = b256!("e76a69b167bb118c79ed3be2dd2073b300acd4861e31a603c7677186b42372a5");
        chain.emit_block_proven(contract.address(), 1, block_hash);

        let events = contract.block_proven_events(0, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, 1);
        assert_eq!(events[0].block_hash, block_hash);
    }

    #[test]
    fn test_calldata_selectors() {
        let calldata = whitelist_prover_calldata(Address::ZERO, true);
        assert_eq!(&calldata[..4], &abi::IRollup::whitelistProverCall::SELECTOR);

        let decoded = abi::IRollup::whitelistProverCall::abi_decode(&calldata).unwrap();
        assert!(decoded.whitelisted);
    }

    #[test]
    fn test_propose_calldata_wraps_inputs() {
        let meta = (U256::from(1), B256::ZERO).abi_encode();
        let calldata = propose_block_calldata(vec![meta.into(), Bytes::from(vec![0xc0])]);

        let decoded = abi::IRollup::proposeBlockCall::abi_decode(&calldata).unwrap();
        assert_eq!(decoded.inputs.len(), 2);
        assert_eq!(decoded.inputs[1], Bytes::from(vec![0xc0]));
    }
}
