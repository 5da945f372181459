//! A proposer driven from scenarios, for proposals the proposer agent would never make.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use alloy_consensus::{Transaction, TxEip1559};
use alloy_core::{
    primitives::{Address, B256, Bytes, TxKind, U256, keccak256},
    sol_types::SolValue,
};
use alloy_eips::eip2718::Encodable2718;
use alloy_signer_local::PrivateKeySigner;
use anyhow::Context;

use crate::{
    Ctx, Devnet, ExecutionNode,
    contracts::{self, abi},
    rpc::{CallRequest, TxReceipt},
    vault::sign_with,
    wait,
};

const PRIORITY_FEE: u128 = 1_000_000_000;

/// Block metadata a proposal is made with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalMeta {
    /// Assigned by the contract.
    pub id: u64,
    pub l1_height: u64,
    pub l1_hash: B256,
    pub beneficiary: Address,
    pub tx_list_hash: B256,
    pub mix_hash: B256,
    pub extra_data: Bytes,
    pub gas_limit: u64,
    pub timestamp: u64,
    /// Settlement height of the commitment, filled in when proposing.
    pub commit_height: u64,
    pub commit_slot: u64,
}

impl ProposalMeta {
    /// `keccak256(beneficiary ++ tx_list_hash)`, what `commitBlock` records.
    pub fn commit_hash(&self) -> B256 {
        keccak256([self.beneficiary.as_slice(), self.tx_list_hash.as_slice()].concat())
    }

    fn abi_encode(&self) -> Bytes {
        abi::BlockMetadata {
            id: U256::from(self.id),
            l1Height: U256::from(self.l1_height),
            l1Hash: self.l1_hash,
            beneficiary: self.beneficiary,
            txListHash: self.tx_list_hash,
            mixHash: self.mix_hash,
            extraData: self.extra_data.clone(),
            gasLimit: self.gas_limit,
            timestamp: self.timestamp,
            commitHeight: self.commit_height,
            commitSlot: self.commit_slot,
        }
        .abi_encode()
        .into()
    }
}

/// A mined `commitBlock` transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    pub tx_hash: B256,
    pub height: u64,
}

/// Commits and proposes transaction lists on the settlement chain with the devnet's proposer key.
#[derive(Debug)]
pub struct TestProposer {
    devnet: Arc<Devnet>,
    l1: Arc<ExecutionNode>,
    signer: PrivateKeySigner,
    beneficiary: Address,
    rollup: Address,
}

impl TestProposer {
    pub fn new(devnet: Arc<Devnet>, l1: Arc<ExecutionNode>) -> anyhow::Result<Self> {
        let accounts = devnet.accounts();
        let signer = accounts.proposer.signer().clone();
        let beneficiary = accounts.fee_recipient.address;
        let rollup = l1.rollup_address()?;

        Ok(Self {
            devnet,
            l1,
            signer,
            beneficiary,
            rollup,
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Build the metadata for `tx_list` and commit to it.
    ///
    /// No commitment is sent when the contract requires no commit confirmations.
    pub async fn commit_tx_list(
        &self,
        ctx: &Ctx,
        tx_list: &[u8],
        gas_limit: u64,
        commit_slot: u64,
    ) -> anyhow::Result<(ProposalMeta, Option<CommitReceipt>)> {
        let rpc = self.l1.rpc().as_ref();
        let l1_height = ctx.run(rpc.block_number()).await?;
        let l1_hash = wait::block_hash_by_number(ctx, rpc, l1_height, false).await?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("System clock is before the unix epoch")?
            .as_secs();

        let meta = ProposalMeta {
            id: 0,
            l1_height,
            l1_hash,
            beneficiary: self.beneficiary,
            tx_list_hash: keccak256(tx_list),
            mix_hash: B256::from(rand::random::<[u8; 32]>()),
            extra_data: Bytes::new(),
            gas_limit,
            timestamp,
            commit_height: 0,
            commit_slot,
        };

        let constants = self.devnet.protocol_constants(ctx).await?;
        if constants.commit_confirmations == 0 {
            return Ok((meta, None));
        }

        let input = contracts::commit_block_calldata(commit_slot, meta.commit_hash());
        let receipt = self
            .send(ctx, input)
            .await
            .context("Failed to commit tx list")?;
        let height = receipt
            .block_number()
            .context("Commit receipt has no block number")?;

        tracing::info!(
            tx_list_hash = %meta.tx_list_hash,
            commit_slot,
            height,
            "Tx list committed"
        );

        Ok((
            meta,
            Some(CommitReceipt {
                tx_hash: receipt.transaction_hash,
                height,
            }),
        ))
    }

    /// Propose `tx_list` with the metadata it was committed with.
    ///
    /// The proposal is simulated first, so a rejected proposal fails without spending a block and
    /// carries the contract's revert reason.
    pub async fn propose_tx_list(
        &self,
        ctx: &Ctx,
        mut meta: ProposalMeta,
        commit: Option<&CommitReceipt>,
        tx_list: &[u8],
    ) -> anyhow::Result<TxReceipt> {
        if let Some(commit) = commit {
            meta.commit_height = commit.height;
        }

        let input = contracts::propose_block_calldata(vec![
            meta.abi_encode(),
            Bytes::copy_from_slice(tx_list),
        ]);

        let request = CallRequest::new(self.rollup, input.clone()).sender(self.address());
        ctx.run(self.l1.rpc().call(&request))
            .await
            .context("Proposal rejected")?;

        let receipt = self
            .send(ctx, input)
            .await
            .context("Failed to propose tx list")?;

        tracing::info!(
            tx_list_hash = %meta.tx_list_hash,
            height = ?receipt.block_number(),
            "Tx list proposed"
        );
        Ok(receipt)
    }

    /// Propose one block holding a test transaction from the rollup vault.
    pub async fn propose_op(&self, ctx: &Ctx) -> anyhow::Result<TxReceipt> {
        let tx = self.devnet.l2_vault().test_tx()?;
        let gas_limit = tx.gas_limit();

        let txs: Vec<Bytes> = vec![tx.encoded_2718().into()];
        let mut tx_list = Vec::new();
        alloy_core::rlp::encode_list::<_, Bytes>(&txs, &mut tx_list);

        let (meta, commit) = self.commit_tx_list(ctx, &tx_list, gas_limit, 0).await?;
        self.devnet.gen_commit_delay_blocks(ctx).await?;
        self.propose_tx_list(ctx, meta, commit.as_ref(), &tx_list)
            .await
    }

    async fn send(&self, ctx: &Ctx, input: Bytes) -> anyhow::Result<TxReceipt> {
        let rpc = self.l1.rpc().as_ref();
        let request = CallRequest::new(self.rollup, input.clone()).sender(self.address());

        let nonce = ctx.run(rpc.pending_nonce(self.address())).await?;
        let gas_limit = ctx.run(rpc.estimate_gas(&request)).await?;
        let gas_price = ctx.run(rpc.gas_price()).await?;

        let tx = TxEip1559 {
            chain_id: self.devnet.config().l1.chain_id,
            nonce,
            gas_limit,
            max_fee_per_gas: gas_price.saturating_mul(2) + PRIORITY_FEE,
            max_priority_fee_per_gas: PRIORITY_FEE,
            to: TxKind::Call(self.rollup),
            value: U256::ZERO,
            access_list: Default::default(),
            input,
        };
        let tx = sign_with(&self.signer, tx)?;

        let hash = ctx.run(rpc.send_raw_transaction(tx.encoded_2718().into())).await?;
        wait::wait_receipt_ok(ctx, rpc, hash).await
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::sol_types::SolCall;

    use super::*;
    use crate::{PipelineParams, ProtocolConstants, devnet::tests::harness, pipelines::start_l1_l2};

    #[test]
    fn test_commit_hash_is_packed() {
        let meta = ProposalMeta {
            beneficiary: Address::repeat_byte(0x11),
            tx_list_hash: B256::repeat_byte(0x22),
            ..Default::default()
        };

        let mut packed = vec![0x11; 20];
        packed.extend([0x22; 32]);
        assert_eq!(meta.commit_hash(), keccak256(packed));
    }

    #[tokio::test]
    async fn test_propose_op_commits_then_proposes() {
        let h = harness();
        h.chain.set_constants(ProtocolConstants {
            commit_confirmations: 2,
            ..Default::default()
        });
        let ctx = Ctx::background();
        let (l1, _) = start_l1_l2(&ctx, &h.devnet, &PipelineParams::default())
            .await
            .unwrap();
        let before = h.chain.sent().len();
        let height = h.chain.height();

        let proposer = TestProposer::new(h.devnet.clone(), l1).unwrap();
        proposer.propose_op(&ctx).await.unwrap();

        // commit, two delay blocks, propose
        let sent = h.chain.sent();
        assert_eq!(sent.len(), before + 4);
        let commit =
            abi::IRollup::commitBlockCall::abi_decode(sent[before].input()).unwrap();
        let propose =
            abi::IRollup::proposeBlockCall::abi_decode(sent[before + 3].input()).unwrap();

        let meta = abi::BlockMetadata::abi_decode(&propose.inputs[0]).unwrap();
        assert_eq!(meta.txListHash, keccak256(&propose.inputs[1]));
        assert_eq!(meta.beneficiary, h.devnet.accounts().fee_recipient.address);
        assert_eq!(meta.commitSlot, 0);
        assert_eq!(meta.commitHeight, height + 1);
        assert_eq!(
            commit.commitHash,
            keccak256([meta.beneficiary.as_slice(), meta.txListHash.as_slice()].concat())
        );
    }

    #[tokio::test]
    async fn test_no_commit_without_confirmations() {
        let h = harness();
        let ctx = Ctx::background();
        let (l1, _) = start_l1_l2(&ctx, &h.devnet, &PipelineParams::default())
            .await
            .unwrap();

        let proposer = TestProposer::new(h.devnet.clone(), l1).unwrap();
        let (meta, commit) = proposer
            .commit_tx_list(&ctx, &[0xc0], 21_000, 3)
            .await
            .unwrap();

        assert!(commit.is_none());
        assert_eq!(meta.tx_list_hash, keccak256([0xc0]));
        assert_eq!(meta.commit_slot, 3);
        assert_eq!(meta.l1_height, h.chain.height());
    }

    #[tokio::test]
    async fn test_rejected_proposal_keeps_revert_reason() {
        let h = harness();
        let ctx = Ctx::background();
        let (l1, _) = start_l1_l2(&ctx, &h.devnet, &PipelineParams::default())
            .await
            .unwrap();
        h.chain.set_propose_revert("L1:tooMany");
        let height = h.chain.height();

        let proposer = TestProposer::new(h.devnet.clone(), l1).unwrap();
        let err = proposer.propose_op(&ctx).await.unwrap_err();

        assert!(format!("{err:#}").contains("L1:tooMany"));
        assert_eq!(h.chain.height(), height);
    }

    #[tokio::test]
    async fn test_proposer_needs_deployed_contracts() {
        let h = harness();
        let l2 = h
            .devnet
            .add_rollup_engine(&Ctx::background(), 0, false)
            .await
            .unwrap();

        assert!(TestProposer::new(h.devnet.clone(), l2).is_err());
    }
}
