//! Proposals the rollup contract has to reject or tolerate. Every scenario brings up its own
//! devnet.

use std::time::Duration;

use alloy_consensus::{Transaction, TxEip1559};
use alloy_core::primitives::{B256, Bytes, TxKind, U256};
use alloy_eips::eip2718::Encodable2718;
use anyhow::Context;
use rand::Rng;
use rollnet_devnet::{PipelineParams, Scenario, ScenarioEnv, contracts, pipelines, wait};

/// Length of the garbage proposed as a transaction list.
const INVALID_TX_LIST_LEN: usize = 256;

/// Offset from the pending nonce that makes a transaction invalid.
const INVALID_NONCE_GAP: u64 = 1024;

const INVALID_TX_GAS_LIMIT: u64 = 300_000;

/// Bound on one scenario, from bring-up to its last check.
const SCENARIO_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Pause between proposals while filling the pending window.
const PROPOSE_PAUSE: Duration = Duration::from_millis(10);

pub fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new(
            "too-many-pending-blocks",
            "Without a prover, proposals stop once the pending window is full",
            too_many_pending_blocks,
        ),
        Scenario::new(
            "propose-invalid-tx-list-bytes",
            "Commit and propose random bytes as a transaction list",
            propose_invalid_tx_list_bytes,
        ),
        Scenario::new(
            "propose-tx-list-including-invalid-tx",
            "Commit and propose a well-formed transaction list holding a transaction with a bad nonce",
            propose_tx_list_including_invalid_tx,
        ),
    ]
}

fn full_node() -> PipelineParams {
    PipelineParams::default().node_type("full")
}

/// Proposals succeed until `next_block_id` reaches `latest_verified_id + max_num_blocks`.
async fn too_many_pending_blocks(mut env: ScenarioEnv) -> anyhow::Result<()> {
    let ctx = &env.timeout_ctx(SCENARIO_TIMEOUT);
    let (l1, l2) = pipelines::start_l1_l2_driver(ctx, env.devnet(), &full_node()).await?;
    let constants = env.constants().await?;
    let contract = l1.rollup_contract()?;
    let proposer = env.proposer()?;

    let full = loop {
        let state = ctx.run(contract.state_variables()).await?;
        if state.next_block_id >= state.latest_verified_id + constants.max_num_blocks {
            break state;
        }
        env.l2_vault().send_test_tx(ctx, l2.rpc().as_ref()).await?;
        proposer
            .propose_op(ctx)
            .await
            .with_context(|| format!("Proposal of block {} failed", state.next_block_id))?;
        ctx.sleep(PROPOSE_PAUSE).await?;
    };

    env.l2_vault().send_test_tx(ctx, l2.rpc().as_ref()).await?;
    let Err(err) = proposer.propose_op(ctx).await else {
        anyhow::bail!("Proposal beyond the pending window was accepted");
    };
    let err = format!("{err:#}");
    anyhow::ensure!(err.contains("L1:tooMany"), "Unexpected proposal error: {err}");

    let after = ctx.run(contract.state_variables()).await?;
    anyhow::ensure!(
        after.next_block_id == full.next_block_id,
        "Rejected proposal moved the next block id from {} to {}",
        full.next_block_id,
        after.next_block_id
    );

    tracing::info!(next_block_id = after.next_block_id, "Proposal rejected with a full pending window");
    Ok(())
}

async fn propose_invalid_tx_list_bytes(mut env: ScenarioEnv) -> anyhow::Result<()> {
    let ctx = &env.timeout_ctx(SCENARIO_TIMEOUT);
    let (l1, _) = pipelines::start_l1_l2(ctx, env.devnet(), &full_node()).await?;
    let constants = env.constants().await?;
    let proposer = env.proposer()?;

    let tx_list: Vec<u8> = {
        let mut rng = rand::rng();
        (0..INVALID_TX_LIST_LEN).map(|_| rng.random()).collect()
    };
    let gas_limit = rand::rng().random_range(0..constants.block_max_gas_limit.max(1));

    let (meta, commit) = proposer.commit_tx_list(ctx, &tx_list, gas_limit, 0).await?;
    env.devnet().gen_commit_delay_blocks(ctx).await?;
    proposer
        .propose_tx_list(ctx, meta, commit.as_ref(), &tx_list)
        .await?;

    wait::wait_height(ctx, l1.rpc().as_ref(), wait::greater_equal(1)).await?;
    wait::wait_state(ctx, &l1.rollup_contract()?, |s| s.next_block_id == 2).await?;
    Ok(())
}

async fn propose_tx_list_including_invalid_tx(mut env: ScenarioEnv) -> anyhow::Result<()> {
    let ctx = &env.timeout_ctx(SCENARIO_TIMEOUT);
    let (l1, l2) = pipelines::start_l1_l2_driver(ctx, env.devnet(), &full_node()).await?;
    let proposer = env.proposer()?;

    // An anchor call from the proposer account with a nonce far ahead of its pending one.
    let vault = env.l2_vault();
    let sender = vault.insert_key(env.devnet().accounts().proposer.signer().clone());
    let pending = ctx.run(l2.rpc().pending_nonce(sender)).await?;
    let invalid_nonce = pending + INVALID_NONCE_GAP;

    let tx = TxEip1559 {
        chain_id: vault.chain_id(),
        nonce: invalid_nonce,
        gas_limit: INVALID_TX_GAS_LIMIT,
        max_fee_per_gas: 30_000_000_000,
        max_priority_fee_per_gas: 1_000_000_000,
        to: TxKind::Call(l2.rollup_address()?),
        value: U256::ZERO,
        access_list: Default::default(),
        input: contracts::anchor_calldata(0, B256::from(rand::random::<[u8; 32]>())),
    };
    let tx = vault.sign(sender, tx)?;

    let txs: Vec<Bytes> = vec![tx.encoded_2718().into()];
    let mut tx_list = Vec::new();
    alloy_core::rlp::encode_list::<_, Bytes>(&txs, &mut tx_list);

    let (meta, commit) = proposer
        .commit_tx_list(ctx, &tx_list, tx.gas_limit(), 0)
        .await?;
    env.devnet().gen_commit_delay_blocks(ctx).await?;
    proposer
        .propose_tx_list(ctx, meta, commit.as_ref(), &tx_list)
        .await?;

    wait::wait_height(ctx, l1.rpc().as_ref(), wait::greater_equal(1)).await?;
    wait::wait_state(ctx, &l1.rollup_contract()?, |s| s.next_block_id == 2).await?;

    let pending = ctx.run(l2.rpc().pending_nonce(sender)).await?;
    anyhow::ensure!(
        pending != invalid_nonce,
        "Transaction with invalid nonce {invalid_nonce} was applied"
    );
    Ok(())
}
