use alloy_core::primitives::U256;
use anyhow::Context;
use rollnet_devnet::{Scenario, ScenarioEnv, wait};

use super::ETHER;

pub fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new(
            "first-l1-block",
            "The settlement chain grows past its genesis once commitments age",
            first_l1_block,
        ),
        Scenario::new(
            "first-verified-l2-block",
            "The first rollup block is proposed, proven and verified on the settlement chain",
            first_verified_l2_block,
        ),
    ]
}

async fn first_l1_block(env: ScenarioEnv) -> anyhow::Result<()> {
    env.gen_commit_delay_blocks().await?;

    let l1 = env.devnet().l1_engine(0)?;
    let height = wait::wait_height(env.ctx(), l1.rpc().as_ref(), wait::greater_equal(1)).await?;

    tracing::info!(height, "Settlement chain is producing blocks");
    Ok(())
}

async fn first_verified_l2_block(env: ScenarioEnv) -> anyhow::Result<()> {
    let ctx = env.ctx();
    let l1 = env.devnet().l1_engine(0)?;
    let l2 = env.devnet().l2_engine(0)?;

    env.l2_vault()
        .create_account(ctx, l2.rpc().as_ref(), U256::from(ETHER))
        .await
        .context("Failed to send the first rollup transaction")?;

    let block_hash = wait::block_hash_by_number(ctx, l2.rpc().as_ref(), 1, true).await?;
    let contract = l1.rollup_contract()?;

    let proven = wait::wait_block_proven(ctx, &contract, block_hash).await?;
    let Some(proven) = proven else {
        anyhow::bail!("Run ended before rollup block {block_hash} was proven");
    };
    tracing::info!(id = proven.id, prover = %proven.prover, "First rollup block proven");

    wait::wait_state(ctx, &contract, |s| s.latest_verified_height == 1).await?;
    Ok(())
}
