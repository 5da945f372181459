//! Rollup engines joining a running devnet. Each scenario adds an engine and the relay agent
//! driving it, so they run one at a time.

use std::sync::Arc;

use rollnet_devnet::{Ctx, Devnet, ExecutionNode, Node, Scenario, ScenarioEnv, wait};

/// Rollup blocks generated before and between sync checks.
const SYNC_BLOCK_COUNT: u64 = 10;

pub fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new(
            "sync-from-l1",
            "A new engine syncs purely from settlement chain data",
            sync_from_l1,
        ),
        Scenario::new(
            "sync-by-snap",
            "Chain head comes from the settlement chain, blocks come from peers in snap mode",
            sync_by_snap,
        ),
        Scenario::new(
            "sync-by-full",
            "Chain head comes from the settlement chain, blocks come from peers in full mode",
            sync_by_full,
        ),
        Scenario::new(
            "sync-by-p2p-and-one-by-one",
            "Sync to the latest verified height from peers, then block by block from the \
             settlement chain, surviving a relay agent restart in between",
            sync_by_p2p_and_one_by_one,
        ),
    ]
}

async fn latest_verified_height(ctx: &Ctx, devnet: &Devnet) -> anyhow::Result<u64> {
    let contract = devnet.l1_engine(0)?.rollup_contract()?;
    let state = ctx.run(contract.state_variables()).await?;
    Ok(state.latest_verified_height)
}

/// Add a rollup engine peered with the running ones, driven by a p2p-enabled relay agent.
async fn join_by_p2p(
    env: &ScenarioEnv,
    node_type: &str,
) -> anyhow::Result<(Arc<ExecutionNode>, Arc<Node>)> {
    let devnet = env.devnet();
    let l1 = devnet.l1_engine(0)?;
    let l2 = devnet
        .add_rollup_engine_with_type(env.ctx(), 0, true, node_type)
        .await?;
    let driver = devnet.add_relay_agent(env.ctx(), &l1, &l2, true).await?;
    Ok((l2, driver))
}

async fn sync_from_l1(env: ScenarioEnv) -> anyhow::Result<()> {
    let ctx = env.ctx();
    let devnet = env.devnet();

    env.gen_some_l2_blocks(SYNC_BLOCK_COUNT).await?;
    let target = ctx.run(devnet.l2_engine(0)?.rpc().block_number()).await?;

    let l1 = devnet.l1_engine(0)?;
    let l2 = devnet.add_rollup_engine(ctx, 0, false).await?;
    devnet.add_relay_agent(ctx, &l1, &l2, false).await?;

    let height = wait::wait_height(ctx, l2.rpc().as_ref(), wait::greater_equal(target)).await?;
    tracing::info!(node = %l2.name(), height, "Synced from settlement chain");
    Ok(())
}

async fn sync_by_mode(env: ScenarioEnv, node_type: &str) -> anyhow::Result<()> {
    let ctx = env.ctx();
    let (l2, _) = join_by_p2p(&env, node_type).await?;

    let target = latest_verified_height(ctx, env.devnet()).await?;
    let height = wait::wait_height(ctx, l2.rpc().as_ref(), wait::greater_equal(target)).await?;

    tracing::info!(node = %l2.name(), node_type, height, "Synced from peers");
    Ok(())
}

async fn sync_by_snap(env: ScenarioEnv) -> anyhow::Result<()> {
    sync_by_mode(env, "snap").await
}

async fn sync_by_full(env: ScenarioEnv) -> anyhow::Result<()> {
    sync_by_mode(env, "full").await
}

async fn sync_by_p2p_and_one_by_one(env: ScenarioEnv) -> anyhow::Result<()> {
    let ctx = env.ctx();
    let devnet = env.devnet();
    let (l2, driver) = join_by_p2p(&env, "full").await?;
    let rpc = l2.rpc().as_ref();

    let p2p_height = latest_verified_height(ctx, devnet).await?;
    wait::wait_height(ctx, rpc, wait::greater_equal(p2p_height)).await?;

    env.gen_some_l2_blocks(SYNC_BLOCK_COUNT).await?;
    let one_by_one_height = p2p_height + SYNC_BLOCK_COUNT;
    wait::wait_height(ctx, rpc, wait::greater_equal(one_by_one_height)).await?;

    devnet.stop_node(&driver).await?;
    tracing::info!(node = %driver.name(), "Relay agent stopped");

    env.gen_some_l2_blocks(SYNC_BLOCK_COUNT).await?;
    let l1 = devnet.l1_engine(0)?;
    devnet.add_relay_agent(ctx, &l1, &l2, true).await?;

    let resume_height = one_by_one_height + SYNC_BLOCK_COUNT;
    let height = wait::wait_height(ctx, rpc, wait::greater_equal(resume_height)).await?;
    tracing::info!(node = %l2.name(), height, "Resumed after relay agent restart");
    Ok(())
}
