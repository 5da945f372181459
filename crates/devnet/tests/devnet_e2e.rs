//! End-to-end tests against real containers.
//!
//! These tests require Docker and the rollup client images named in the configuration.
//! `ROLLNET_CONFIG` points at the configuration file. Each test uses its own docker network.
//! Run with: cargo test --test devnet_e2e -- --ignored

use std::{path::PathBuf, sync::Arc, time::Duration};

use alloy_core::primitives::U256;
use anyhow::{Context, Result};
use rand::Rng;
use rollnet_devnet::{
    Ctx, Devnet, DevnetConfig, DockerRuntime, HttpDialer, Pipeline, PipelineParams, RunParams,
    Scenario, ScenarioEnv, run_scenarios, wait,
};

const DEVNET_TIMEOUT: Duration = Duration::from_secs(600);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

async fn launch(test_prefix: &str) -> Result<Arc<Devnet>> {
    init_tracing();

    let path = std::env::var_os("ROLLNET_CONFIG").map(PathBuf::from);
    let mut config = DevnetConfig::load(path.as_deref())?;
    config.docker.net_name = format!(
        "rollnet-{test_prefix}-{}",
        rand::rng().random_range(100000..=999999)
    );

    let runtime = Arc::new(DockerRuntime::new(config.docker.clone()).await?);
    let devnet = Devnet::new(Arc::new(config), runtime, Arc::new(HttpDialer))?;
    Ok(Arc::new(devnet))
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires docker and rollup client images"]
async fn test_single_node_net_verifies_first_block() -> Result<()> {
    let devnet = launch("single").await?;
    let ctx = Ctx::background().with_timeout(DEVNET_TIMEOUT);

    Pipeline::SingleNode
        .run(&ctx, &devnet, &PipelineParams::default())
        .await
        .context("Failed to start single node net")?;

    let l1 = devnet.l1_engine(0)?;
    let l2 = devnet.l2_engine(0)?;
    devnet
        .l2_vault()
        .create_account(&ctx, l2.rpc().as_ref(), U256::from(1_000_000_000u64))
        .await?;

    let hash = wait::block_hash_by_number(&ctx, l2.rpc().as_ref(), 1, true).await?;
    let proven = wait::wait_block_proven(&ctx, &l1.rollup_contract()?, hash)
        .await?
        .context("Block 1 was never proven")?;
    assert_eq!(proven.block_hash, hash);

    wait::wait_state(&ctx, &l1.rollup_contract()?, |s| s.latest_verified_height >= 1).await?;
    Ok(())
}

async fn commit_delay(env: ScenarioEnv) -> Result<()> {
    env.gen_commit_delay_blocks().await?;
    let l1 = env.devnet().l1_engine(0)?;
    wait::wait_height(env.ctx(), l1.rpc().as_ref(), wait::greater_equal(1)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires docker and rollup client images"]
async fn test_runner_on_l1_l2_driver() -> Result<()> {
    let devnet = launch("runner").await?;
    let ctx = Ctx::background().with_timeout(DEVNET_TIMEOUT);

    Pipeline::L1L2Driver
        .run(&ctx, &devnet, &PipelineParams::default().node_type("full"))
        .await?;

    let scenarios = vec![
        Scenario::new("commit-delay-a", "ages commitments", commit_delay),
        Scenario::new("commit-delay-b", "ages commitments", commit_delay),
    ];
    let report = run_scenarios(&ctx, RunParams::new(devnet, scenarios).concurrency(2)).await;

    assert!(report.success(), "{report:?}");
    Ok(())
}
