use alloy_core::primitives::U256;
use rollnet_devnet::{Scenario, ScenarioEnv, TxReceipt, wait};

use super::ETHER;

pub fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new(
            "fund-accounts-concurrently",
            "Two concurrent fundings from one vault get distinct accounts and nonces",
            fund_accounts_concurrently,
        ),
        Scenario::new(
            "funded-tx-mines-l1-block",
            "A funding transaction lifts the settlement chain past its genesis",
            funded_tx_mines_l1_block,
        ),
    ]
}

async fn fund_accounts_concurrently(env: ScenarioEnv) -> anyhow::Result<()> {
    let ctx = env.ctx();
    let l1 = env.devnet().l1_engine(0)?;
    let rpc = l1.rpc().as_ref();
    let vault = env.l1_vault();
    let nonce = vault.nonce();

    let first = vault.generate_account();
    let second = vault.generate_account();
    anyhow::ensure!(first != second, "Vault generated the same account twice");

    let (a, b) = tokio::try_join!(
        vault.fund(ctx, rpc, first, U256::from(ETHER)),
        vault.fund(ctx, rpc, second, U256::from(2 * ETHER)),
    )?;
    for receipt in [a, b] {
        anyhow::ensure!(
            receipt.status() == TxReceipt::STATUS_SUCCESS,
            "Funding transaction {} failed",
            receipt.transaction_hash
        );
    }

    anyhow::ensure!(
        vault.nonce() == nonce + 2,
        "Vault nonce moved from {nonce} to {}",
        vault.nonce()
    );
    Ok(())
}

async fn funded_tx_mines_l1_block(env: ScenarioEnv) -> anyhow::Result<()> {
    let ctx = env.ctx();
    let l1 = env.devnet().l1_engine(0)?;
    let rpc = l1.rpc().as_ref();

    env.l1_vault().create_account(ctx, rpc, U256::from(ETHER)).await?;
    let height = wait::wait_height(ctx, rpc, wait::greater(0)).await?;

    tracing::info!(height, "Settlement chain past genesis");
    Ok(())
}
