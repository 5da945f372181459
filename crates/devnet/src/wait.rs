//! Blocking condition waits over the eventually-consistent state of the chains.
//!
//! Every wait takes a [`Ctx`] and returns early with an error once the context ends, except
//! [`wait_event`] which reports the end of the context as "not observed".

use std::time::Duration;

use alloy_core::primitives::B256;
use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use derive_more::{Display, Error};
use tokio::sync::mpsc;

use crate::{BlockProven, Ctx, RollupContract, StateVariables, rpc::ChainRpc, rpc::TxReceipt};

/// Interval between block height and receipt polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between contract state polls.
pub const STATE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Number of contract state polls before [`wait_state`] gives up.
pub const STATE_POLL_ATTEMPTS: u32 = 60;

const NODE_UP_RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum WaitError {
    #[display("expected status {expected}, but got {actual}")]
    ReceiptStatus {
        expected: u64,
        actual: u64,
        receipt: TxReceipt,
    },

    #[display("state condition not reached after {attempts} attempts, last state: {last:?}")]
    StateNotReached {
        attempts: u32,
        last: StateVariables,
    },
}

pub fn greater(want: u64) -> impl Fn(u64) -> bool + Copy + Send + Sync {
    move |got| got > want
}

pub fn greater_equal(want: u64) -> impl Fn(u64) -> bool + Copy + Send + Sync {
    move |got| got >= want
}

/// Poll the block height until `predicate` holds and return that height.
///
/// Query errors are logged and retried; only the context bounds the wait. An unreachable
/// endpoint therefore fails with the context's error once it ends, not with the RPC error.
pub async fn wait_height<F>(ctx: &Ctx, rpc: &dyn ChainRpc, predicate: F) -> anyhow::Result<u64>
where
    F: Fn(u64) -> bool,
{
    loop {
        match ctx.run(rpc.block_number()).await {
            Ok(height) if predicate(height) => return Ok(height),
            Ok(_) => {}
            Err(e) if ctx.is_done() => {
                return Err(e).with_context(|| format!("Waiting for height on {}", rpc.endpoint()));
            }
            Err(e) => {
                tracing::debug!(endpoint = rpc.endpoint(), error = %e, "Block number query failed");
            }
        }

        ctx.sleep(POLL_INTERVAL)
            .await
            .with_context(|| format!("Waiting for height on {}", rpc.endpoint()))?;
    }
}

/// Poll for the receipt of `hash` and check its status.
///
/// A missing receipt is retried. Any query error or a status other than `expected` fails
/// immediately.
pub async fn wait_receipt(
    ctx: &Ctx,
    rpc: &dyn ChainRpc,
    hash: B256,
    expected: u64,
) -> anyhow::Result<TxReceipt> {
    loop {
        let receipt = ctx
            .run(rpc.transaction_receipt(hash))
            .await
            .with_context(|| format!("Failed to get receipt of {hash}"))?;

        if let Some(receipt) = receipt {
            let actual = receipt.status();
            if actual != expected {
                return Err(WaitError::ReceiptStatus {
                    expected,
                    actual,
                    receipt,
                }
                .into());
            }
            return Ok(receipt);
        }

        ctx.sleep(POLL_INTERVAL)
            .await
            .with_context(|| format!("Waiting for receipt of {hash}"))?;
    }
}

pub async fn wait_receipt_ok(ctx: &Ctx, rpc: &dyn ChainRpc, hash: B256) -> anyhow::Result<TxReceipt> {
    wait_receipt(ctx, rpc, hash, TxReceipt::STATUS_SUCCESS).await
}

pub async fn wait_receipt_failed(
    ctx: &Ctx,
    rpc: &dyn ChainRpc,
    hash: B256,
) -> anyhow::Result<TxReceipt> {
    wait_receipt(ctx, rpc, hash, TxReceipt::STATUS_FAILED).await
}

/// Wait for the first event on `events` matching `predicate`.
///
/// Returns `Ok(None)` when the context ends first. A stream error, or the stream closing, fails.
pub async fn wait_event<E, F>(
    ctx: &Ctx,
    events: &mut mpsc::Receiver<anyhow::Result<E>>,
    predicate: F,
) -> anyhow::Result<Option<E>>
where
    F: Fn(&E) -> bool,
{
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(Ok(event)) if predicate(&event) => return Ok(Some(event)),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.context("Event stream failed")),
                None => anyhow::bail!("Event stream closed"),
            },
            reason = ctx.done() => {
                tracing::info!(%reason, "Context ended before the event was observed");
                return Ok(None);
            }
        }
    }
}

/// Poll the rollup contract state until `predicate` holds.
pub async fn wait_state<F>(
    ctx: &Ctx,
    contract: &RollupContract,
    predicate: F,
) -> anyhow::Result<StateVariables>
where
    F: Fn(&StateVariables) -> bool,
{
    let mut last = StateVariables::default();
    for attempt in 0..STATE_POLL_ATTEMPTS {
        last = ctx
            .run(contract.state_variables())
            .await
            .context("Failed to read rollup state")?;
        if predicate(&last) {
            return Ok(last);
        }
        if attempt + 1 < STATE_POLL_ATTEMPTS {
            ctx.sleep(STATE_POLL_INTERVAL)
                .await
                .context("Waiting for rollup state")?;
        }
    }

    Err(WaitError::StateNotReached {
        attempts: STATE_POLL_ATTEMPTS,
        last,
    }
    .into())
}

/// Wait until `rpc` answers a chain id query, retrying within `timeout`.
pub async fn wait_node_up(ctx: &Ctx, rpc: &dyn ChainRpc, timeout: Duration) -> anyhow::Result<u64> {
    let ctx = ctx.with_timeout(timeout);
    let probe = || async { rpc.chain_id().await };

    ctx.run(
        probe
            .retry(
                ConstantBuilder::default()
                    .with_delay(NODE_UP_RETRY_DELAY)
                    .with_max_times(usize::MAX),
            )
            .notify(|err, _| {
                tracing::trace!(endpoint = rpc.endpoint(), error = %err, "Node not up yet");
            }),
    )
    .await
    .with_context(|| format!("{} should be up within {timeout:?}", rpc.endpoint()))
}

/// Hash of block `number`, optionally waiting for the chain to reach it first.
pub async fn block_hash_by_number(
    ctx: &Ctx,
    rpc: &dyn ChainRpc,
    number: u64,
    wait: bool,
) -> anyhow::Result<B256> {
    if wait {
        wait_height(ctx, rpc, greater_equal(number)).await?;
    }

    ctx.run(rpc.block_hash(number))
        .await?
        .with_context(|| format!("Block {number} not found on {}", rpc.endpoint()))
}

/// Wait for the `BlockProven` event of the rollup block with hash `block_hash`, scanning from
/// the first settlement block.
pub async fn wait_block_proven(
    ctx: &Ctx,
    contract: &RollupContract,
    block_hash: B256,
) -> anyhow::Result<Option<BlockProven>> {
    let mut events = contract.watch_block_proven(ctx, 0);
    wait_event(ctx, &mut events, |event: &BlockProven| event.block_hash == block_hash).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_core::primitives::address;

    use super::*;
    use crate::testing::{MockChain, block_hash_at};

    #[test]
    fn test_predicates() {
        assert!(greater(1)(2));
        assert!(!greater(2)(2));
        assert!(greater_equal(2)(2));
        assert!(!greater_equal(3)(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_height_returns_observed_height() {
        let chain = Arc::new(MockChain::new(31336));
        let miner = chain.clone();
        tokio::spawn(async move {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(150)).await;
                miner.advance(1);
            }
        });

        let height = wait_height(&Ctx::background(), chain.as_ref(), greater_equal(3))
            .await
            .unwrap();

        assert!(height >= 3);
        assert!(chain.height() >= height);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_height_bounded_by_deadline() {
        let chain = MockChain::new(31336);
        let ctx = Ctx::background().with_timeout(Duration::from_secs(1));

        let err = wait_height(&ctx, &chain, greater(0)).await.unwrap_err();
        assert!(format!("{err:#}").contains("deadline exceeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_height_retries_query_errors_until_deadline() {
        let chain = MockChain::new(31336);
        chain.fail_block_number();
        let ctx = Ctx::background().with_timeout(Duration::from_secs(1));
        let started = tokio::time::Instant::now();

        let err = wait_height(&ctx, &chain, greater_equal(0)).await.unwrap_err();
        assert!(format!("{err:#}").contains("deadline exceeded"));
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_receipt_status_mismatch() {
        let chain = MockChain::new(31336);
        chain.set_receipt_status(TxReceipt::STATUS_FAILED);
        chain.set_receipt_delay(3);
        let vault = crate::Vault::new(31336).unwrap();
        let hash = vault.send_test_tx(&Ctx::background(), &chain).await.unwrap();

        let err = wait_receipt_ok(&Ctx::background(), &chain, hash)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "expected status 1, but got 0");

        let receipt = wait_receipt_failed(&Ctx::background(), &chain, hash)
            .await
            .unwrap();
        assert_eq!(receipt.transaction_hash, hash);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_state_fails_at_cap() {
        let chain = Arc::new(MockChain::new(31336));
        chain.set_state(StateVariables {
            next_block_id: 1,
            ..Default::default()
        });
        let contract = RollupContract::new(address!("232e1128a21bbffbc8d6befacb10137f37a653a0"), chain);

        let err = wait_state(&Ctx::background(), &contract, |s| s.next_block_id == 2)
            .await
            .unwrap_err();

        match err.downcast_ref::<WaitError>() {
            Some(WaitError::StateNotReached { attempts, last }) => {
                assert_eq!(*attempts, STATE_POLL_ATTEMPTS);
                assert_eq!(last.next_block_id, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_state_reached() {
        let chain = Arc::new(MockChain::new(31336));
        let contract = RollupContract::new(address!("232e1128a21bbffbc8d6befacb10137f37a653a0"), chain.clone());
        let writer = chain.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            writer.set_state(StateVariables {
                next_block_id: 2,
                ..Default::default()
            });
        });

        let state = wait_state(&Ctx::background(), &contract, |s| s.next_block_id == 2)
            .await
            .unwrap();
        assert_eq!(state.next_block_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_event_returns_none_when_context_ends() {
        let (_tx, mut rx) = mpsc::channel::<anyhow::Result<u64>>(1);
        let ctx = Ctx::background().with_timeout(Duration::from_secs(1));

        let event = wait_event(&ctx, &mut rx, |_| true).await.unwrap();
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn test_wait_event_skips_non_matching() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(Ok(1u64)).await.unwrap();
        tx.send(Ok(2u64)).await.unwrap();
        tx.send(Ok(3u64)).await.unwrap();

        let event = wait_event(&Ctx::background(), &mut rx, |e| *e == 2).await.unwrap();
        assert_eq!(event, Some(2));
    }

    #[tokio::test]
    async fn test_wait_event_stream_error() {
        let (tx, mut rx) = mpsc::channel::<anyhow::Result<u64>>(1);
        tx.send(Err(anyhow::anyhow!("filter not found"))).await.unwrap();

        let err = wait_event(&Ctx::background(), &mut rx, |_| true).await.unwrap_err();
        assert!(format!("{err:#}").contains("filter not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_block_proven() {
        let chain = Arc::new(MockChain::new(31336));
        let contract = RollupContract::new(address!("232e1128a21bbffbc8d6befacb10137f37a653a0"), chain.clone());
        chain.emit_block_proven(contract.address(), 1, block_hash_at(1));
        chain.advance(1);
        chain.emit_block_proven(contract.address(), 2, block_hash_at(2));

        let event = wait_block_proven(&Ctx::background(), &contract, block_hash_at(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_node_up_times_out() {
        let chain = MockChain::new(31336);
        chain.fail_chain_id();

        let err = wait_node_up(&Ctx::background(), &chain, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("should be up within"));
    }

    #[tokio::test]
    async fn test_block_hash_by_number() {
        let chain = MockChain::new(31336);
        chain.advance(3);

        let hash = block_hash_by_number(&Ctx::background(), &chain, 2, true).await.unwrap();
        assert_eq!(hash, block_hash_at(2));
        assert!(block_hash_by_number(&Ctx::background(), &chain, 9, false).await.is_err());
    }
}
