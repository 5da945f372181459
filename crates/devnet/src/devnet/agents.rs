use std::sync::Arc;

use alloy_consensus::TxEip1559;
use alloy_core::primitives::{TxKind, U256};
use alloy_eips::eip2718::Encodable2718;
use anyhow::Context;
use url::Url;

use super::Devnet;
use crate::{
    Ctx, ExecutionNode, Node, NodeBuilder, Role, SetupError, contracts,
    rpc::CallRequest,
    vault::sign_with,
    wait,
};

/// Priority fee of the prover whitelist transaction.
const WHITELIST_PRIORITY_FEE: u128 = 1_500_000_000;

/// A rollup engine reserved for a relay agent being launched. Dropping it releases the engine.
struct RelayReservation<'a> {
    devnet: &'a Devnet,
    engine_url: Url,
}

impl RelayReservation<'_> {
    /// Record the launched relay agent and release the reservation.
    fn complete(self, node: Arc<Node>) {
        self.devnet.topology.write().relay_agents.push(node);
    }
}

impl Drop for RelayReservation<'_> {
    fn drop(&mut self) {
        self.devnet
            .topology
            .write()
            .pending_relays
            .retain(|url| url != &self.engine_url);
    }
}

impl Devnet {
    /// Launch a relay agent driving `l2` from the commitments on `l1`.
    ///
    /// Every running relay agent drives its own rollup engine, so `l2` must be the one rollup
    /// engine without a relay agent yet. The engine is reserved before the launch, so concurrent
    /// calls cannot both pick it.
    pub async fn add_relay_agent(
        &self,
        ctx: &Ctx,
        l1: &ExecutionNode,
        l2: &ExecutionNode,
        enable_p2p: bool,
    ) -> anyhow::Result<Arc<Node>> {
        let engine_url = l2.engine_url()?;
        let reservation = self.reserve_relay(l2.name(), engine_url.clone())?;

        let client = self.client(Role::RelayAgent, 0)?;
        let builder = NodeBuilder::new(Role::RelayAgent, client.clone())
            .name(self.container_name(&client))
            .l1_endpoint(l1.ws_rpc_url()?)
            .l2_endpoint(l2.ws_rpc_url()?)
            .l2_engine_endpoint(engine_url)
            .l1_rollup_address(l1.rollup_address()?)
            .l2_rollup_address(l2.rollup_address()?)
            .throwaway_private_key(self.accounts.throwaway.private_key_hex())
            .jwt_secret(&self.config.l2.jwt_secret)
            .enable_l2_p2p(enable_p2p)
            .no_live_check();

        let node = Arc::new(ctx.run(builder.launch(self.runtime.clone())).await?);
        reservation.complete(node.clone());

        tracing::info!(
            node = %node.name(),
            l1 = %l1.name(),
            l2 = %l2.name(),
            p2p = enable_p2p,
            "Relay agent added"
        );

        Ok(node)
    }

    /// Check the relay invariant and reserve `engine_url` under one write lock.
    fn reserve_relay(
        &self,
        l2_name: &str,
        engine_url: Url,
    ) -> Result<RelayReservation<'_>, SetupError> {
        let mut topology = self.topology.write();
        let running = topology
            .relay_agents
            .iter()
            .filter(|n| n.is_running())
            .collect::<Vec<_>>();

        let driven = topology.pending_relays.contains(&engine_url)
            || running
                .iter()
                .any(|n| n.config().l2_engine_endpoint.as_ref() == Some(&engine_url));
        if driven {
            return Err(SetupError::Topology {
                reason: format!("rollup engine {l2_name} already has a relay agent"),
            });
        }

        let engines = topology.l2_engines.len();
        let relays = running.len() + topology.pending_relays.len();
        if engines != relays + 1 {
            return Err(SetupError::Topology {
                reason: format!(
                    "a relay agent needs exactly one undriven rollup engine, have {engines} engines and {relays} running relay agents"
                ),
            });
        }

        topology.pending_relays.push(engine_url.clone());
        Ok(RelayReservation {
            devnet: self,
            engine_url,
        })
    }

    /// Launch a proposer. A non-zero `produce_invalid_blocks_interval` makes it propose an
    /// invalid block every that many seconds.
    pub async fn add_proposer_agent(
        &self,
        ctx: &Ctx,
        l1: &ExecutionNode,
        l2: &ExecutionNode,
        produce_invalid_blocks_interval: Option<u64>,
    ) -> anyhow::Result<Arc<Node>> {
        let client = self.client(Role::Proposer, 0)?;
        let mut builder = NodeBuilder::new(Role::Proposer, client.clone())
            .name(self.container_name(&client))
            .l1_endpoint(l1.ws_rpc_url()?)
            .l2_endpoint(l2.ws_rpc_url()?)
            .l1_rollup_address(l1.rollup_address()?)
            .l2_rollup_address(l2.rollup_address()?)
            .proposer_private_key(self.accounts.proposer.private_key_hex())
            .fee_recipient(self.accounts.fee_recipient.address)
            .propose_interval(self.config.l2.propose_interval())
            .no_live_check();
        if let Some(interval) = produce_invalid_blocks_interval.filter(|i| *i > 0) {
            builder = builder.produce_invalid_blocks_interval(interval);
        }

        let node = Arc::new(ctx.run(builder.launch(self.runtime.clone())).await?);
        self.topology.write().proposers.push(node.clone());

        tracing::info!(
            node = %node.name(),
            invalid_blocks_interval = ?produce_invalid_blocks_interval,
            "Proposer added"
        );

        Ok(node)
    }

    /// Whitelist the prover account on `l1`, then launch a prover.
    pub async fn add_prover_agent(
        &self,
        ctx: &Ctx,
        l1: &ExecutionNode,
        l2: &ExecutionNode,
    ) -> anyhow::Result<Arc<Node>> {
        self.whitelist_prover(ctx, l1)
            .await
            .context("Failed to whitelist prover")?;

        let client = self.client(Role::Prover, 0)?;
        let builder = NodeBuilder::new(Role::Prover, client.clone())
            .name(self.container_name(&client))
            .l1_endpoint(l1.ws_rpc_url()?)
            .l2_endpoint(l2.ws_rpc_url()?)
            .l1_rollup_address(l1.rollup_address()?)
            .l2_rollup_address(l2.rollup_address()?)
            .prover_private_key(self.accounts.prover.private_key_hex())
            .no_live_check();

        let node = Arc::new(ctx.run(builder.launch(self.runtime.clone())).await?);
        self.topology.write().provers.push(node.clone());

        tracing::info!(node = %node.name(), prover = %self.accounts.prover.address, "Prover added");
        Ok(node)
    }

    async fn whitelist_prover(&self, ctx: &Ctx, l1: &ExecutionNode) -> anyhow::Result<()> {
        let rpc = l1.rpc().as_ref();
        let deployer = &self.accounts.l1_deployer;
        let rollup = l1.rollup_address()?;
        let input = contracts::whitelist_prover_calldata(self.accounts.prover.address, true);

        let nonce = ctx.run(rpc.pending_nonce(deployer.address)).await?;
        let gas_limit = ctx
            .run(rpc.estimate_gas(&CallRequest::new(rollup, input.clone()).sender(deployer.address)))
            .await?;
        let gas_price = ctx.run(rpc.gas_price()).await?;

        let tx = TxEip1559 {
            chain_id: self.config.l1.chain_id,
            nonce,
            gas_limit,
            max_fee_per_gas: gas_price.saturating_mul(2) + WHITELIST_PRIORITY_FEE,
            max_priority_fee_per_gas: WHITELIST_PRIORITY_FEE,
            to: TxKind::Call(rollup),
            value: U256::ZERO,
            access_list: Default::default(),
            input,
        };
        let tx = sign_with(deployer.signer(), tx)?;

        let hash = ctx.run(rpc.send_raw_transaction(tx.encoded_2718().into())).await?;
        let receipt = wait::wait_receipt_ok(ctx, rpc, hash).await?;

        tracing::info!(
            prover = %self.accounts.prover.address,
            height = ?receipt.block_number(),
            "Prover whitelisted"
        );
        Ok(())
    }
}
