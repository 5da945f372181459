//! Standard devnet bring-up sequences.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Ctx, Devnet, ExecutionNode};

/// Settlement height [`start_single_node_net`] waits for before returning.
const SINGLE_NODE_NET_MIN_L1_HEIGHT: u64 = 2;

/// Knobs of a bring-up sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineParams {
    /// Seconds between deliberately invalid proposals, for proposer agents.
    pub produce_invalid_blocks_interval: Option<u64>,
    /// Sync mode of the rollup engine. Defaults to `full`.
    pub node_type: Option<String>,
}

impl PipelineParams {
    pub fn produce_invalid_blocks_interval(mut self, seconds: u64) -> Self {
        self.produce_invalid_blocks_interval = Some(seconds);
        self
    }

    pub fn node_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = Some(node_type.into());
        self
    }
}

/// The bring-up sequences, from an empty devnet to a full single-instance network.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Pipeline {
    /// Nothing is started; scenarios bring up what they need.
    #[default]
    Empty,
    L1L2,
    L1L2Driver,
    L1L2ProposerDriver,
    /// One instance of every role.
    SingleNode,
}

impl Pipeline {
    pub async fn run(self, ctx: &Ctx, devnet: &Devnet, params: &PipelineParams) -> anyhow::Result<()> {
        tracing::info!(pipeline = %self, "Starting devnet");
        match self {
            Pipeline::Empty => {}
            Pipeline::L1L2 => {
                start_l1_l2(ctx, devnet, params).await?;
            }
            Pipeline::L1L2Driver => {
                start_l1_l2_driver(ctx, devnet, params).await?;
            }
            Pipeline::L1L2ProposerDriver => {
                start_l1_l2_proposer_driver(ctx, devnet, params).await?;
            }
            Pipeline::SingleNode => {
                start_single_node_net(ctx, devnet, params).await?;
            }
        }
        Ok(())
    }
}

/// Rollup engine, then the settlement engine with the contracts deployed.
pub async fn start_l1_l2(
    ctx: &Ctx,
    devnet: &Devnet,
    params: &PipelineParams,
) -> anyhow::Result<(Arc<ExecutionNode>, Arc<ExecutionNode>)> {
    let l2 = match &params.node_type {
        Some(node_type) => {
            devnet
                .add_rollup_engine_with_type(ctx, 0, false, node_type)
                .await?
        }
        None => devnet.add_rollup_engine(ctx, 0, false).await?,
    };
    let l1 = devnet.add_settlement_engine(ctx, 0, &l2).await?;
    Ok((l1, l2))
}

pub async fn start_l1_l2_driver(
    ctx: &Ctx,
    devnet: &Devnet,
    params: &PipelineParams,
) -> anyhow::Result<(Arc<ExecutionNode>, Arc<ExecutionNode>)> {
    let (l1, l2) = start_l1_l2(ctx, devnet, params).await?;
    devnet.add_relay_agent(ctx, &l1, &l2, false).await?;
    Ok((l1, l2))
}

pub async fn start_l1_l2_proposer_driver(
    ctx: &Ctx,
    devnet: &Devnet,
    params: &PipelineParams,
) -> anyhow::Result<(Arc<ExecutionNode>, Arc<ExecutionNode>)> {
    let (l1, l2) = start_l1_l2_driver(ctx, devnet, params).await?;
    devnet
        .add_proposer_agent(ctx, &l1, &l2, params.produce_invalid_blocks_interval)
        .await?;
    Ok((l1, l2))
}

/// Every role once, then wait for the settlement chain to produce a couple of blocks.
pub async fn start_single_node_net(
    ctx: &Ctx,
    devnet: &Devnet,
    params: &PipelineParams,
) -> anyhow::Result<(Arc<ExecutionNode>, Arc<ExecutionNode>)> {
    let (l1, l2) = start_l1_l2_proposer_driver(ctx, devnet, params).await?;
    devnet.add_prover_agent(ctx, &l1, &l2).await?;
    devnet
        .wait_l1_block(ctx, 0, SINGLE_NODE_NET_MIN_L1_HEIGHT)
        .await?;
    Ok((l1, l2))
}
