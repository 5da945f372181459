use std::sync::Arc;

use anyhow::Context;

use super::Devnet;
use crate::{Ctx, ExecutionNode, Node, NodeBuilder, Role, SetupError, wait};

/// Node type rollup engines run with unless told otherwise.
const DEFAULT_L2_NODE_TYPE: &str = "full";
const DEFAULT_L2_LOG_LEVEL: &str = "4";

/// Script in the deployer image that deploys the rollup contracts.
const DEPLOY_SCRIPT: &str = "deploy.sh";

impl Devnet {
    /// Dial a freshly launched engine and wait for it to answer RPC calls.
    async fn bring_up(&self, ctx: &Ctx, node: Node) -> anyhow::Result<ExecutionNode> {
        let engine = ExecutionNode::dial(node, self.dialer.as_ref())?;
        let timeout = self.config.node_up_timeout();

        wait::wait_node_up(ctx, engine.rpc().as_ref(), timeout)
            .await
            .map_err(|e| SetupError::NodeNotUp {
                node: engine.name().to_string(),
                timeout_secs: timeout.as_secs(),
                reason: format!("{e:#}"),
            })?;

        Ok(engine)
    }

    /// Launch rollup engine client `index`.
    ///
    /// With `bootstrap`, the engine is given the peer URLs of every rollup engine added before it.
    pub async fn add_rollup_engine(
        &self,
        ctx: &Ctx,
        index: usize,
        bootstrap: bool,
    ) -> anyhow::Result<Arc<ExecutionNode>> {
        self.add_rollup_engine_with_type(ctx, index, bootstrap, DEFAULT_L2_NODE_TYPE)
            .await
    }

    /// [`Devnet::add_rollup_engine`] with an explicit sync mode (`full` or `snap`).
    pub async fn add_rollup_engine_with_type(
        &self,
        ctx: &Ctx,
        index: usize,
        bootstrap: bool,
        node_type: &str,
    ) -> anyhow::Result<Arc<ExecutionNode>> {
        let client = self.client(Role::RollupEngine, index)?;
        let bootnodes = if bootstrap {
            self.l2_enode_urls().await?
        } else {
            Vec::new()
        };

        let l2 = &self.config.l2;
        let node = NodeBuilder::new(Role::RollupEngine, client.clone())
            .name(self.container_name(&client))
            .network_id(l2.network_id)
            .jwt_secret(&l2.jwt_secret)
            .node_type(node_type)
            .log_level(DEFAULT_L2_LOG_LEVEL)
            .bootnodes(bootnodes)
            .launch(self.runtime.clone())
            .await?;

        let engine = self.bring_up(ctx, node).await?;

        let genesis = wait::block_hash_by_number(ctx, engine.rpc().as_ref(), 0, false)
            .await
            .with_context(|| format!("Failed to read genesis block of {}", engine.name()))?;
        engine.set_genesis_hash(genesis)?;

        // Engines joining after deployment get the predeployed rollup contract right away.
        if self.count(Role::SettlementEngine) > 0 {
            engine.set_rollup_address(self.config.deployments.l2_rollup_address)?;
        }

        let engine = Arc::new(engine);
        self.topology.write().l2_engines.push(engine.clone());

        tracing::info!(
            node = %engine.name(),
            genesis = %genesis,
            bootstrap,
            "Rollup engine added"
        );

        Ok(engine)
    }

    /// Launch settlement engine client `index` and deploy the rollup contracts on it, paired with
    /// the rollup engine `l2`.
    pub async fn add_settlement_engine(
        &self,
        ctx: &Ctx,
        index: usize,
        l2: &ExecutionNode,
    ) -> anyhow::Result<Arc<ExecutionNode>> {
        let client = self.client(Role::SettlementEngine, index)?;

        let l1 = &self.config.l1;
        let node = NodeBuilder::new(Role::SettlementEngine, client.clone())
            .name(self.container_name(&client))
            .network_id(l1.network_id)
            .l1_chain_id(l1.chain_id)
            .clique_period(l1.clique_period)
            .launch(self.runtime.clone())
            .await?;

        let engine = self.bring_up(ctx, node).await?;

        self.deploy_contracts(ctx, &engine, l2).await?;

        let deployments = &self.config.deployments;
        engine.set_rollup_address(deployments.l1_rollup_address)?;
        l2.set_rollup_address(deployments.l2_rollup_address)?;

        let engine = Arc::new(engine);
        self.topology.write().l1_engines.push(engine.clone());

        tracing::info!(
            node = %engine.name(),
            rollup = %deployments.l1_rollup_address,
            "Settlement engine added"
        );

        Ok(engine)
    }

    /// Run the deployer image against `l1`. The deployer container is stopped afterwards.
    async fn deploy_contracts(
        &self,
        ctx: &Ctx,
        l1: &ExecutionNode,
        l2: &ExecutionNode,
    ) -> anyhow::Result<()> {
        let client = self.client(Role::ContractDeployer, 0)?;
        let deployer = &self.accounts.l1_deployer;

        let node = NodeBuilder::new(Role::ContractDeployer, client.clone())
            .name(self.container_name(&client))
            .deployer(deployer.private_key_hex(), deployer.address)
            .l2_genesis_hash(l2.genesis_hash()?)
            .l2_rollup_address(self.config.deployments.l2_rollup_address)
            .l1_endpoint(l1.http_rpc_url()?)
            .l2_chain_id(self.config.l2.chain_id)
            .no_live_check()
            .launch(self.runtime.clone())
            .await?;
        let node = Arc::new(node);
        self.topology.write().deployer = Some(node.clone());

        tracing::info!(node = %node.name(), l1 = %l1.name(), "Deploying rollup contracts");

        let output = ctx.run(node.exec(&[DEPLOY_SCRIPT])).await;
        if let Err(e) = node.stop().await {
            tracing::warn!(node = %node.name(), error = %e, "Failed to stop contract deployer");
        }
        let output = output?;

        if !output.success() {
            let text = if output.stderr.trim().is_empty() {
                output.stdout
            } else {
                output.stderr
            };
            return Err(SetupError::Deployment {
                node: l1.name().to_string(),
                exit_code: output.exit_code,
                output: text.trim().to_string(),
            }
            .into());
        }

        tracing::info!(l1 = %l1.name(), "Rollup contracts deployed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        Ctx, DEFAULT_L1_ROLLUP_ADDRESS, DEFAULT_L2_ROLLUP_ADDRESS, Role, SetupError, env,
        devnet::tests::harness, testing::block_hash_at,
    };

    #[tokio::test]
    async fn test_settlement_engine_deploys_contracts() {
        let h = harness();
        let ctx = Ctx::background();

        let l2 = h.devnet.add_rollup_engine(&ctx, 0, false).await.unwrap();
        let l1 = h.devnet.add_settlement_engine(&ctx, 0, &l2).await.unwrap();

        assert_eq!(l2.genesis_hash().unwrap(), block_hash_at(0));
        assert_eq!(l1.rollup_address().unwrap(), DEFAULT_L1_ROLLUP_ADDRESS);
        assert_eq!(l2.rollup_address().unwrap(), DEFAULT_L2_ROLLUP_ADDRESS);

        let deployer = h.devnet.deployer().unwrap();
        assert!(!deployer.is_running());

        let journal = h.runtime.journal();
        let exec = journal
            .iter()
            .position(|e| e == &format!("exec:{}:deploy.sh", deployer.name()))
            .unwrap();
        let stop = journal
            .iter()
            .position(|e| e == &format!("stop:{}", deployer.name()))
            .unwrap();
        assert!(exec < stop);

        let spec = h
            .runtime
            .started()
            .into_iter()
            .find(|s| s.name == deployer.name())
            .unwrap();
        assert_eq!(spec.env[env::TAIKO_MAINNET_URL], l1.http_rpc_url().unwrap().to_string());
        assert_eq!(spec.env[env::CHECK_LIVE_PORT], "0");
        assert!(spec.env.contains_key(env::TAIKO_L2_GENESIS_BLOCK_HASH));
    }

    #[tokio::test]
    async fn test_failed_deployment_is_fatal() {
        let h = harness();
        h.runtime.set_exec_exit_code("deploy.sh", 1);
        let ctx = Ctx::background();

        let l2 = h.devnet.add_rollup_engine(&ctx, 0, false).await.unwrap();
        let err = h.devnet.add_settlement_engine(&ctx, 0, &l2).await.unwrap_err();

        assert!(SetupError::is_setup_error(&err));
        assert!(err.to_string().contains("exited with code 1"));
        assert_eq!(h.devnet.count(Role::SettlementEngine), 0);
        assert!(l2.rollup_address().is_err());
    }

    #[tokio::test]
    async fn test_bootstrap_passes_previous_enodes() {
        let h = harness();
        let ctx = Ctx::background();

        let first = h.devnet.add_rollup_engine(&ctx, 0, false).await.unwrap();
        let second = h.devnet.add_rollup_engine(&ctx, 0, true).await.unwrap();

        let spec = h
            .runtime
            .started()
            .into_iter()
            .find(|s| s.name == second.name())
            .unwrap();
        let bootnodes = &spec.env[env::TAIKO_BOOTNODE];
        assert!(bootnodes.starts_with("enode://"));
        assert!(bootnodes.ends_with(&format!("@{}:30303", first.ip())));
        assert_eq!(h.devnet.count(Role::RollupEngine), 2);
    }

    #[tokio::test]
    async fn test_late_engine_knows_rollup_contract() {
        let h = harness();
        let ctx = Ctx::background();

        let first = h.devnet.add_rollup_engine(&ctx, 0, false).await.unwrap();
        assert!(first.rollup_address().is_err());
        let l1 = h.devnet.add_settlement_engine(&ctx, 0, &first).await.unwrap();
        h.devnet.add_relay_agent(&ctx, &l1, &first, false).await.unwrap();

        let late = h
            .devnet
            .add_rollup_engine_with_type(&ctx, 0, true, "snap")
            .await
            .unwrap();
        assert_eq!(late.rollup_address().unwrap(), DEFAULT_L2_ROLLUP_ADDRESS);

        // The late engine can be driven right away.
        h.devnet.add_relay_agent(&ctx, &l1, &late, true).await.unwrap();
        assert_eq!(h.devnet.count(Role::RelayAgent), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_not_up_is_fatal() {
        let h = harness();
        h.chain.fail_chain_id();

        let err = h
            .devnet
            .add_rollup_engine(&Ctx::background(), 0, false)
            .await
            .unwrap_err();
        assert!(SetupError::is_setup_error(&err));
        assert!(err.to_string().contains("did not come up within 10s"));
    }

    #[tokio::test]
    async fn test_l2_engine_getter_returns_same_node() {
        let h = harness();
        h.devnet
            .add_rollup_engine(&Ctx::background(), 0, false)
            .await
            .unwrap();

        let a = h.devnet.l2_engine(0).unwrap();
        let b = h.devnet.l2_engine(0).unwrap();
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }
}
