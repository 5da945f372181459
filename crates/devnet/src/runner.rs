//! Runs scenarios against a devnet with bounded concurrency.

use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Duration,
};

use derive_more::Display;
use futures::{FutureExt, future::BoxFuture};
use tokio::{
    sync::{OnceCell, Semaphore},
    task::JoinSet,
    time::Instant,
};
use tracing::Instrument;

use crate::{
    Ctx, Devnet, ExecutionNode, PipelineParams, ProtocolConstants, SetupError, TestProposer,
    Vault, pipelines,
};

/// Default number of scenarios running at once.
pub const DEFAULT_CONCURRENCY: usize = 15;

pub type ScenarioFn =
    Box<dyn Fn(ScenarioEnv) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A named check run against a devnet.
pub struct Scenario {
    pub name: String,
    pub description: String,
    run: ScenarioFn,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl Scenario {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, run: F) -> Self
    where
        F: Fn(ScenarioEnv) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            run: Box::new(move |env| run(env).boxed()),
        }
    }
}

/// What a scenario gets to work with.
///
/// Each execution gets a fresh environment. [`ScenarioEnv::timeout_ctx`] hands out bounded
/// contexts one at a time: issuing a new one cancels the previous one, and dropping the
/// environment cancels the last.
pub struct ScenarioEnv {
    ctx: Ctx,
    devnet: Arc<Devnet>,
    current: Option<Ctx>,
    constants: OnceCell<ProtocolConstants>,
}

impl std::fmt::Debug for ScenarioEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioEnv")
            .field("ctx", &self.ctx)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl Drop for ScenarioEnv {
    fn drop(&mut self) {
        if let Some(current) = self.current.take() {
            current.cancel();
        }
    }
}

impl ScenarioEnv {
    pub fn new(ctx: Ctx, devnet: Arc<Devnet>) -> Self {
        Self {
            ctx,
            devnet,
            current: None,
            constants: OnceCell::new(),
        }
    }

    /// The scenario's root context.
    pub fn ctx(&self) -> &Ctx {
        &self.ctx
    }

    pub fn devnet(&self) -> &Arc<Devnet> {
        &self.devnet
    }

    /// A context bounded by `timeout`. The context handed out by the previous call is cancelled.
    pub fn timeout_ctx(&mut self, timeout: Duration) -> Ctx {
        if let Some(previous) = self.current.take() {
            previous.cancel();
        }
        let ctx = self.ctx.with_timeout(timeout);
        self.current = Some(ctx.clone());
        ctx
    }

    /// [`ScenarioEnv::timeout_ctx`] with the configured RPC timeout.
    pub fn rpc_ctx(&mut self) -> Ctx {
        let timeout = self.devnet.config().rpc_timeout();
        self.timeout_ctx(timeout)
    }

    pub fn l1_vault(&self) -> &Vault {
        self.devnet.l1_vault()
    }

    pub fn l2_vault(&self) -> &Vault {
        self.devnet.l2_vault()
    }

    /// Protocol constants, read once per scenario.
    pub async fn constants(&self) -> anyhow::Result<ProtocolConstants> {
        self.constants
            .get_or_try_init(|| self.devnet.protocol_constants(&self.ctx))
            .await
            .copied()
    }

    /// A [`TestProposer`] against the primary settlement engine.
    pub fn proposer(&self) -> anyhow::Result<TestProposer> {
        TestProposer::new(self.devnet.clone(), self.devnet.l1_engine(0)?)
    }

    pub async fn gen_some_l1_blocks(&self, count: u64) -> anyhow::Result<()> {
        self.devnet.gen_some_l1_blocks(&self.ctx, count).await
    }

    pub async fn gen_some_l2_blocks(&self, count: u64) -> anyhow::Result<()> {
        self.devnet.gen_some_l2_blocks(&self.ctx, count).await
    }

    pub async fn gen_commit_delay_blocks(&self) -> anyhow::Result<()> {
        let constants = self.constants().await?;
        self.devnet
            .gen_some_l1_blocks(&self.ctx, constants.commit_confirmations)
            .await
    }

    pub async fn start_l1_l2(
        &self,
        params: &PipelineParams,
    ) -> anyhow::Result<(Arc<ExecutionNode>, Arc<ExecutionNode>)> {
        pipelines::start_l1_l2(&self.ctx, &self.devnet, params).await
    }

    pub async fn start_l1_l2_driver(
        &self,
        params: &PipelineParams,
    ) -> anyhow::Result<(Arc<ExecutionNode>, Arc<ExecutionNode>)> {
        pipelines::start_l1_l2_driver(&self.ctx, &self.devnet, params).await
    }

    pub async fn start_l1_l2_proposer_driver(
        &self,
        params: &PipelineParams,
    ) -> anyhow::Result<(Arc<ExecutionNode>, Arc<ExecutionNode>)> {
        pipelines::start_l1_l2_proposer_driver(&self.ctx, &self.devnet, params).await
    }

    pub async fn start_single_node_net(
        &self,
        params: &PipelineParams,
    ) -> anyhow::Result<(Arc<ExecutionNode>, Arc<ExecutionNode>)> {
        pipelines::start_single_node_net(&self.ctx, &self.devnet, params).await
    }
}

/// Scenarios to run and the devnet to run them on.
#[derive(Debug)]
pub struct RunParams {
    pub devnet: Arc<Devnet>,
    pub scenarios: Vec<Scenario>,
    /// Upper bound on scenarios running at once. Zero is treated as one.
    pub concurrency: usize,
}

impl RunParams {
    pub fn new(devnet: Arc<Devnet>, scenarios: Vec<Scenario>) -> Self {
        Self {
            devnet,
            scenarios,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum Outcome {
    #[display("passed")]
    Passed,
    #[display("failed: {_0}")]
    Failed(String),
    /// Never started because an earlier scenario broke the devnet.
    #[display("skipped")]
    Skipped,
    /// Still running when the run's deadline passed.
    #[display("unfinished")]
    Unfinished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioOutcome {
    pub name: String,
    pub description: String,
    pub outcome: Outcome,
    pub duration: Duration,
}

/// Outcomes in the order the scenarios were given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub outcomes: Vec<ScenarioOutcome>,
}

impl RunReport {
    fn count(&self, f: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| f(&o.outcome)).count()
    }

    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped))
    }

    pub fn unfinished(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Unfinished))
    }

    /// True when every scenario passed.
    pub fn success(&self) -> bool {
        self.passed() == self.outcomes.len()
    }

    pub fn extend(&mut self, other: RunReport) {
        self.outcomes.extend(other.outcomes);
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("panicked: {message}")
}

/// Run every scenario once, at most `params.concurrency` at a time.
///
/// A scenario failing with a [`SetupError`] cancels the run: running scenarios see their
/// context cancelled and scenarios that have not started are skipped. When `ctx` ends, the
/// runner stops waiting and reports the scenarios still running as unfinished; they keep
/// running in the background until they observe the cancellation.
pub async fn run_scenarios(ctx: &Ctx, params: RunParams) -> RunReport {
    let RunParams {
        devnet,
        scenarios,
        concurrency,
    } = params;

    let root = ctx.child();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut outcomes: Vec<ScenarioOutcome> = scenarios
        .iter()
        .map(|s| ScenarioOutcome {
            name: s.name.clone(),
            description: s.description.clone(),
            outcome: Outcome::Unfinished,
            duration: Duration::ZERO,
        })
        .collect();

    tracing::info!(scenarios = scenarios.len(), concurrency, "Running scenarios");

    let mut tasks = JoinSet::new();
    for (index, scenario) in scenarios.into_iter().enumerate() {
        let root = root.clone();
        let semaphore = semaphore.clone();
        let devnet = devnet.clone();

        tasks.spawn(async move {
            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit.ok(),
                _ = root.done() => None,
            };
            let _permit = match permit {
                Some(permit) if !root.is_done() => permit,
                _ => return (index, Outcome::Skipped, Duration::ZERO),
            };

            let span = tracing::info_span!(
                "scenario",
                name = %scenario.name,
                description = %scenario.description
            );
            let started = Instant::now();
            let env = ScenarioEnv::new(root.child(), devnet);

            let result = AssertUnwindSafe((scenario.run)(env).instrument(span.clone()))
                .catch_unwind()
                .await;

            let outcome = match result {
                Ok(Ok(())) => {
                    span.in_scope(|| tracing::info!("Scenario passed"));
                    Outcome::Passed
                }
                Ok(Err(err)) => {
                    if SetupError::is_setup_error(&err) {
                        span.in_scope(|| {
                            tracing::error!(error = %format!("{err:#}"), "Setup failed, aborting run")
                        });
                        root.cancel();
                    } else {
                        span.in_scope(|| {
                            tracing::error!(error = %format!("{err:#}"), "Scenario failed")
                        });
                    }
                    Outcome::Failed(format!("{err:#}"))
                }
                Err(panic) => {
                    let message = panic_message(panic);
                    span.in_scope(|| tracing::error!(error = %message, "Scenario panicked"));
                    Outcome::Failed(message)
                }
            };

            (index, outcome, started.elapsed())
        });
    }

    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                Some(Ok((index, outcome, duration))) => {
                    outcomes[index].outcome = outcome;
                    outcomes[index].duration = duration;
                }
                Some(Err(err)) => tracing::error!(error = %err, "Scenario task failed"),
                None => break,
            },
            err = ctx.done() => {
                tracing::warn!(
                    error = %err,
                    remaining = tasks.len(),
                    "Run ended before every scenario finished"
                );
                tasks.detach_all();
                break;
            }
        }
    }

    let report = RunReport { outcomes };
    tracing::info!(
        passed = report.passed(),
        failed = report.failed(),
        skipped = report.skipped(),
        unfinished = report.unfinished(),
        "Scenarios done"
    );
    report
}
