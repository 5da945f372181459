use std::{sync::Arc, time::Duration};

use rollnet_devnet::{
    Ctx, Devnet, DevnetConfig, DockerRuntime, HttpDialer, Outcome, PipelineParams, RunParams,
    RunReport, Scenario, ScenarioOutcome, pipelines::Pipeline, run_scenarios,
};

use crate::scenarios;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SuiteName {
    Blocks,
    Sync,
    Proposals,
    Vault,
}

/// How the scenarios of a suite get their devnet.
#[derive(Debug, Clone)]
pub enum Layout {
    /// One devnet brought up by the pipeline, shared by every scenario.
    Shared {
        pipeline: Pipeline,
        params: PipelineParams,
        /// Caps the run's concurrency for scenarios that reshape the topology.
        max_concurrency: Option<usize>,
    },
    /// A fresh empty devnet per scenario, run one after the other.
    Isolated,
}

#[derive(Debug)]
pub struct Suite {
    pub name: SuiteName,
    pub description: &'static str,
    pub layout: Layout,
    pub scenarios: Vec<Scenario>,
}

pub fn all() -> Vec<Suite> {
    vec![
        Suite {
            name: SuiteName::Blocks,
            description: "First blocks on both chains and the first verified rollup block",
            layout: Layout::Shared {
                pipeline: Pipeline::SingleNode,
                params: PipelineParams::default(),
                max_concurrency: None,
            },
            scenarios: scenarios::blocks::scenarios(),
        },
        Suite {
            name: SuiteName::Sync,
            description: "Rollup engines joining a running devnet",
            layout: Layout::Shared {
                pipeline: Pipeline::SingleNode,
                params: PipelineParams::default(),
                max_concurrency: Some(1),
            },
            scenarios: scenarios::sync::scenarios(),
        },
        Suite {
            name: SuiteName::Proposals,
            description: "Proposals the contract has to reject or tolerate",
            layout: Layout::Isolated,
            scenarios: scenarios::proposals::scenarios(),
        },
        Suite {
            name: SuiteName::Vault,
            description: "Account funding on the settlement chain",
            layout: Layout::Shared {
                pipeline: Pipeline::L1L2ProposerDriver,
                params: PipelineParams::default(),
                // Scenarios assert on the shared vault nonce.
                max_concurrency: Some(1),
            },
            scenarios: scenarios::vault::scenarios(),
        },
    ]
}

/// Docker network names only allow a restricted alphabet.
fn network_name(base: &str, parts: &[&str]) -> String {
    std::iter::once(base)
        .chain(parts.iter().copied())
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

async fn launch_devnet(config: &DevnetConfig, net_name: String) -> anyhow::Result<Arc<Devnet>> {
    let mut config = config.clone();
    config.docker.net_name = net_name;

    let runtime = Arc::new(DockerRuntime::new(config.docker.clone()).await?);
    let devnet = Devnet::new(Arc::new(config), runtime, Arc::new(HttpDialer))?;
    Ok(Arc::new(devnet))
}

fn outcome(name: String, description: &str, outcome: Outcome) -> ScenarioOutcome {
    ScenarioOutcome {
        name,
        description: description.to_string(),
        outcome,
        duration: Duration::ZERO,
    }
}

impl Suite {
    /// Drop the scenarios `keep` rejects.
    pub fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        self.scenarios.retain(|s| keep(&s.name));
    }

    pub async fn run(
        self,
        ctx: &Ctx,
        config: &DevnetConfig,
        concurrency: usize,
    ) -> anyhow::Result<RunReport> {
        tracing::info!(
            suite = %self.name,
            scenarios = self.scenarios.len(),
            "Running suite"
        );

        match self.layout {
            Layout::Shared {
                pipeline,
                params,
                max_concurrency,
            } => {
                let net_name = network_name(&config.docker.net_name, &[&self.name.to_string()]);
                let devnet = launch_devnet(config, net_name).await?;

                if let Err(err) = pipeline.run(ctx, &devnet, &params).await {
                    tracing::error!(suite = %self.name, error = %format!("{err:#}"), "Devnet setup failed");

                    let mut outcomes = vec![outcome(
                        format!("{}/setup", self.name),
                        "devnet bring-up",
                        Outcome::Failed(format!("{err:#}")),
                    )];
                    outcomes.extend(
                        self.scenarios
                            .iter()
                            .map(|s| outcome(s.name.clone(), &s.description, Outcome::Skipped)),
                    );
                    return Ok(RunReport { outcomes });
                }

                let concurrency = max_concurrency.map_or(concurrency, |max| concurrency.min(max));
                Ok(run_scenarios(ctx, RunParams::new(devnet, self.scenarios).concurrency(concurrency)).await)
            }
            Layout::Isolated => {
                let mut report = RunReport::default();
                for scenario in self.scenarios {
                    if ctx.is_done() {
                        report.outcomes.push(outcome(
                            scenario.name.clone(),
                            &scenario.description,
                            Outcome::Skipped,
                        ));
                        continue;
                    }

                    let net_name = network_name(
                        &config.docker.net_name,
                        &[&self.name.to_string(), &scenario.name],
                    );
                    let devnet = launch_devnet(config, net_name).await?;
                    report.extend(
                        run_scenarios(ctx, RunParams::new(devnet, vec![scenario]).concurrency(1))
                            .await,
                    );
                }
                Ok(report)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_every_suite_is_registered_once() {
        let names = all().into_iter().map(|s| s.name).collect::<Vec<_>>();
        assert_eq!(names, SuiteName::iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_scenario_names_are_unique() {
        let mut seen = HashSet::new();
        for suite in all() {
            assert!(!suite.scenarios.is_empty(), "{} has no scenarios", suite.name);
            for scenario in &suite.scenarios {
                assert!(seen.insert(scenario.name.clone()), "duplicate {}", scenario.name);
            }
        }
    }

    #[test]
    fn test_network_name_is_sanitized() {
        assert_eq!(
            network_name("rollnet", &["proposals", "propose invalid/tx"]),
            "rollnet-proposals-propose-invalid-tx"
        );
    }

    #[test]
    fn test_retain_filters_scenarios() {
        let mut suite = all()
            .into_iter()
            .find(|s| s.name == SuiteName::Proposals)
            .unwrap();
        suite.retain(|name| name.contains("invalid"));

        assert_eq!(suite.scenarios.len(), 2);
    }
}
