//! rollnet brings up ephemeral rollup devnets in docker and runs scenario suites against them.

mod cli;
mod report;
mod scenarios;
mod suites;

use anyhow::Result;
use clap::Parser;

use cli::Cli;
use rollnet_devnet::{Ctx, DevnetConfig, RunReport};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let mut selected = suites::all()
        .into_iter()
        .filter(|suite| cli.selects_suite(suite.name))
        .collect::<Vec<_>>();
    for suite in &mut selected {
        suite.retain(|name| cli.selects_scenario(name));
    }
    selected.retain(|suite| !suite.scenarios.is_empty());

    if cli.list {
        println!("{}", report::list(&selected));
        return Ok(());
    }

    if selected.is_empty() {
        anyhow::bail!("No scenario matches the given filters");
    }

    let mut config = DevnetConfig::load(cli.config.as_deref())?;
    // A fresh network name per run unless one is given.
    config.docker.net_name = cli.network.clone().unwrap_or_else(|| {
        let name = names::Generator::default()
            .next()
            .unwrap_or_else(|| "run".to_string());
        format!("{}-{name}", config.docker.net_name)
    });
    if cli.no_cleanup {
        config.docker.no_cleanup = true;
    }

    tracing::info!(
        suites = selected.len(),
        net_name = %config.docker.net_name,
        concurrency = cli.concurrency,
        timeout = ?cli.timeout(),
        "Starting run"
    );

    let ctx = Ctx::background().with_timeout(cli.timeout());
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling the run");
            interrupt.cancel();
        }
    });

    let mut report = RunReport::default();
    for suite in selected {
        let name = suite.name;
        let suite_report = suite.run(&ctx, &config, cli.concurrency).await?;
        tracing::info!(
            suite = %name,
            passed = suite_report.passed(),
            failed = suite_report.failed(),
            "Suite done"
        );
        report.extend(suite_report);
    }

    println!("{}", report::render(&report));
    println!("{}", report::summary(&report));

    if !report.success() {
        anyhow::bail!("{}", report::summary(&report));
    }

    Ok(())
}
