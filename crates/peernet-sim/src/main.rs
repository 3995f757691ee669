//! Simulator entry point
//!
//! One positional argument: the scenario file. Exit code 0 when every
//! command succeeded, 1 on any failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use peernet_sim::{parse_scenario, Orchestrator, SimContext};

#[derive(Parser)]
#[command(name = "peernet-sim")]
#[command(about = "Deterministic network simulator for profile and proximity servers")]
struct Cli {
    /// Scenario file to execute
    scenario: PathBuf,

    /// Seed for the simulation RNG; random when omitted
    #[arg(long)]
    seed: Option<u64>,

    /// Parse and validate the scenario without executing it
    #[arg(long)]
    check: bool,

    /// Working directory holding bin/, images/, instances/ and snapshots/
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// Enable verbose logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "simulation failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&cli.scenario)
        .map_err(|e| anyhow::anyhow!("cannot read scenario {}: {e}", cli.scenario.display()))?;
    let commands = parse_scenario(&text)?;
    info!(
        scenario = %cli.scenario.display(),
        commands = commands.len(),
        "scenario parsed"
    );
    if cli.check {
        info!("check mode: scenario is valid");
        return Ok(());
    }

    let ctx = SimContext::new(cli.base_dir, cli.seed);
    info!(seed = ctx.seed, "simulation RNG seeded");

    let mut orchestrator = Orchestrator::new(ctx);
    let outcome = orchestrator.run(&commands).await;
    orchestrator.shutdown().await;

    let summary = outcome?;
    info!(
        commands = summary.commands,
        queries_executed = summary.queries_executed,
        queries_skipped = summary.queries_skipped,
        log_errors = summary.log_errors,
        log_warnings = summary.log_warnings,
        "scenario finished"
    );
    Ok(())
}
