//! Scenario runner binary.
//!
//! Declares one scenario from the command line, runs its workload and fault timeline against
//! the configured pipeline, waits for the destinations to converge and prints the JSON report.
//! The exit status is non-zero unless the verdict is a pass.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use config::shared::{ScenarioContext, SourceConfigWithoutSecrets};
use harness::control::ssh::SshClusterControl;
use harness::scenario::ScenarioRunner;
use harness::source::PgRowSourceFactory;
use telemetry::init_tracing;
use tracing::info;

use crate::context::load_scenario_context;
use crate::error::{RunnerError, RunnerResult};
use crate::scenarios::{Overrides, ScenarioCommand, build_scenario};

mod context;
mod error;
mod scenarios;

#[derive(Debug, Parser)]
#[command(name = "runner", about = "Fault injection and convergence checks for a CDC pipeline")]
struct Cli {
    #[command(subcommand)]
    scenario: ScenarioCommand,

    #[command(flatten)]
    overrides: Overrides,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::from(err.exit_code())
        }
    }
}

fn run() -> RunnerResult<()> {
    let cli = Cli::parse();

    let context = load_scenario_context()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(RunnerError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli, context))
}

async fn async_main(cli: Cli, context: ScenarioContext) -> RunnerResult<()> {
    let scenario = build_scenario(&cli.scenario, &context, &cli.overrides)?;

    info!(
        scenario = scenario.name(),
        profile = %context.profile,
        source = ?SourceConfigWithoutSecrets::from(&context.source),
        topic = %context.destination.topic,
        expected_rows = scenario.expected_rows(),
        fault_class = ?scenario.fault_class(),
        "starting scenario"
    );

    let factory = PgRowSourceFactory::new(context.source.clone());
    let control = Arc::new(SshClusterControl::new(
        context.control.clone(),
        context.source.clone(),
    ));
    let outcome = ScenarioRunner::new(factory, control).run(scenario).await;

    let report = outcome.report().to_json_pretty()?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{report}")?;
    stdout.flush()?;

    if outcome.passed() {
        return Ok(());
    }

    Err(RunnerError::ScenarioFailed {
        name: outcome.name.clone(),
        verdict: outcome.verdict.as_str(),
    })
}
