use std::process::ExitCode as ProcessExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use devflow::cli::{Cli, Command};
use devflow::{DevflowError, Orchestrator};
use devflow_agent::AgentCliBackend;
use devflow_vcs::{GhIssueTracker, GitRepository};

#[tokio::main]
async fn main() -> ProcessExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ProcessExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            if let Some(hint) = e.recovery_hint() {
                eprintln!("hint: {hint}");
            }
            ProcessExitCode::from(u8::try_from(e.to_exit_code().as_i32()).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> Result<(), DevflowError> {
    let config = cli.load_config()?;

    let backend = Arc::new(AgentCliBackend::discover(&config.agent.binary)?);
    let repository = Arc::new(GitRepository::new("."));
    let tracker = Arc::new(GhIssueTracker::new("."));
    let orchestrator = Orchestrator::new(config, backend, repository, tracker);

    // Ctrl-C requests cooperative cancellation; the run stops at the next
    // checkpoint boundary with its persisted state intact.
    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    match &cli.command {
        Command::Start { .. } => {
            let options = cli
                .command
                .start_options()
                .unwrap_or_default();
            let summary = orchestrator.start(options).await?;
            print!("{summary}");
        }
        Command::Resume { run_id } => {
            let summary = orchestrator.resume(run_id).await?;
            print!("{summary}");
        }
        Command::Status { run_id } => {
            let summary = orchestrator.status(run_id)?;
            print!("{summary}");
        }
    }
    Ok(())
}
