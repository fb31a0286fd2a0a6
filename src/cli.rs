//! Command-line interface for devflow.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use devflow_config::Config;
use devflow_utils::error::DevflowError;

use crate::orchestrator::StartOptions;

#[derive(Debug, Parser)]
#[command(name = "devflow", version, about = "Automated multi-phase change workflow")]
pub struct Cli {
    /// Path to a config file (default: .devflow/config.toml if present).
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a new workflow run.
    Start {
        /// Issue id to drive the run from.
        #[arg(long)]
        issue: Option<String>,
        /// Free-form prompt describing the work.
        #[arg(long)]
        prompt: Option<String>,
        /// Explicit run id (generated when omitted).
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Continue a run past its successful checkpoints.
    Resume {
        run_id: String,
    },
    /// Show the persisted state of a run.
    Status {
        run_id: String,
    },
}

impl Cli {
    pub fn load_config(&self) -> Result<Config, DevflowError> {
        match &self.config {
            Some(path) => Ok(Config::load(path)?),
            None => Ok(Config::discover()?),
        }
    }
}

impl Command {
    #[must_use]
    pub fn start_options(&self) -> Option<StartOptions> {
        match self {
            Self::Start {
                issue,
                prompt,
                run_id,
            } => Some(StartOptions {
                issue: issue.clone(),
                prompt: prompt.clone(),
                run_id: run_id.clone(),
            }),
            _ => None,
        }
    }
}
