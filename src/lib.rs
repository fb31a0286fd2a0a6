//! devflow — multi-phase software-change workflow orchestration.
//!
//! The workflow runs `plan → build → {test, review, document} → integrate`
//! against an external coding agent, with durable per-run state, a validated
//! input boundary, bounded retry-resolution for verification phases, and a
//! single atomic integration step for the parallel batch.
//!
//! The library surface is the [`Orchestrator`]; the `devflow` binary is a
//! thin clap layer over it.

pub mod cli;
pub mod orchestrator;
mod summary;

pub use devflow_config::Config;
pub use devflow_utils::error::{DevflowError, ExitCode};
pub use orchestrator::{Orchestrator, StartOptions};
pub use summary::RunSummary;
