//! Workflow engine: phase execution, parallel coordination, and bounded
//! retry-resolution loops.
//!
//! The engine turns raw phase arguments into checkpointed [`PhaseResult`]s:
//!
//! ```text
//! RawArg ── validate ──► PhaseRequest ── agent ──► payload ── parse ──► PhaseResult
//! ```
//!
//! [`PhaseExecutor`] drives one phase end to end. [`ParallelCoordinator`]
//! fans independent phases out over tokio tasks and funnels their results
//! through a single integration step. [`RetryResolutionLoop`] wraps a
//! verification phase with automatic blocker repair.
//!
//! [`PhaseResult`]: devflow_utils::types::PhaseResult

pub mod executor;
pub mod parallel;
pub mod payload;
pub mod prompts;
pub mod retry;

pub use executor::{PhaseExecutor, RawArg};
pub use parallel::{
    AggregatedResult, AggregationPolicy, CommitIntegrator, ConflictNote, Integrator,
    ParallelCoordinator, PhaseSpec, UnitKind,
};
pub use retry::{LoopOutcome, LoopReport, RetryResolutionLoop};
