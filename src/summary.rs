//! Human-readable run summaries for the CLI.

use std::fmt;

use devflow_state::WorkflowRun;
use devflow_utils::types::{PhaseStatus, RunId};

/// Per-phase line of a run summary.
#[derive(Debug, Clone)]
pub struct PhaseLine {
    pub phase: String,
    pub status: PhaseStatus,
    pub blockers: usize,
    pub findings: usize,
    pub error_kind: Option<String>,
}

/// Snapshot of a run for `devflow status` and end-of-run reporting.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: RunId,
    pub issue_ref: Option<String>,
    pub branch: Option<String>,
    pub phases: Vec<PhaseLine>,
}

impl RunSummary {
    #[must_use]
    pub fn from_run(run: &WorkflowRun) -> Self {
        let phases = run
            .checkpoints()
            .map(|(phase, result)| PhaseLine {
                phase: phase.to_string(),
                status: result.status,
                blockers: result.blockers().len(),
                findings: result.payload.findings().len(),
                error_kind: result.error_kind.clone(),
            })
            .collect();
        Self {
            run_id: run.run_id().clone(),
            issue_ref: run.issue_ref.clone(),
            branch: run.branch_ref.clone(),
            phases,
        }
    }

    /// True when every checkpointed phase succeeded without blockers.
    #[must_use]
    pub fn all_clear(&self) -> bool {
        self.phases
            .iter()
            .all(|line| line.status == PhaseStatus::Success && line.blockers == 0)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run:    {}", self.run_id)?;
        if let Some(issue) = &self.issue_ref {
            writeln!(f, "issue:  {issue}")?;
        }
        if let Some(branch) = &self.branch {
            writeln!(f, "branch: {branch}")?;
        }
        if self.phases.is_empty() {
            return writeln!(f, "no phases have run yet");
        }
        for line in &self.phases {
            let status = match line.status {
                PhaseStatus::Success => "success",
                PhaseStatus::Failure => "failure",
                PhaseStatus::Error => "error",
            };
            write!(f, "{:<10} {status}", line.phase)?;
            if line.findings > 0 {
                write!(f, "  findings: {} ({} blocker)", line.findings, line.blockers)?;
            }
            if let Some(kind) = &line.error_kind {
                write!(f, "  [{kind}]")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
