//! Bounded retry-with-resolution for verification phases.
//!
//! State machine:
//!
//! ```text
//!           ┌──────────────────────────────┐
//!           ▼                              │ repaired ≥ 1
//! Running ──blockers──► ResolvingFailure ──┘
//!   │  │                     │
//!   │  │ attempts == max     │ repaired == 0
//!   │  ▼                     ▼
//!   │ AttemptsExhausted    NoProgress
//!   ▼
//! Passed (zero blockers)
//! ```
//!
//! Only blocker findings gate; tech-debt and skippable findings are recorded
//! and carried forward. The two terminal failures are distinct on purpose:
//! exhausted attempts may succeed on a later rerun, a round that repaired
//! nothing will not.

use tracing::{debug, info, warn};

use std::sync::Arc;

use devflow_state::{StateStore, WorkflowRun};
use devflow_utils::error::{CollaboratorError, DevflowError};
use devflow_utils::types::{Finding, Phase, PhasePayload, PhaseResult, RunId};
use devflow_validation::validate_commit_message;
use devflow_vcs::Repository;

use crate::executor::{PhaseExecutor, RawArg};

/// Terminal state of a resolution loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Verification reported zero blockers.
    Passed,
    /// Blockers remained after the configured number of resolution rounds.
    AttemptsExhausted,
    /// A resolution round repaired nothing; more rounds would not help.
    NoProgress,
    /// Verification itself did not produce findings (timeout, malformed
    /// output, self-reported failure).
    Errored,
}

impl LoopOutcome {
    #[must_use]
    pub const fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Operator-facing hint attached to the run summary.
    #[must_use]
    pub const fn hint(&self) -> &'static str {
        match self {
            Self::Passed => "verification passed",
            Self::AttemptsExhausted => "resolution attempts exhausted; retry later",
            Self::NoProgress => "automatic resolution made no progress; escalate to a human",
            Self::Errored => "verification produced no findings; inspect the transcript",
        }
    }
}

/// What a resolution loop did, including every resolve sub-result.
#[derive(Debug, Clone)]
pub struct LoopReport {
    pub outcome: LoopOutcome,
    /// Number of resolution rounds performed.
    pub attempts: u32,
    /// The last verification result; this is what gets checkpointed for the
    /// verification phase.
    pub final_result: PhaseResult,
    pub resolutions: Vec<PhaseResult>,
}

/// Runs a verification phase to a terminal state, repairing blockers with
/// `Resolve` sub-phases in between.
pub struct RetryResolutionLoop {
    executor: Arc<PhaseExecutor>,
    max_attempts: u32,
}

impl RetryResolutionLoop {
    #[must_use]
    pub fn new(executor: Arc<PhaseExecutor>, max_attempts: u32) -> Self {
        Self {
            executor,
            max_attempts,
        }
    }

    /// Run the loop without touching state or the repository.
    ///
    /// Used inside the parallel coordinator: checkpoints and commits are
    /// deferred to the batch integration step.
    pub async fn run_detached(
        &self,
        run_id: RunId,
        phase: Phase,
        args: &[RawArg],
    ) -> Result<LoopReport, DevflowError> {
        self.run_inner(run_id, phase, args, None).await
    }

    /// Run the loop standalone: each successful resolution round is
    /// committed through the repository, and the final verification result
    /// is checkpointed.
    pub async fn run_checkpointed(
        &self,
        store: &StateStore,
        run: &mut WorkflowRun,
        phase: Phase,
        args: &[RawArg],
        repository: &dyn Repository,
    ) -> Result<LoopReport, DevflowError> {
        let report = self
            .run_inner(run.run_id().clone(), phase, args, Some(repository))
            .await?;
        store.checkpoint(run, phase, report.final_result.clone())?;
        Ok(report)
    }

    async fn run_inner(
        &self,
        run_id: RunId,
        phase: Phase,
        args: &[RawArg],
        repository: Option<&dyn Repository>,
    ) -> Result<LoopReport, DevflowError> {
        debug_assert!(phase.is_verification());

        let mut attempts = 0u32;
        let mut resolutions = Vec::new();

        loop {
            let result = self
                .executor
                .run_detached(run_id.clone(), phase, args)
                .await?;

            if !result.is_success() {
                warn!(phase = %phase, kind = ?result.error_kind, "verification did not complete");
                return Ok(LoopReport {
                    outcome: LoopOutcome::Errored,
                    attempts,
                    final_result: result,
                    resolutions,
                });
            }

            let blockers: Vec<Finding> =
                result.blockers().into_iter().cloned().collect();
            if blockers.is_empty() {
                info!(phase = %phase, attempts, "verification passed");
                return Ok(LoopReport {
                    outcome: LoopOutcome::Passed,
                    attempts,
                    final_result: result,
                    resolutions,
                });
            }

            if attempts >= self.max_attempts {
                warn!(phase = %phase, attempts, blockers = blockers.len(), "resolution attempts exhausted");
                return Ok(LoopReport {
                    outcome: LoopOutcome::AttemptsExhausted,
                    attempts,
                    final_result: result.with_error_kind("attempts_exhausted"),
                    resolutions,
                });
            }

            attempts += 1;
            debug!(phase = %phase, attempt = attempts, blockers = blockers.len(), "entering resolution round");

            let mut repaired = 0usize;
            for blocker in &blockers {
                let resolve_result = self
                    .executor
                    .run_detached(run_id.clone(), Phase::Resolve, &[describe(blocker)])
                    .await?;
                if repaired_by(&resolve_result, &blocker.id) {
                    repaired += 1;
                }
                resolutions.push(resolve_result);
            }

            if repaired == 0 {
                warn!(phase = %phase, attempt = attempts, "resolution round repaired nothing");
                return Ok(LoopReport {
                    outcome: LoopOutcome::NoProgress,
                    attempts,
                    final_result: result.with_error_kind("no_progress"),
                    resolutions,
                });
            }

            if let Some(repository) = repository {
                self.commit_repairs(repository, phase, attempts).await?;
            }
        }
    }

    async fn commit_repairs(
        &self,
        repository: &dyn Repository,
        phase: Phase,
        attempt: u32,
    ) -> Result<(), DevflowError> {
        let message = validate_commit_message(&format!(
            "fix: resolve {phase} blockers, attempt {attempt}"
        ))?;
        match repository.stage_and_commit(&message).await {
            Ok(commit) => {
                info!(phase = %phase, commit = %commit.hash, "committed resolution round");
                Ok(())
            }
            // The repair may have touched nothing on disk (e.g. config-only
            // fix already applied); a clean tree is not a failure here.
            Err(CollaboratorError::NoChanges) => {
                debug!(phase = %phase, "resolution round left a clean tree");
                Ok(())
            }
            Err(e) => Err(DevflowError::Collaborator(e)),
        }
    }
}

fn describe(finding: &Finding) -> RawArg {
    let mut text = format!("{}: {}", finding.id, finding.description);
    if let Some(location) = &finding.location {
        text.push_str(&format!("\nlocation: {location}"));
    }
    RawArg::prompt(text)
}

fn repaired_by(result: &PhaseResult, finding_id: &str) -> bool {
    if !result.is_success() {
        return false;
    }
    match &result.payload {
        PhasePayload::Resolutions { resolved, .. } => {
            resolved.iter().any(|id| id == finding_id)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use devflow_agent::{AgentGateway, ScriptedBackend, TierMap, TranscriptWriter};
    use devflow_validation::ValidationContext;
    use devflow_vcs::RecordingRepository;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(backend: Arc<ScriptedBackend>, max_attempts: u32) -> (TempDir, StateStore, RetryResolutionLoop) {
        let dir = TempDir::new().unwrap();
        let state_dir = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let gateway = AgentGateway::new(
            backend,
            TierMap::default(),
            Duration::from_secs(5),
            TranscriptWriter::new(state_dir.join("RUN-AB12")),
        );
        let executor = PhaseExecutor::new(
            Arc::new(gateway),
            ValidationContext {
                allowed_path_roots: vec!["src".into()],
                allowed_commands: vec!["git".into()],
            },
        );
        let store = StateStore::new(state_dir);
        (dir, store, RetryResolutionLoop::new(Arc::new(executor), max_attempts))
    }

    fn run_id() -> RunId {
        RunId::new("RUN-AB12").unwrap()
    }

    fn findings(entries: serde_json::Value) -> serde_json::Value {
        json!({"findings": entries})
    }

    fn blocker(id: &str) -> serde_json::Value {
        json!({"id": id, "severity": "blocker", "description": format!("{id} fails")})
    }

    #[tokio::test]
    async fn passes_with_zero_blockers() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_success(findings(json!([
            {"id": "T1", "severity": "tech_debt", "description": "slow test"}
        ])));
        let (_dir, _store, retry) = setup(backend, 3);

        let report = retry
            .run_detached(run_id(), Phase::Test, &[RawArg::prompt("run tests")])
            .await
            .unwrap();

        assert_eq!(report.outcome, LoopOutcome::Passed);
        assert_eq!(report.attempts, 0);
        assert!(report.final_result.error_kind.is_none());
        // The tech-debt finding is recorded, not gating.
        assert_eq!(report.final_result.payload.findings().len(), 1);
    }

    #[tokio::test]
    async fn no_progress_after_one_failed_round() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_success(findings(json!([blocker("T1")])));
        // Resolve answers but repairs nothing.
        backend.push_success(json!({"resolved": [], "unresolved": ["T1"]}));
        let (_dir, _store, retry) = setup(backend.clone(), 3);

        let report = retry
            .run_detached(run_id(), Phase::Test, &[RawArg::prompt("run tests")])
            .await
            .unwrap();

        assert_eq!(report.outcome, LoopOutcome::NoProgress);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.final_result.error_kind.as_deref(), Some("no_progress"));
        // One verification plus one resolve, no re-verification.
        assert_eq!(backend.invocation_count(), 2);
    }

    #[tokio::test]
    async fn partial_repair_increments_attempt_and_reruns() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_success(findings(json!([blocker("T1"), blocker("T2")])));
        backend.push_success(json!({"resolved": ["T1"]}));
        backend.push_success(json!({"resolved": [], "unresolved": ["T2"]}));
        // Re-verification still sees T2.
        backend.push_success(findings(json!([blocker("T2")])));
        let (_dir, _store, retry) = setup(backend.clone(), 1);

        let report = retry
            .run_detached(run_id(), Phase::Test, &[RawArg::prompt("run tests")])
            .await
            .unwrap();

        assert_eq!(report.outcome, LoopOutcome::AttemptsExhausted);
        assert_eq!(report.attempts, 1);
        assert_eq!(
            report.final_result.error_kind.as_deref(),
            Some("attempts_exhausted")
        );
        assert_eq!(report.resolutions.len(), 2);
        // verification, resolve x2, re-verification
        assert_eq!(backend.invocation_count(), 4);
    }

    #[tokio::test]
    async fn repaired_blocker_leads_to_pass() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_success(findings(json!([blocker("T1")])));
        backend.push_success(json!({"resolved": ["T1"]}));
        backend.push_success(findings(json!([])));
        let (_dir, _store, retry) = setup(backend, 3);

        let report = retry
            .run_detached(run_id(), Phase::Test, &[RawArg::prompt("run tests")])
            .await
            .unwrap();

        assert_eq!(report.outcome, LoopOutcome::Passed);
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test]
    async fn errored_verification_is_terminal() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_error(devflow_utils::error::AgentError::MalformedResponse {
            reason: "not json".to_string(),
        });
        let (_dir, _store, retry) = setup(backend, 3);

        let report = retry
            .run_detached(run_id(), Phase::Review, &[RawArg::prompt("review")])
            .await
            .unwrap();

        assert_eq!(report.outcome, LoopOutcome::Errored);
        assert_eq!(report.final_result.error_kind.as_deref(), Some("malformed_response"));
    }

    #[tokio::test]
    async fn standalone_mode_commits_each_round_and_checkpoints() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_success(findings(json!([blocker("T1")])));
        backend.push_success(json!({"resolved": ["T1"]}));
        backend.push_success(findings(json!([])));
        let (_dir, store, retry) = setup(backend, 3);
        let mut run = store.create(run_id(), None).unwrap();
        let repository = RecordingRepository::new();

        let report = retry
            .run_checkpointed(
                &store,
                &mut run,
                Phase::Test,
                &[RawArg::prompt("run tests")],
                &repository,
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, LoopOutcome::Passed);
        let commits: Vec<_> = repository
            .calls()
            .into_iter()
            .filter(|(op, _)| op == "stage_and_commit")
            .collect();
        assert_eq!(commits.len(), 1);
        assert!(store.load(run.run_id()).unwrap().has_checkpoint(Phase::Test));
    }

    #[tokio::test]
    async fn clean_tree_after_repair_is_tolerated() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_success(findings(json!([blocker("T1")])));
        backend.push_success(json!({"resolved": ["T1"]}));
        backend.push_success(findings(json!([])));
        let (_dir, store, retry) = setup(backend, 3);
        let mut run = store.create(run_id(), None).unwrap();
        let repository = RecordingRepository::new();
        repository.set_clean_tree(true);

        let report = retry
            .run_checkpointed(
                &store,
                &mut run,
                Phase::Test,
                &[RawArg::prompt("run tests")],
                &repository,
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, LoopOutcome::Passed);
    }
}
