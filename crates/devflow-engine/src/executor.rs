//! Single-phase execution.

use std::sync::Arc;

use tracing::{info, warn};

use devflow_agent::{AgentGateway, AgentStatus, PhaseRequest};
use devflow_state::{StateStore, WorkflowRun};
use devflow_utils::error::{AgentError, DevflowError};
use devflow_utils::types::{Phase, PhaseResult, RunId};
use devflow_validation::{validate, InputKind, ValidationContext};

use crate::payload::{parse_payload, SchemaError};
use crate::prompts::render_prompt;

/// A raw phase argument with its declared kind, not yet validated.
#[derive(Debug, Clone)]
pub struct RawArg {
    pub kind: InputKind,
    pub value: String,
}

impl RawArg {
    #[must_use]
    pub fn new(kind: InputKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn prompt(value: impl Into<String>) -> Self {
        Self::new(InputKind::Prompt, value)
    }
}

/// Drives one phase end to end: validate → invoke → parse → checkpoint.
///
/// The agent is called at most once per execution. Execution problems that
/// the workflow can carry forward (timeout, malformed output, schema
/// mismatch, self-reported failure) become recorded results; validation
/// rejections and capability outages propagate as typed errors because no
/// meaningful result exists to record.
pub struct PhaseExecutor {
    gateway: Arc<AgentGateway>,
    ctx: ValidationContext,
}

impl PhaseExecutor {
    #[must_use]
    pub fn new(gateway: Arc<AgentGateway>, ctx: ValidationContext) -> Self {
        Self { gateway, ctx }
    }

    /// Execute a phase and checkpoint the result exactly once.
    pub async fn run_checkpointed(
        &self,
        store: &StateStore,
        run: &mut WorkflowRun,
        phase: Phase,
        args: &[RawArg],
    ) -> Result<PhaseResult, DevflowError> {
        let result = self.run_detached(run.run_id().clone(), phase, args).await?;
        store.checkpoint(run, phase, result.clone())?;
        Ok(result)
    }

    /// Execute a phase without touching the state store.
    ///
    /// Used inside the parallel coordinator, which owns the post-join
    /// checkpointing; unit tasks must never write state themselves.
    pub async fn run_detached(
        &self,
        run_id: RunId,
        phase: Phase,
        args: &[RawArg],
    ) -> Result<PhaseResult, DevflowError> {
        // Fail fast on the first rejected argument: no agent call, no
        // checkpoint, nothing delegated.
        let validated = args
            .iter()
            .map(|arg| validate(arg.kind, &arg.value, &self.ctx))
            .collect::<Result<Vec<_>, _>>()?;

        let request = PhaseRequest::new(phase, run_id, validated);
        let prompt = render_prompt(&request);

        let response = match self.gateway.invoke(&request, prompt).await {
            Ok(response) => response,
            Err(e @ (AgentError::Timeout { .. } | AgentError::MalformedResponse { .. })) => {
                warn!(phase = %phase, kind = e.kind(), "agent invocation errored; recording result");
                return Ok(PhaseResult::error(phase, e.kind()));
            }
            // No agent means no result to record; the caller decides whether
            // to retry the whole phase later.
            Err(e) => return Err(DevflowError::Agent(e)),
        };

        let raw_ref = AgentGateway::raw_output_ref(&response);
        if response.status == AgentStatus::Failure {
            info!(phase = %phase, "agent reported failure");
            return Ok(PhaseResult::failure(phase).with_raw_output_ref(raw_ref));
        }

        match parse_payload(phase, &response.payload, &self.ctx.allowed_path_roots) {
            Ok(payload) => Ok(PhaseResult::success(phase, payload).with_raw_output_ref(raw_ref)),
            Err(e) => {
                warn!(phase = %phase, error = %e, "agent payload rejected");
                let kind = match e {
                    SchemaError::Mismatch { .. } => "schema_mismatch",
                    SchemaError::Path(_) => "invalid_path",
                };
                Ok(PhaseResult::error(phase, kind).with_raw_output_ref(raw_ref))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use devflow_agent::{ScriptedBackend, TierMap, TranscriptWriter};
    use devflow_utils::types::{PhasePayload, PhaseStatus};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn ctx() -> ValidationContext {
        ValidationContext {
            allowed_path_roots: vec!["src".into(), "docs".into(), "specs".into()],
            allowed_commands: vec!["git".into(), "gh".into()],
        }
    }

    fn setup(backend: Arc<ScriptedBackend>) -> (TempDir, StateStore, PhaseExecutor) {
        let dir = TempDir::new().unwrap();
        let state_dir = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let gateway = AgentGateway::new(
            backend,
            TierMap::default(),
            Duration::from_secs(5),
            TranscriptWriter::new(state_dir.join("RUN-AB12")),
        );
        let executor = PhaseExecutor::new(Arc::new(gateway), ctx());
        (dir, StateStore::new(state_dir), executor)
    }

    fn run_id() -> RunId {
        RunId::new("RUN-AB12").unwrap()
    }

    #[tokio::test]
    async fn successful_build_is_checkpointed_once() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_success(json!({"changed_files": ["src/auth.rs"]}));
        let (_dir, store, executor) = setup(backend);
        let mut run = store.create(run_id(), None).unwrap();

        let result = executor
            .run_checkpointed(&store, &mut run, Phase::Build, &[RawArg::prompt("build it")])
            .await
            .unwrap();

        assert!(result.is_success());
        assert!(result.raw_output_ref.is_some());
        let loaded = store.load(run.run_id()).unwrap();
        assert_eq!(loaded.phase_result(Phase::Build), Some(&result));
    }

    #[tokio::test]
    async fn rejected_argument_never_reaches_the_agent() {
        let backend = Arc::new(ScriptedBackend::new());
        let (_dir, store, executor) = setup(backend.clone());
        let mut run = store.create(run_id(), None).unwrap();

        let args = [RawArg::new(InputKind::BranchName, "feature;rm -rf /")];
        let err = executor
            .run_checkpointed(&store, &mut run, Phase::Build, &args)
            .await
            .unwrap_err();

        assert!(matches!(err, DevflowError::Validation(_)));
        assert_eq!(backend.invocation_count(), 0);
        assert!(store.load(run.run_id()).unwrap().phase_result(Phase::Build).is_none());
    }

    #[tokio::test]
    async fn timeout_is_recorded_not_raised() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.set_delay(Duration::from_secs(60));
        let dir = TempDir::new().unwrap();
        let state_dir = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let gateway = AgentGateway::new(
            backend,
            TierMap::default(),
            Duration::from_millis(20),
            TranscriptWriter::new(state_dir.join("RUN-AB12")),
        );
        let executor = PhaseExecutor::new(Arc::new(gateway), ctx());
        let store = StateStore::new(state_dir);
        let mut run = store.create(run_id(), None).unwrap();

        let result = executor
            .run_checkpointed(&store, &mut run, Phase::Review, &[RawArg::prompt("review")])
            .await
            .unwrap();

        assert_eq!(result.status, PhaseStatus::Error);
        assert_eq!(result.error_kind.as_deref(), Some("timeout"));
        assert!(store.load(run.run_id()).unwrap().has_checkpoint(Phase::Review));
    }

    #[tokio::test]
    async fn schema_mismatch_is_recorded_not_raised() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_success(json!({"files": ["wrong key"]}));
        let (_dir, store, executor) = setup(backend);
        let mut run = store.create(run_id(), None).unwrap();

        let result = executor
            .run_checkpointed(&store, &mut run, Phase::Build, &[RawArg::prompt("build")])
            .await
            .unwrap();

        assert_eq!(result.status, PhaseStatus::Error);
        assert_eq!(result.error_kind.as_deref(), Some("schema_mismatch"));
    }

    #[tokio::test]
    async fn capability_outage_propagates_as_error() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_error(devflow_utils::error::AgentError::CapabilityUnavailable {
            reason: "binary missing".to_string(),
        });
        let (_dir, store, executor) = setup(backend);
        let mut run = store.create(run_id(), None).unwrap();

        let err = executor
            .run_checkpointed(&store, &mut run, Phase::Plan, &[RawArg::prompt("plan")])
            .await
            .unwrap_err();
        assert!(matches!(err, DevflowError::Agent(_)));
    }

    #[tokio::test]
    async fn agent_reported_failure_is_a_failure_result() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_failure();
        let (_dir, store, executor) = setup(backend);
        let mut run = store.create(run_id(), None).unwrap();

        let result = executor
            .run_checkpointed(&store, &mut run, Phase::Build, &[RawArg::prompt("build")])
            .await
            .unwrap();

        assert_eq!(result.status, PhaseStatus::Failure);
        assert_eq!(result.payload, PhasePayload::Empty);
    }

    #[tokio::test]
    async fn detached_run_leaves_state_untouched() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_success(json!({"documents": ["docs/auth.md"]}));
        let (_dir, store, executor) = setup(backend);
        let run = store.create(run_id(), None).unwrap();

        let result = executor
            .run_detached(run.run_id().clone(), Phase::Document, &[RawArg::prompt("doc")])
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(store.load(run.run_id()).unwrap().checkpoints().count(), 0);
    }
}
