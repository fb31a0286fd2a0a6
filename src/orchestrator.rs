//! The sequential workflow around the engine's building blocks.
//!
//! ```text
//! plan ──► build ──► ┌ retry(test)   ┐
//!                    │ retry(review) │──► integrate ──► push / change request
//!                    └ document      ┘
//! ```
//!
//! Capabilities (agent backend, repository, issue tracker) are injected so
//! tests drive the full flow with doubles. A cooperative [`CancelFlag`] is
//! checked before each phase start; in-flight agent work is abandoned at the
//! next checkpoint boundary and persisted checkpoints stay valid.

use std::sync::Arc;

use tracing::{info, warn};

use devflow_agent::{AgentBackend, AgentGateway, TierMap, TranscriptWriter};
use devflow_config::{AggregationMode, Config};
use devflow_engine::{
    AggregationPolicy, CommitIntegrator, ParallelCoordinator, PhaseExecutor, PhaseSpec, RawArg,
    UnitKind,
};
use devflow_state::{StateStore, WorkflowRun};
use devflow_utils::cancel::CancelFlag;
use devflow_utils::error::{CollaboratorError, DevflowError};
use devflow_utils::types::{Phase, PhasePayload, PhaseResult, RunId};
use devflow_validation::{
    validate_branch_name, validate_commit_message, validate_numeric_id, validate_prompt,
    validate_target_branch, InputKind, ValidationContext,
};
use devflow_vcs::{IssueTracker, Repository};

use crate::summary::RunSummary;

/// Inputs for `devflow start`.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Issue identifier to drive the run from.
    pub issue: Option<String>,
    /// Free-form prompt describing the work.
    pub prompt: Option<String>,
    /// Explicit run id; generated when absent.
    pub run_id: Option<String>,
}

pub struct Orchestrator {
    config: Config,
    store: Arc<StateStore>,
    backend: Arc<dyn AgentBackend>,
    repository: Arc<dyn Repository>,
    tracker: Arc<dyn IssueTracker>,
    cancel: CancelFlag,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        config: Config,
        backend: Arc<dyn AgentBackend>,
        repository: Arc<dyn Repository>,
        tracker: Arc<dyn IssueTracker>,
    ) -> Self {
        let store = Arc::new(StateStore::new(config.workflow.state_dir.clone()));
        Self {
            config,
            store,
            backend,
            repository,
            tracker,
            cancel: CancelFlag::new(),
        }
    }

    /// The cancel signal checked before each phase start.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    #[must_use]
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Create a run and drive it to a terminal state.
    pub async fn start(&self, options: StartOptions) -> Result<RunSummary, DevflowError> {
        if options.issue.is_none() && options.prompt.is_none() {
            return Err(devflow_utils::error::ValidationError::new(
                "prompt",
                "either an issue id or a prompt is required",
                "",
            )
            .into());
        }

        let issue_ref = options
            .issue
            .as_deref()
            .map(validate_numeric_id)
            .transpose()?
            .map(|validated| validated.into_inner());

        let run_id = match options.run_id.as_deref() {
            Some(raw) => RunId::new(raw)?,
            None => RunId::generate(),
        };
        let run = self.store.create(run_id, issue_ref)?;
        info!(run_id = %run.run_id(), "starting workflow run");

        self.drive(run, options.prompt).await
    }

    /// Reload a run and continue past its successful checkpoints.
    pub async fn resume(&self, run_id: &str) -> Result<RunSummary, DevflowError> {
        let run_id = RunId::new(run_id)?;
        let run = self.store.load(&run_id)?;
        info!(run_id = %run_id, "resuming workflow run");
        self.drive(run, None).await
    }

    /// Summarize a run from its persisted record.
    pub fn status(&self, run_id: &str) -> Result<RunSummary, DevflowError> {
        let run_id = RunId::new(run_id)?;
        let run = self.store.load(&run_id)?;
        Ok(RunSummary::from_run(&run))
    }

    async fn drive(
        &self,
        mut run: WorkflowRun,
        prompt: Option<String>,
    ) -> Result<RunSummary, DevflowError> {
        let executor = self.executor_for(run.run_id());

        self.ensure_branch(&mut run).await?;

        // Plan
        if needs_phase(&run, Phase::Plan) {
            self.check_cancelled()?;
            let args = self.plan_args(&run, prompt.as_deref()).await?;
            let result = executor
                .run_checkpointed(&self.store, &mut run, Phase::Plan, &args)
                .await?;
            require_success(&result)?;
        }
        let plan_ref = plan_ref_of(&run);

        // Build
        if needs_phase(&run, Phase::Build) {
            self.check_cancelled()?;
            let mut args = vec![RawArg::prompt("apply the planned change")];
            if let Some(plan_ref) = &plan_ref {
                args.push(RawArg::prompt(format!("plan: {plan_ref}")));
            }
            let result = executor
                .run_checkpointed(&self.store, &mut run, Phase::Build, &args)
                .await?;
            require_success(&result)?;
            self.commit_build(run.run_id()).await?;
        }

        // Parallel verification and documentation
        let specs = self.batch_specs(&run, plan_ref.as_deref());
        let mut batch_failure: Option<PhaseResult> = None;
        if !specs.is_empty() {
            self.check_cancelled()?;
            let coordinator = ParallelCoordinator::new(
                Arc::clone(&executor),
                Arc::clone(&self.store),
                self.config.workflow.max_attempts,
            );
            let integrator = CommitIntegrator::new(Arc::clone(&self.repository))?;
            let policy = match self.config.workflow.aggregation {
                AggregationMode::AllOrNothing => AggregationPolicy::AllOrNothing,
                AggregationMode::BestEffort => AggregationPolicy::BestEffort,
            };
            let aggregated = coordinator
                .run_parallel(&mut run, specs, policy, &integrator)
                .await?;
            for conflict in &aggregated.conflicts {
                warn!(
                    resource = %conflict.resource,
                    winner = %conflict.winner,
                    loser = %conflict.loser,
                    "conflicting claim dropped from the losing phase"
                );
            }
            batch_failure = aggregated.failures.first().cloned();
        }

        self.publish(&run).await?;

        let summary = RunSummary::from_run(&run);
        self.report_to_issue(&run, &summary).await;

        if let Some(failure) = batch_failure {
            if failure.error_kind.as_deref() == Some("attempts_exhausted") {
                return Err(DevflowError::ResourceExhaustion {
                    phase: failure.phase,
                    attempts: self.config.workflow.max_attempts,
                });
            }
            return Err(DevflowError::PhaseFailed {
                phase: failure.phase,
                kind: failure
                    .error_kind
                    .unwrap_or_else(|| "blockers_remaining".to_string()),
            });
        }
        Ok(summary)
    }

    fn executor_for(&self, run_id: &RunId) -> Arc<PhaseExecutor> {
        let transcripts = TranscriptWriter::new(self.store.run_dir(run_id));
        let gateway = AgentGateway::new(
            Arc::clone(&self.backend),
            TierMap::new(self.config.tier_overrides()),
            self.config.agent_timeout(),
            transcripts,
        );
        Arc::new(PhaseExecutor::new(
            Arc::new(gateway),
            ValidationContext {
                allowed_path_roots: self.config.validation.allowed_path_roots.clone(),
                allowed_commands: self.config.validation.allowed_commands.clone(),
            },
        ))
    }

    async fn ensure_branch(&self, run: &mut WorkflowRun) -> Result<(), DevflowError> {
        let name = match &run.branch_ref {
            Some(existing) => existing.clone(),
            None => format!("devflow/{}", run.run_id().as_str().to_ascii_lowercase()),
        };
        let branch = validate_branch_name(&name)?;
        self.repository.create_or_switch_branch(&branch).await?;
        if run.branch_ref.is_none() {
            run.set_branch(branch.into_inner());
            self.store.persist(run)?;
        }
        Ok(())
    }

    async fn plan_args(
        &self,
        run: &WorkflowRun,
        prompt: Option<&str>,
    ) -> Result<Vec<RawArg>, DevflowError> {
        let mut args = Vec::new();
        if let Some(issue_ref) = &run.issue_ref {
            let id = validate_numeric_id(issue_ref)?;
            let issue = self.tracker.fetch_issue(&id).await?;
            args.push(RawArg::prompt(format!("{}\n\n{}", issue.title, issue.body)));
        }
        if let Some(prompt) = prompt {
            args.push(RawArg::new(InputKind::Prompt, prompt));
        }
        Ok(args)
    }

    async fn commit_build(&self, run_id: &RunId) -> Result<(), DevflowError> {
        let message = validate_commit_message(&format!(
            "feat: apply planned changes for {}",
            run_id.as_str().to_ascii_lowercase()
        ))?;
        match self.repository.stage_and_commit(&message).await {
            Ok(commit) => {
                info!(commit = %commit.hash, "committed build output");
                Ok(())
            }
            Err(CollaboratorError::NoChanges) => {
                warn!("build reported success but the working tree is clean");
                Ok(())
            }
            Err(e) => Err(DevflowError::Collaborator(e)),
        }
    }

    fn batch_specs(&self, run: &WorkflowRun, plan_ref: Option<&str>) -> Vec<PhaseSpec> {
        let timeout = self.config.unit_timeout();
        let mut specs = Vec::new();
        let context = plan_ref.map(|p| format!("plan: {p}"));

        for phase in [Phase::Test, Phase::Review] {
            if needs_phase(run, phase) {
                let mut args = vec![RawArg::prompt("verify the implemented change")];
                if let Some(context) = &context {
                    args.push(RawArg::prompt(context.clone()));
                }
                specs.push(PhaseSpec {
                    phase,
                    args,
                    timeout,
                    kind: UnitKind::RetryResolution,
                });
            }
        }
        if needs_phase(run, Phase::Document) {
            let mut args = vec![RawArg::prompt("document the implemented change")];
            if let Some(context) = &context {
                args.push(RawArg::prompt(context.clone()));
            }
            specs.push(PhaseSpec {
                phase: Phase::Document,
                args,
                timeout,
                kind: UnitKind::Direct,
            });
        }
        specs
    }

    async fn publish(&self, run: &WorkflowRun) -> Result<(), DevflowError> {
        let Some(branch_name) = &run.branch_ref else {
            return Ok(());
        };
        let branch = validate_branch_name(branch_name)?;
        self.repository.push(&branch).await?;

        if self
            .repository
            .find_open_change_request(&branch)
            .await?
            .is_none()
        {
            let target = validate_target_branch(&self.config.workflow.target_branch)?;
            let title = validate_commit_message(&format!(
                "devflow: automated change for {}",
                run.run_id()
            ))?;
            let body = validate_prompt(&RunSummary::from_run(run).to_string())?;
            let request = self
                .repository
                .open_change_request(&branch, &target, &title, &body)
                .await?;
            info!(url = %request.url, "opened change request");
        }
        Ok(())
    }

    /// Best-effort completion comment; reporting failures never fail the run.
    async fn report_to_issue(&self, run: &WorkflowRun, summary: &RunSummary) {
        let Some(issue_ref) = &run.issue_ref else {
            return;
        };
        let id = match validate_numeric_id(issue_ref) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "stored issue ref failed validation; skipping comment");
                return;
            }
        };
        let text = match validate_prompt(&summary.to_string()) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "run summary failed validation; skipping comment");
                return;
            }
        };
        if let Err(e) = self.tracker.post_comment(&id, &text).await {
            warn!(error = %e, "failed to post completion comment");
        }
    }

    fn check_cancelled(&self) -> Result<(), DevflowError> {
        if self.cancel.is_cancelled() {
            return Err(DevflowError::Cancelled);
        }
        Ok(())
    }
}

/// A phase needs to run unless it checkpointed a blocker-free success.
fn needs_phase(run: &WorkflowRun, phase: Phase) -> bool {
    match run.phase_result(phase) {
        None => true,
        Some(result) => !(result.is_success() && result.blockers().is_empty()),
    }
}

fn require_success(result: &PhaseResult) -> Result<(), DevflowError> {
    if result.is_success() {
        return Ok(());
    }
    Err(DevflowError::PhaseFailed {
        phase: result.phase,
        kind: result
            .error_kind
            .clone()
            .unwrap_or_else(|| "failure".to_string()),
    })
}

fn plan_ref_of(run: &WorkflowRun) -> Option<String> {
    match run.phase_result(Phase::Plan).map(|r| &r.payload) {
        Some(PhasePayload::Plan { plan_ref }) => Some(plan_ref.clone()),
        _ => None,
    }
}
