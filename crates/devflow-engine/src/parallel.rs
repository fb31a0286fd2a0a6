//! Fan-out of independent phases and the single integration step.
//!
//! Units run as detached tokio tasks: no unit touches the state store or the
//! working tree while in flight. After the join the coordinator resolves
//! resource conflicts between successful payloads, runs exactly one
//! integration step under an exclusive per-run file lock, and checkpoints
//! every unit's result through the single-writer store in pipeline order.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use devflow_state::{integration_lock_path, StateStore, WorkflowRun};
use devflow_utils::error::{CollaboratorError, DevflowError};
use devflow_utils::types::{Phase, PhasePayload, PhaseResult};
use devflow_validation::{validate_commit_message, Validated};
use devflow_vcs::Repository;

use crate::executor::{PhaseExecutor, RawArg};
use crate::retry::RetryResolutionLoop;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const LOCK_RETRY_LIMIT: u32 = 50;

/// How a parallel unit executes its phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// One detached executor run.
    Direct,
    /// A full retry-resolution loop; only a `Passed` outcome counts as unit
    /// success.
    RetryResolution,
}

/// One unit of parallel work.
#[derive(Debug, Clone)]
pub struct PhaseSpec {
    pub phase: Phase,
    pub args: Vec<RawArg>,
    pub timeout: Duration,
    pub kind: UnitKind,
}

/// Batch-level partial-failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationPolicy {
    /// Any failed unit fails the batch: the integrator is never invoked and
    /// zero integration-side mutations happen.
    AllOrNothing,
    /// Integrate over the successes; failures are reported alongside.
    BestEffort,
}

/// A resource claimed by two successful units.
///
/// The losing claim is dropped from the loser's payload but preserved here
/// for manual follow-up; it is never silently discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictNote {
    pub resource: String,
    pub winner: Phase,
    pub loser: Phase,
}

/// Outcome of one parallel batch.
#[derive(Debug, Clone)]
pub struct AggregatedResult {
    pub successes: Vec<PhaseResult>,
    pub failures: Vec<PhaseResult>,
    /// Whether the integration step ran.
    pub integrated: bool,
    pub conflicts: Vec<ConflictNote>,
}

impl AggregatedResult {
    /// True when every unit succeeded.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The single mutation step at the end of a batch.
#[async_trait]
pub trait Integrator: Send + Sync {
    async fn integrate(
        &self,
        successes: &[PhaseResult],
        conflicts: &[ConflictNote],
    ) -> Result<(), DevflowError>;
}

/// Integrator that stages and commits the batch through the repository.
pub struct CommitIntegrator {
    repository: Arc<dyn Repository>,
    message: Validated,
}

impl CommitIntegrator {
    pub fn new(repository: Arc<dyn Repository>) -> Result<Self, DevflowError> {
        let message =
            validate_commit_message("chore: integrate verification and documentation results")?;
        Ok(Self {
            repository,
            message,
        })
    }
}

#[async_trait]
impl Integrator for CommitIntegrator {
    async fn integrate(
        &self,
        successes: &[PhaseResult],
        conflicts: &[ConflictNote],
    ) -> Result<(), DevflowError> {
        info!(
            successes = successes.len(),
            conflicts = conflicts.len(),
            "integrating batch"
        );
        match self.repository.stage_and_commit(&self.message).await {
            Ok(commit) => {
                info!(commit = %commit.hash, "batch integrated");
                Ok(())
            }
            // A batch of read-only verification results can leave the tree
            // clean; that is a valid integration.
            Err(CollaboratorError::NoChanges) => {
                debug!("batch left a clean tree");
                Ok(())
            }
            Err(e) => Err(DevflowError::Collaborator(e)),
        }
    }
}

/// Runs phase units concurrently and funnels their results through one
/// integration step.
pub struct ParallelCoordinator {
    executor: Arc<PhaseExecutor>,
    store: Arc<StateStore>,
    max_attempts: u32,
}

impl ParallelCoordinator {
    #[must_use]
    pub fn new(executor: Arc<PhaseExecutor>, store: Arc<StateStore>, max_attempts: u32) -> Self {
        Self {
            executor,
            store,
            max_attempts,
        }
    }

    /// Run `specs` concurrently, integrate once, checkpoint everything.
    pub async fn run_parallel(
        &self,
        run: &mut WorkflowRun,
        specs: Vec<PhaseSpec>,
        policy: AggregationPolicy,
        integrator: &dyn Integrator,
    ) -> Result<AggregatedResult, DevflowError> {
        let mut set = JoinSet::new();
        let mut phases_by_task = HashMap::new();

        for spec in specs {
            let executor = Arc::clone(&self.executor);
            let run_id = run.run_id().clone();
            let max_attempts = self.max_attempts;
            let phase = spec.phase;

            let handle = set.spawn(async move {
                let work = async {
                    match spec.kind {
                        UnitKind::Direct => {
                            match executor.run_detached(run_id, spec.phase, &spec.args).await {
                                Ok(result) => {
                                    let ok = result.is_success();
                                    (result, ok)
                                }
                                Err(e) => (unit_error(spec.phase, &e), false),
                            }
                        }
                        UnitKind::RetryResolution => {
                            let retry = RetryResolutionLoop::new(executor, max_attempts);
                            match retry.run_detached(run_id, spec.phase, &spec.args).await {
                                Ok(report) => {
                                    let ok = report.outcome.is_passed();
                                    if !ok {
                                        warn!(
                                            phase = %spec.phase,
                                            outcome = ?report.outcome,
                                            attempts = report.attempts,
                                            hint = report.outcome.hint(),
                                            "verification unit did not pass"
                                        );
                                    }
                                    (report.final_result, ok)
                                }
                                Err(e) => (unit_error(spec.phase, &e), false),
                            }
                        }
                    }
                };
                match tokio::time::timeout(spec.timeout, work).await {
                    Ok(unit) => unit,
                    Err(_) => (PhaseResult::error(phase, "timeout"), false),
                }
            });
            phases_by_task.insert(handle.id(), phase);
        }

        // Blocking join: integration strictly happens-after every unit.
        let mut successes = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((_, (result, true))) => successes.push(result),
                Ok((_, (result, false))) => failures.push(result),
                Err(join_err) => {
                    let phase = phases_by_task
                        .get(&join_err.id())
                        .copied()
                        .unwrap_or(Phase::Plan);
                    warn!(phase = %phase, error = %join_err, "parallel unit panicked");
                    failures.push(PhaseResult::error(phase, "panic"));
                }
            }
        }
        successes.sort_by_key(|r| r.phase);
        failures.sort_by_key(|r| r.phase);

        let skip_integration =
            (policy == AggregationPolicy::AllOrNothing && !failures.is_empty())
                || successes.is_empty();
        let mut conflicts = Vec::new();
        if !skip_integration {
            conflicts = resolve_conflicts(&mut successes);
        }

        // Unit tasks never checkpoint; the coordinator records everything
        // after the join, in pipeline order, through the single writer.
        // Checkpoints land before the integration step, so a failed
        // integrator never loses completed unit results.
        let mut all: Vec<PhaseResult> = successes
            .iter()
            .chain(failures.iter())
            .cloned()
            .collect();
        all.sort_by_key(|r| r.phase);
        for result in all {
            let phase = result.phase;
            self.store.checkpoint(run, phase, result)?;
        }

        let mut integrated = false;
        if skip_integration {
            info!(
                failures = failures.len(),
                ?policy,
                "skipping integration; no mutations performed"
            );
        } else {
            let run_dir = self.store.run_dir(run.run_id());
            let lock_file = open_lock_file(&run_dir)?;
            let mut lock = fd_lock::RwLock::new(lock_file);
            let _guard = acquire_write_lock(&mut lock).await?;
            integrator.integrate(&successes, &conflicts).await?;
            integrated = true;
        }

        Ok(AggregatedResult {
            successes,
            failures,
            integrated,
            conflicts,
        })
    }
}

fn unit_error(phase: Phase, error: &DevflowError) -> PhaseResult {
    let kind = match error {
        DevflowError::Validation(_) => "validation",
        DevflowError::Agent(e) => e.kind(),
        DevflowError::Collaborator(_) => "collaborator",
        _ => "internal",
    };
    PhaseResult::error(phase, kind)
}

fn open_lock_file(run_dir: &camino::Utf8Path) -> Result<std::fs::File, DevflowError> {
    std::fs::create_dir_all(run_dir)?;
    let path = integration_lock_path(run_dir);
    std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path.as_std_path())
        .map_err(DevflowError::Io)
}

/// Take the exclusive integration lock, waiting briefly if another holder
/// is mid-integration.
///
/// A guard borrowed inside the retry loop cannot be returned across
/// iterations, so the loop only waits for availability and the lock is
/// taken once afterwards.
async fn acquire_write_lock(
    lock: &mut fd_lock::RwLock<std::fs::File>,
) -> Result<fd_lock::RwLockWriteGuard<'_, std::fs::File>, DevflowError> {
    let mut waited = 0u32;
    loop {
        // try_write keeps the async runtime unblocked; fd-lock's blocking
        // write() would stall the worker thread.
        match lock.try_write() {
            Ok(guard) => {
                drop(guard);
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                waited += 1;
                if waited >= LOCK_RETRY_LIMIT {
                    return Err(DevflowError::Io(io::Error::other(
                        "integration lock held by another process",
                    )));
                }
                tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
            }
            Err(e) => return Err(DevflowError::Io(e)),
        }
    }
    lock.try_write().map_err(DevflowError::Io)
}

/// First-by-pipeline-order conflict policy.
///
/// When two successful payloads claim the same resource (changed path,
/// document path, or finding id), the earlier phase in pipeline order keeps
/// it and the later phase's claim is dropped with a [`ConflictNote`]. The
/// whole policy lives here so it can be revisited in one place.
pub fn resolve_conflicts(successes: &mut [PhaseResult]) -> Vec<ConflictNote> {
    let mut path_claims: HashMap<String, Phase> = HashMap::new();
    let mut finding_claims: HashMap<String, Phase> = HashMap::new();
    let mut notes = Vec::new();

    // Callers keep successes sorted by phase, so earlier phases claim first.
    for result in successes.iter_mut() {
        let phase = result.phase;
        match &mut result.payload {
            PhasePayload::ChangedFiles { paths } | PhasePayload::Documents { paths } => {
                paths.retain(|path| match path_claims.get(path) {
                    Some(&winner) => {
                        notes.push(ConflictNote {
                            resource: path.clone(),
                            winner,
                            loser: phase,
                        });
                        false
                    }
                    None => {
                        path_claims.insert(path.clone(), phase);
                        true
                    }
                });
            }
            PhasePayload::Findings { findings } => {
                findings.retain(|finding| match finding_claims.get(&finding.id) {
                    Some(&winner) => {
                        notes.push(ConflictNote {
                            resource: finding.id.clone(),
                            winner,
                            loser: phase,
                        });
                        false
                    }
                    None => {
                        finding_claims.insert(finding.id.clone(), phase);
                        true
                    }
                });
            }
            _ => {}
        }
    }
    notes
}
