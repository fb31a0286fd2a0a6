//! Durable per-run workflow state.
//!
//! Each run owns a directory under the configured state root:
//!
//! ```text
//! <state_dir>/<run_id>/state.json
//! ```
//!
//! The record is written atomically on every checkpoint (tempfile → fsync →
//! rename), so a crash between phases leaves either the previous snapshot or
//! the new one, never a torn file. All writes serialize through a single
//! internal mutex; concurrent phase units hand their results to the one
//! writer instead of racing on the file.

use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use devflow_utils::atomic_write::write_file_atomic;
use devflow_utils::error::StateError;
use devflow_utils::types::{Phase, PhaseResult, RunId};

/// The complete durable record for one workflow run.
///
/// `run_id` is immutable after creation. Everything else mutates only through
/// [`StateStore::checkpoint`] and the explicit setters, which keeps the
/// persisted file the single source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    run_id: RunId,
    pub issue_ref: Option<String>,
    pub branch_ref: Option<String>,
    created_at: DateTime<Utc>,
    phase_checkpoints: BTreeMap<Phase, PhaseResult>,
}

impl WorkflowRun {
    fn new(run_id: RunId, issue_ref: Option<String>) -> Self {
        Self {
            run_id,
            issue_ref,
            branch_ref: None,
            created_at: Utc::now(),
            phase_checkpoints: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn set_branch(&mut self, branch: impl Into<String>) {
        self.branch_ref = Some(branch.into());
    }

    /// The recorded result for `phase`, if it has checkpointed.
    #[must_use]
    pub fn phase_result(&self, phase: Phase) -> Option<&PhaseResult> {
        self.phase_checkpoints.get(&phase)
    }

    /// All checkpoints in pipeline order.
    pub fn checkpoints(&self) -> impl Iterator<Item = (&Phase, &PhaseResult)> {
        self.phase_checkpoints.iter()
    }

    #[must_use]
    pub fn has_checkpoint(&self, phase: Phase) -> bool {
        self.phase_checkpoints.contains_key(&phase)
    }
}

/// Filesystem-backed store for [`WorkflowRun`] records.
#[derive(Debug)]
pub struct StateStore {
    state_dir: Utf8PathBuf,
    // Single-writer guard; checkpoint ordering is the lock acquisition order.
    write_lock: Mutex<()>,
}

impl StateStore {
    #[must_use]
    pub fn new(state_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Directory owned by one run (state record, transcripts, locks).
    #[must_use]
    pub fn run_dir(&self, run_id: &RunId) -> Utf8PathBuf {
        self.state_dir.join(run_id.as_str())
    }

    fn state_path(&self, run_id: &RunId) -> Utf8PathBuf {
        self.run_dir(run_id).join("state.json")
    }

    /// Create a fresh run record and persist it immediately.
    pub fn create(
        &self,
        run_id: RunId,
        issue_ref: Option<String>,
    ) -> Result<WorkflowRun, StateError> {
        let path = self.state_path(&run_id);
        if path.exists() {
            return Err(StateError::AlreadyExists {
                run_id: run_id.as_str().to_string(),
            });
        }
        let run = WorkflowRun::new(run_id, issue_ref);
        self.persist(&run)?;
        debug!(run_id = %run.run_id(), "created run record");
        Ok(run)
    }

    /// Load a run record from disk.
    ///
    /// An unparseable record is surfaced as [`StateError::Corrupted`] and is
    /// never auto-repaired.
    pub fn load(&self, run_id: &RunId) -> Result<WorkflowRun, StateError> {
        let path = self.state_path(run_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StateError::NotFound {
                    run_id: run_id.as_str().to_string(),
                });
            }
            Err(e) => return Err(StateError::Io(e)),
        };
        serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Record a phase result and atomically persist the whole record.
    ///
    /// Overwrites any existing checkpoint for the phase; checkpointing an
    /// identical `(phase, result)` pair is a no-op apart from the rewrite.
    pub fn checkpoint(
        &self,
        run: &mut WorkflowRun,
        phase: Phase,
        result: PhaseResult,
    ) -> Result<(), StateError> {
        run.phase_checkpoints.insert(phase, result);
        self.persist(run)?;
        debug!(run_id = %run.run_id(), phase = %phase, "checkpointed phase result");
        Ok(())
    }

    /// Persist the current record (branch updates, issue refs).
    pub fn persist(&self, run: &WorkflowRun) -> Result<(), StateError> {
        let encoded =
            serde_json::to_string_pretty(run).map_err(|e| StateError::Encode {
                reason: e.to_string(),
            })?;
        let path = self.state_path(run.run_id());
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        write_file_atomic(&path, &encoded).map_err(|e| StateError::Io(std::io::Error::other(e)))
    }

    /// Whether a record exists for `run_id` without loading it.
    #[must_use]
    pub fn exists(&self, run_id: &RunId) -> bool {
        self.state_path(run_id).exists()
    }
}

/// Encode a run record for handoff between sequential processes.
///
/// The transferable form is plain JSON bytes; it never touches the store.
pub fn to_transferable(run: &WorkflowRun) -> Result<Vec<u8>, StateError> {
    serde_json::to_vec(run).map_err(|e| StateError::Encode {
        reason: e.to_string(),
    })
}

/// Decode a transferable record produced by [`to_transferable`].
pub fn from_transferable(bytes: &[u8]) -> Result<WorkflowRun, StateError> {
    serde_json::from_slice(bytes).map_err(|e| StateError::Corrupted {
        path: "<transferable>".to_string(),
        reason: e.to_string(),
    })
}

/// Path of the per-run integration lock file.
#[must_use]
pub fn integration_lock_path(run_dir: &Utf8Path) -> Utf8PathBuf {
    run_dir.join("integration.lock")
}
