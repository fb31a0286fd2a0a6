//! Recording collaborator doubles for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use devflow_utils::error::CollaboratorError;
use devflow_validation::Validated;

use crate::types::{ChangeRequestRef, CommitRef, Issue};
use crate::{IssueTracker, Repository};

/// A recorded collaborator call: operation name plus its main argument.
pub type RecordedCall = (String, String);

/// In-memory [`Repository`] that records every call.
///
/// Individual operations can be scripted to fail; `stage_and_commit` can be
/// made to report a clean tree.
#[derive(Debug, Default)]
pub struct RecordingRepository {
    calls: Mutex<Vec<RecordedCall>>,
    failing_ops: Mutex<HashSet<&'static str>>,
    clean_tree: AtomicBool,
    commit_counter: AtomicU64,
}

impl RecordingRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `operation` fail from now on.
    pub fn fail_on(&self, operation: &'static str) {
        self.failing_ops.lock().unwrap().insert(operation);
    }

    /// Make `stage_and_commit` report an empty diff.
    pub fn set_clean_tree(&self, clean: bool) {
        self.clean_tree.store(clean, Ordering::SeqCst);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of mutating operations observed (everything except lookups).
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|(op, _)| op != "find_open_change_request")
            .count()
    }

    fn record(&self, operation: &'static str, arg: &str) -> Result<(), CollaboratorError> {
        self.calls
            .lock()
            .unwrap()
            .push((operation.to_string(), arg.to_string()));
        if self.failing_ops.lock().unwrap().contains(operation) {
            return Err(CollaboratorError::operation(operation, "scripted failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for RecordingRepository {
    async fn create_or_switch_branch(
        &self,
        branch: &Validated,
    ) -> Result<(), CollaboratorError> {
        self.record("create_or_switch_branch", branch.as_str())
    }

    async fn stage_and_commit(
        &self,
        message: &Validated,
    ) -> Result<CommitRef, CollaboratorError> {
        self.record("stage_and_commit", message.as_str())?;
        if self.clean_tree.load(Ordering::SeqCst) {
            return Err(CollaboratorError::NoChanges);
        }
        let n = self.commit_counter.fetch_add(1, Ordering::SeqCst);
        Ok(CommitRef {
            hash: format!("{n:040x}"),
        })
    }

    async fn push(&self, branch: &Validated) -> Result<(), CollaboratorError> {
        self.record("push", branch.as_str())
    }

    async fn find_open_change_request(
        &self,
        branch: &Validated,
    ) -> Result<Option<ChangeRequestRef>, CollaboratorError> {
        self.record("find_open_change_request", branch.as_str())?;
        Ok(None)
    }

    async fn open_change_request(
        &self,
        branch: &Validated,
        _target: &Validated,
        _title: &Validated,
        _body: &Validated,
    ) -> Result<ChangeRequestRef, CollaboratorError> {
        self.record("open_change_request", branch.as_str())?;
        Ok(ChangeRequestRef {
            number: 1,
            url: "https://example.invalid/pr/1".to_string(),
        })
    }
}

/// In-memory [`IssueTracker`] that records every call.
#[derive(Debug, Default)]
pub struct RecordingTracker {
    calls: Mutex<Vec<RecordedCall>>,
    issue: Mutex<Option<Issue>>,
}

impl RecordingTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_issue(&self, issue: Issue) {
        *self.issue.lock().unwrap() = Some(issue);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, operation: &'static str, arg: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((operation.to_string(), arg.to_string()));
    }
}

#[async_trait]
impl IssueTracker for RecordingTracker {
    async fn fetch_issue(&self, id: &Validated) -> Result<Issue, CollaboratorError> {
        self.record("fetch_issue", id.as_str());
        self.issue
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CollaboratorError::operation("fetch_issue", "no issue scripted"))
    }

    async fn post_comment(
        &self,
        id: &Validated,
        text: &Validated,
    ) -> Result<(), CollaboratorError> {
        self.record("post_comment", &format!("{}: {text}", id.as_str()));
        Ok(())
    }

    async fn add_label(&self, id: &Validated, label: &Validated) -> Result<(), CollaboratorError> {
        self.record("add_label", &format!("{}: {label}", id.as_str()));
        Ok(())
    }
}
