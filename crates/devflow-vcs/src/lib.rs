//! Version-control and issue-tracker collaborators.
//!
//! Both collaborators are trait contracts taking [`Validated`] values for
//! anything that ends up on a command line. The CLI implementations shell
//! out to `git` and `gh` with argument vectors only; no string ever passes
//! through a shell.

mod git;
mod tracker;
mod types;

#[cfg(any(test, feature = "test-support"))]
mod recording;

use async_trait::async_trait;

use devflow_utils::error::CollaboratorError;
use devflow_validation::Validated;

pub use git::GitRepository;
#[cfg(any(test, feature = "test-support"))]
pub use recording::{RecordingRepository, RecordingTracker};
pub use tracker::GhIssueTracker;
pub use types::{ChangeRequestRef, CommitRef, Issue, BOT_MARKER};

/// Version-control operations the workflow needs.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Switch to `branch`, creating it from the current HEAD if absent.
    async fn create_or_switch_branch(&self, branch: &Validated)
        -> Result<(), CollaboratorError>;

    /// Stage everything and commit with `message`.
    ///
    /// An empty diff maps to [`CollaboratorError::NoChanges`] so callers can
    /// treat a clean tree as a non-event instead of a failure.
    async fn stage_and_commit(&self, message: &Validated)
        -> Result<CommitRef, CollaboratorError>;

    async fn push(&self, branch: &Validated) -> Result<(), CollaboratorError>;

    /// An open change request with `branch` as its source, if one exists.
    async fn find_open_change_request(
        &self,
        branch: &Validated,
    ) -> Result<Option<ChangeRequestRef>, CollaboratorError>;

    async fn open_change_request(
        &self,
        branch: &Validated,
        target: &Validated,
        title: &Validated,
        body: &Validated,
    ) -> Result<ChangeRequestRef, CollaboratorError>;
}

/// Issue-tracker operations the workflow needs.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn fetch_issue(&self, id: &Validated) -> Result<Issue, CollaboratorError>;

    /// Post a comment. The [`BOT_MARKER`] prefix is added here so webhook
    /// consumers can filter out self-authored events.
    async fn post_comment(&self, id: &Validated, text: &Validated)
        -> Result<(), CollaboratorError>;

    async fn add_label(&self, id: &Validated, label: &Validated)
        -> Result<(), CollaboratorError>;
}
