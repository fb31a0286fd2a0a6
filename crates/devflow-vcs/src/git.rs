//! `git` / `gh` CLI implementation of [`Repository`].

use async_trait::async_trait;
use camino::Utf8PathBuf;
use tokio::process::Command;
use tracing::debug;

use devflow_utils::error::CollaboratorError;
use devflow_validation::Validated;

use crate::types::{ChangeRequestRef, CommitRef};
use crate::Repository;

/// Repository backed by the `git` CLI, with change requests via `gh`.
///
/// Every invocation uses an argument vector; validated values land as single
/// argv entries.
#[derive(Debug, Clone)]
pub struct GitRepository {
    workdir: Utf8PathBuf,
}

impl GitRepository {
    #[must_use]
    pub fn new(workdir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    async fn run(
        &self,
        operation: &'static str,
        program: &str,
        args: &[&str],
    ) -> Result<std::process::Output, CollaboratorError> {
        debug!(operation, program, ?args, "running collaborator command");
        Command::new(program)
            .args(args)
            .current_dir(self.workdir.as_std_path())
            .output()
            .await
            .map_err(|e| CollaboratorError::operation(operation, e.to_string()))
    }

    async fn run_checked(
        &self,
        operation: &'static str,
        program: &str,
        args: &[&str],
    ) -> Result<String, CollaboratorError> {
        let output = self.run(operation, program, args).await?;
        if !output.status.success() {
            return Err(CollaboratorError::operation(
                operation,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Repository for GitRepository {
    async fn create_or_switch_branch(
        &self,
        branch: &Validated,
    ) -> Result<(), CollaboratorError> {
        const OP: &str = "create_or_switch_branch";
        let existing = self
            .run(OP, "git", &["rev-parse", "--verify", "--quiet", branch.as_str()])
            .await?;
        if existing.status.success() {
            self.run_checked(OP, "git", &["switch", branch.as_str()]).await?;
        } else {
            self.run_checked(OP, "git", &["switch", "-c", branch.as_str()])
                .await?;
        }
        Ok(())
    }

    async fn stage_and_commit(
        &self,
        message: &Validated,
    ) -> Result<CommitRef, CollaboratorError> {
        const OP: &str = "stage_and_commit";
        self.run_checked(OP, "git", &["add", "-A"]).await?;

        let output = self
            .run(OP, "git", &["commit", "-m", message.as_str()])
            .await?;
        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stdout.contains("nothing to commit") || stderr.contains("nothing to commit") {
                return Err(CollaboratorError::NoChanges);
            }
            return Err(CollaboratorError::operation(OP, stderr.trim().to_string()));
        }

        let hash = self
            .run_checked(OP, "git", &["rev-parse", "HEAD"])
            .await?
            .trim()
            .to_string();
        Ok(CommitRef { hash })
    }

    async fn push(&self, branch: &Validated) -> Result<(), CollaboratorError> {
        self.run_checked("push", "git", &["push", "-u", "origin", branch.as_str()])
            .await?;
        Ok(())
    }

    async fn find_open_change_request(
        &self,
        branch: &Validated,
    ) -> Result<Option<ChangeRequestRef>, CollaboratorError> {
        const OP: &str = "find_open_change_request";
        let stdout = self
            .run_checked(
                OP,
                "gh",
                &[
                    "pr",
                    "list",
                    "--head",
                    branch.as_str(),
                    "--state",
                    "open",
                    "--json",
                    "number,url",
                ],
            )
            .await?;
        let requests: Vec<ChangeRequestRef> = serde_json::from_str(stdout.trim())
            .map_err(|e| CollaboratorError::operation(OP, format!("unparseable gh output: {e}")))?;
        Ok(requests.into_iter().next())
    }

    async fn open_change_request(
        &self,
        branch: &Validated,
        target: &Validated,
        title: &Validated,
        body: &Validated,
    ) -> Result<ChangeRequestRef, CollaboratorError> {
        const OP: &str = "open_change_request";
        let url = self
            .run_checked(
                OP,
                "gh",
                &[
                    "pr",
                    "create",
                    "--head",
                    branch.as_str(),
                    "--base",
                    target.as_str(),
                    "--title",
                    title.as_str(),
                    "--body",
                    body.as_str(),
                ],
            )
            .await?
            .trim()
            .to_string();

        // `gh pr create` prints the URL; the trailing segment is the number.
        let number = url
            .rsplit('/')
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| {
                CollaboratorError::operation(OP, format!("unexpected gh output: {url}"))
            })?;
        Ok(ChangeRequestRef { number, url })
    }
}
