//! `gh` CLI implementation of [`IssueTracker`].

use async_trait::async_trait;
use camino::Utf8PathBuf;
use tokio::process::Command;
use tracing::debug;

use devflow_utils::error::CollaboratorError;
use devflow_validation::Validated;

use crate::types::{Issue, BOT_MARKER};
use crate::IssueTracker;

#[derive(Debug, Clone)]
pub struct GhIssueTracker {
    workdir: Utf8PathBuf,
}

impl GhIssueTracker {
    #[must_use]
    pub fn new(workdir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    async fn run_gh(
        &self,
        operation: &'static str,
        args: &[&str],
    ) -> Result<String, CollaboratorError> {
        debug!(operation, ?args, "running gh");
        let output = Command::new("gh")
            .args(args)
            .current_dir(self.workdir.as_std_path())
            .output()
            .await
            .map_err(|e| CollaboratorError::operation(operation, e.to_string()))?;
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
impl IssueTracker for GhIssueTracker {
    async fn fetch_issue(&self, id: &Validated) -> Result<Issue, CollaboratorError> {
        const OP: &str = "fetch_issue";
        let stdout = self
            .run_gh(OP, &["issue", "view", id.as_str(), "--json", "title,body"])
            .await?;
        serde_json::from_str(stdout.trim())
            .map_err(|e| CollaboratorError::operation(OP, format!("unparseable gh output: {e}")))
    }

    async fn post_comment(
        &self,
        id: &Validated,
        text: &Validated,
    ) -> Result<(), CollaboratorError> {
        let body = format!("{BOT_MARKER}\n{text}");
        self.run_gh(
            "post_comment",
            &["issue", "comment", id.as_str(), "--body", &body],
        )
        .await?;
        Ok(())
    }

    async fn add_label(&self, id: &Validated, label: &Validated) -> Result<(), CollaboratorError> {
        self.run_gh(
            "add_label",
            &["issue", "edit", id.as_str(), "--add-label", label.as_str()],
        )
        .await?;
        Ok(())
    }
}
