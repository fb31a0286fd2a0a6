//! Agent backend that shells out to the agent CLI binary.

use async_trait::async_trait;
use camino::Utf8PathBuf;
use tokio::process::Command;
use tracing::debug;

use devflow_utils::error::AgentError;

use crate::types::{AgentBackend, AgentInvocation, AgentResponse, AgentStatus};

/// Spawns the agent binary per invocation with an argument vector.
///
/// No shell is involved at any point: the prompt travels as a single argv
/// entry. The child is killed if the invocation future is dropped, which is
/// how the gateway's timeout terminates a stuck agent.
#[derive(Debug, Clone)]
pub struct AgentCliBackend {
    binary: Utf8PathBuf,
}

impl AgentCliBackend {
    /// Resolve the agent binary on PATH.
    pub fn discover(binary_name: &str) -> Result<Self, AgentError> {
        let path = which::which(binary_name).map_err(|e| AgentError::CapabilityUnavailable {
            reason: format!("agent binary '{binary_name}' not found: {e}"),
        })?;
        let binary =
            Utf8PathBuf::from_path_buf(path).map_err(|p| AgentError::CapabilityUnavailable {
                reason: format!("agent binary path is not UTF-8: {}", p.display()),
            })?;
        Ok(Self { binary })
    }

    #[must_use]
    pub fn at(binary: Utf8PathBuf) -> Self {
        Self { binary }
    }

    fn parse_output(stdout: &str) -> Result<AgentResponse, AgentError> {
        let envelope: serde_json::Value =
            serde_json::from_str(stdout.trim()).map_err(|e| AgentError::MalformedResponse {
                reason: format!("agent stdout is not JSON: {e}"),
            })?;
        let status = match envelope.get("status").and_then(|s| s.as_str()) {
            Some("success") => AgentStatus::Success,
            Some("failure") => AgentStatus::Failure,
            other => {
                return Err(AgentError::MalformedResponse {
                    reason: format!("missing or unknown status field: {other:?}"),
                });
            }
        };
        let payload = envelope
            .get("payload")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        Ok(AgentResponse {
            status,
            payload,
            raw_text: stdout.to_string(),
        })
    }
}

#[async_trait]
impl AgentBackend for AgentCliBackend {
    async fn invoke(&self, invocation: &AgentInvocation) -> Result<AgentResponse, AgentError> {
        debug!(
            phase = %invocation.phase,
            model = %invocation.model,
            "spawning agent process"
        );

        let output = Command::new(self.binary.as_std_path())
            .arg("-p")
            .arg(&invocation.prompt)
            .arg("--model")
            .arg(&invocation.model)
            .arg("--output-format")
            .arg("json")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AgentError::CapabilityUnavailable {
                reason: format!("failed to spawn agent process: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::CapabilityUnavailable {
                reason: format!(
                    "agent process exited with {}: {}",
                    output.status,
                    stderr.trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        Self::parse_output(&stdout)
    }
}
