//! Error taxonomy for devflow.
//!
//! Failures are classified into a fixed set of kinds so callers can decide
//! between local recovery and surfacing:
//!
//! | Kind | Retry? | Exit code |
//! |------|--------|-----------|
//! | `Validation` | never — caller must resupply the input | 2 |
//! | `Agent::Timeout` / `Agent::CapabilityUnavailable` | caller-chosen backoff | 3 |
//! | `Agent::MalformedResponse` | surfaced, not retried | 3 |
//! | `Collaborator` | surfaced with the failing operation name | 3 |
//! | `State::Corrupted` | fatal for the run, never auto-repaired | 1 |
//! | `ResourceExhaustion` | terminal, reported | 1 |
//!
//! Library code returns these types and never calls `std::process::exit`;
//! the CLI maps errors to exit codes at the edge.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::types::Phase;

/// Process exit codes for the devflow CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Terminal success.
    Success,
    /// Internal or unexpected failure.
    Internal,
    /// Input validation failure.
    Validation,
    /// Agent or collaborator capability failure.
    Capability,
}

impl ExitCode {
    #[must_use]
    pub const fn as_i32(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Internal => 1,
            Self::Validation => 2,
            Self::Capability => 3,
        }
    }
}

/// A rejected externally-supplied value.
///
/// The rejected value is redacted (truncated, control characters stripped)
/// before it is stored or displayed, so the error itself never smuggles the
/// hostile input onward.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    /// Which input kind was rejected (`"branch_name"`, `"file_path"`, ...).
    pub field: &'static str,
    pub reason: String,
    /// Redacted copy of the rejected value, for diagnostics only.
    pub rejected_value: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>, rejected: &str) -> Self {
        Self {
            field,
            reason: reason.into(),
            rejected_value: redact(rejected),
        }
    }
}

/// Truncate and sanitize a rejected value for safe inclusion in errors.
fn redact(raw: &str) -> String {
    const MAX: usize = 64;
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_control() { '\u{FFFD}' } else { c })
        .take(MAX)
        .collect();
    if raw.chars().count() > MAX {
        out.push_str("…");
    }
    out
}

/// Failures invoking the external agent capability.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("agent invocation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("agent capability unavailable: {reason}")]
    CapabilityUnavailable { reason: String },

    #[error("agent returned a malformed response: {reason}")]
    MalformedResponse { reason: String },
}

impl AgentError {
    /// Timeouts and outages are safe to retry with caller-chosen backoff;
    /// repeating an identical request to a non-deterministic capability that
    /// answered malformed rarely helps.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::CapabilityUnavailable { .. })
    }

    /// Short machine-readable kind recorded into phase results.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::CapabilityUnavailable { .. } => "capability_unavailable",
            Self::MalformedResponse { .. } => "malformed_response",
        }
    }
}

/// Failures in the Repository / IssueTracker collaborators.
///
/// Always carries the failing operation name when an operation failed.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    /// Staging produced an empty diff; nothing to commit.
    #[error("no changes to commit")]
    NoChanges,

    #[error("{operation} failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },
}

impl CollaboratorError {
    pub fn operation(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Operation {
            operation,
            message: message.into(),
        }
    }
}

/// Failures in the durable state store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("no run found for id {run_id}")]
    NotFound { run_id: String },

    #[error("run {run_id} already exists")]
    AlreadyExists { run_id: String },

    /// Unparseable durable record. Fatal for the run; never auto-repaired.
    #[error("state record at {path} is corrupted: {reason}")]
    Corrupted { path: String, reason: String },

    #[error("failed to encode state record: {reason}")]
    Encode { reason: String },

    #[error("state IO error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path}")]
    NotFound { path: String },

    #[error("invalid configuration file: {reason}")]
    InvalidFile { reason: String },

    #[error("invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Umbrella error for devflow library operations.
#[derive(Debug, Error)]
pub enum DevflowError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A phase recorded an error result that blocks the sequential flow.
    #[error("phase {phase} failed: {kind}")]
    PhaseFailed { phase: Phase, kind: String },

    /// Retry-resolution attempts exhausted. Terminal, reported, not crashed.
    #[error("phase {phase} exhausted {attempts} resolution attempts")]
    ResourceExhaustion { phase: Phase, attempts: u32 },

    /// Run-level cancel signal observed at a checkpoint boundary.
    #[error("run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl DevflowError {
    /// Map this error to the CLI exit code contract
    /// (0 success, 2 validation, 3 agent/capability, 1 internal).
    #[must_use]
    pub const fn to_exit_code(&self) -> ExitCode {
        match self {
            Self::Validation(_) => ExitCode::Validation,
            Self::Agent(_) | Self::Collaborator(_) => ExitCode::Capability,
            _ => ExitCode::Internal,
        }
    }

    /// Short, actionable recovery hint where one is available.
    #[must_use]
    pub fn recovery_hint(&self) -> Option<&'static str> {
        match self {
            Self::Validation(_) => Some("fix the rejected input and rerun"),
            Self::Agent(err) if err.is_retryable() => {
                Some("transient agent failure; retry with backoff")
            }
            Self::Agent(_) => Some("inspect the transcript; retrying an identical request rarely helps"),
            Self::Collaborator(CollaboratorError::NoChanges) => {
                Some("working tree was clean; nothing needed committing")
            }
            Self::Collaborator(_) => Some("check repository/tracker access and rerun"),
            Self::State(StateError::Corrupted { .. }) => {
                Some("state record is unreadable; start a fresh run")
            }
            Self::State(StateError::NotFound { .. }) => {
                Some("run `devflow start` to create the run first")
            }
            Self::ResourceExhaustion { .. } => Some("retry later or resolve the findings manually"),
            Self::PhaseFailed { kind, .. } if kind == "no_progress" => {
                Some("automatic resolution made no progress; escalate to a human")
            }
            Self::PhaseFailed { .. } => Some("inspect the phase checkpoint and transcript"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_mapping_matches_contract() {
        let v = DevflowError::from(ValidationError::new("branch_name", "bad", "x"));
        assert_eq!(v.to_exit_code().as_i32(), 2);

        let a = DevflowError::from(AgentError::Timeout {
            duration: Duration::from_secs(1),
        });
        assert_eq!(a.to_exit_code().as_i32(), 3);

        let c = DevflowError::from(CollaboratorError::operation("push", "remote gone"));
        assert_eq!(c.to_exit_code().as_i32(), 3);

        let s = DevflowError::from(StateError::NotFound {
            run_id: "RUN-AB12".into(),
        });
        assert_eq!(s.to_exit_code().as_i32(), 1);
    }

    #[test]
    fn malformed_response_is_not_retryable() {
        assert!(!AgentError::MalformedResponse {
            reason: "not json".into()
        }
        .is_retryable());
        assert!(AgentError::Timeout {
            duration: Duration::from_secs(5)
        }
        .is_retryable());
    }

    #[test]
    fn rejected_values_are_redacted() {
        let long = "a".repeat(200);
        let err = ValidationError::new("prompt", "too long", &long);
        assert!(err.rejected_value.chars().count() <= 65);

        let sneaky = "evil\x00value";
        let err = ValidationError::new("branch_name", "null byte", sneaky);
        assert!(!err.rejected_value.contains('\x00'));
    }

    #[test]
    fn collaborator_error_names_operation() {
        let err = CollaboratorError::operation("open_change_request", "auth required");
        assert!(err.to_string().contains("open_change_request"));
    }

    #[test]
    fn terminal_loop_failures_carry_hints() {
        let exhausted = DevflowError::ResourceExhaustion {
            phase: Phase::Review,
            attempts: 3,
        };
        assert_eq!(exhausted.to_exit_code().as_i32(), 1);
        assert!(exhausted.recovery_hint().unwrap().contains("retry later"));

        let stuck = DevflowError::PhaseFailed {
            phase: Phase::Test,
            kind: "no_progress".to_string(),
        };
        assert!(stuck.recovery_hint().unwrap().contains("escalate"));
    }
}
