//! Core types shared across the devflow workspace.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Phase identifiers for the software-change workflow.
///
/// Phases execute in a defined order:
///
/// ```text
/// Plan → Build → {Test, Review, Document} → (Resolve, as needed)
/// ```
///
/// The derived `Ord` follows pipeline position and doubles as the conflict
/// tie-break priority used by the parallel coordinator: when two phases claim
/// the same resource, the lower-ordered phase wins (test < review < document).
///
/// # Serialization
///
/// `Phase` serializes to its lowercase name (e.g. `"plan"`, `"build"`), which
/// is also the key used in persisted `phase_checkpoints` maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Plan phase: turns an issue or prompt into an implementation plan.
    Plan,
    /// Build phase: applies the planned changes to the working tree.
    Build,
    /// Test phase: verifies the build output and reports findings.
    Test,
    /// Review phase: reviews the change and reports findings.
    Review,
    /// Document phase: produces documentation for the change.
    Document,
    /// Resolve phase: repair sub-phase invoked per blocker finding.
    Resolve,
}

impl Phase {
    /// Canonical lowercase name used in state records, transcripts, and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Build => "build",
            Self::Test => "test",
            Self::Review => "review",
            Self::Document => "document",
            Self::Resolve => "resolve",
        }
    }

    /// Whether this phase produces findings that gate the retry loop.
    #[must_use]
    pub const fn is_verification(&self) -> bool {
        matches!(self, Self::Test | Self::Review)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(Self::Plan),
            "build" => Ok(Self::Build),
            "test" => Ok(Self::Test),
            "review" => Ok(Self::Review),
            "document" => Ok(Self::Document),
            "resolve" => Ok(Self::Resolve),
            other => Err(format!("unknown phase: {other}")),
        }
    }
}

/// Opaque run identifier, immutable after creation.
///
/// Format: `RUN-` followed by 4 to 12 uppercase alphanumerics.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Parse a run identifier, rejecting anything outside the
    /// `RUN-[A-Z0-9]{4,12}` grammar.
    pub fn new(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        let suffix = raw.strip_prefix("RUN-").ok_or_else(|| {
            ValidationError::new("run_id", "must start with the RUN- prefix", &raw)
        })?;
        if suffix.len() < 4 || suffix.len() > 12 {
            return Err(ValidationError::new(
                "run_id",
                "suffix must be 4 to 12 characters",
                &raw,
            ));
        }
        if !suffix
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(ValidationError::new(
                "run_id",
                "suffix must be uppercase alphanumeric",
                &raw,
            ));
        }
        Ok(Self(raw))
    }

    /// Generate a fresh run identifier from the wall clock and process id.
    #[must_use]
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let digest = blake3::hash(format!("{nanos}-{}", std::process::id()).as_bytes());
        let suffix: String = digest
            .to_hex()
            .chars()
            .take(8)
            .map(|c| c.to_ascii_uppercase())
            .collect();
        Self(format!("RUN-{suffix}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a single phase execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    /// The phase ran and the agent reported success.
    Success,
    /// The phase ran and the agent reported failure.
    Failure,
    /// The phase did not produce a usable result (timeout, malformed or
    /// schema-mismatched output). Recorded, never raised.
    Error,
}

/// Severity of a verification finding.
///
/// Only `Blocker` findings gate the retry-resolution loop; the other
/// severities are recorded but never block a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Blocker,
    TechDebt,
    Skippable,
}

impl Severity {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Blocker => "blocker",
            Self::TechDebt => "tech_debt",
            Self::Skippable => "skippable",
        }
    }
}

/// A structured issue reported by a verification phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable identifier assigned by the reporting phase.
    pub id: String,
    pub severity: Severity,
    pub description: String,
    /// Optional location reference (file path, symbol, test name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Finding {
    #[must_use]
    pub const fn is_blocker(&self) -> bool {
        matches!(self.severity, Severity::Blocker)
    }
}

/// Structured payload carried by a [`PhaseResult`], one variant per phase
/// schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhasePayload {
    /// Plan phase output: a reference to the produced plan.
    Plan { plan_ref: String },
    /// Build phase output: paths changed in the working tree.
    ChangedFiles { paths: Vec<String> },
    /// Verification output: findings reported by test/review.
    Findings { findings: Vec<Finding> },
    /// Document phase output: documentation paths produced.
    Documents { paths: Vec<String> },
    /// Resolve sub-phase output: which findings were repaired.
    Resolutions {
        resolved: Vec<String>,
        unresolved: Vec<String>,
    },
    /// No structured payload (failed or errored executions).
    Empty,
}

impl PhasePayload {
    /// Findings carried by this payload, empty for non-verification payloads.
    #[must_use]
    pub fn findings(&self) -> &[Finding] {
        match self {
            Self::Findings { findings } => findings,
            _ => &[],
        }
    }

    /// Resource paths claimed by this payload, used for conflict detection.
    #[must_use]
    pub fn resource_paths(&self) -> &[String] {
        match self {
            Self::ChangedFiles { paths } | Self::Documents { paths } => paths,
            _ => &[],
        }
    }
}

/// Durable record of one phase execution, checkpointed into the run state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub payload: PhasePayload,
    /// BLAKE3 hex of the raw agent output, keyed into the transcript.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output_ref: Option<String>,
    /// Short machine-readable error kind for `status == Error` results
    /// (`"timeout"`, `"malformed_response"`, `"schema_mismatch"`, ...) and
    /// for verification results whose resolution loop stopped without
    /// passing (`"no_progress"`, `"attempts_exhausted"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl PhaseResult {
    /// Successful result with a structured payload.
    #[must_use]
    pub const fn success(phase: Phase, payload: PhasePayload) -> Self {
        Self {
            phase,
            status: PhaseStatus::Success,
            payload,
            raw_output_ref: None,
            error_kind: None,
        }
    }

    /// Failure reported by the agent itself.
    #[must_use]
    pub const fn failure(phase: Phase) -> Self {
        Self {
            phase,
            status: PhaseStatus::Failure,
            payload: PhasePayload::Empty,
            raw_output_ref: None,
            error_kind: None,
        }
    }

    /// Errored result that could not produce a usable payload.
    #[must_use]
    pub fn error(phase: Phase, kind: impl Into<String>) -> Self {
        Self {
            phase,
            status: PhaseStatus::Error,
            payload: PhasePayload::Empty,
            raw_output_ref: None,
            error_kind: Some(kind.into()),
        }
    }

    #[must_use]
    pub fn with_raw_output_ref(mut self, raw_ref: impl Into<String>) -> Self {
        self.raw_output_ref = Some(raw_ref.into());
        self
    }

    #[must_use]
    pub fn with_error_kind(mut self, kind: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, PhaseStatus::Success)
    }

    /// Blocker findings in this result, empty for non-verification phases.
    #[must_use]
    pub fn blockers(&self) -> Vec<&Finding> {
        self.payload
            .findings()
            .iter()
            .filter(|f| f.is_blocker())
            .collect()
    }
}

/// Capability tier used to pick an agent model per phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Cheap,
    Standard,
    Heavy,
}

impl ModelTier {
    /// Concrete model name this tier resolves to.
    #[must_use]
    pub const fn model_name(&self) -> &'static str {
        match self {
            Self::Cheap => "haiku",
            Self::Standard => "sonnet",
            Self::Heavy => "opus",
        }
    }
}

impl std::str::FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cheap" => Ok(Self::Cheap),
            "standard" => Ok(Self::Standard),
            "heavy" => Ok(Self::Heavy),
            other => Err(format!(
                "unknown model tier '{other}' (expected cheap, standard, or heavy)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_order_matches_tie_break_priority() {
        assert!(Phase::Test < Phase::Review);
        assert!(Phase::Review < Phase::Document);
        assert!(Phase::Plan < Phase::Build);
    }

    #[test]
    fn phase_serializes_to_lowercase_name() {
        let json = serde_json::to_string(&Phase::Build).unwrap();
        assert_eq!(json, "\"build\"");
        let parsed: Phase = serde_json::from_str("\"review\"").unwrap();
        assert_eq!(parsed, Phase::Review);
    }

    #[test]
    fn run_id_accepts_valid_forms() {
        assert!(RunId::new("RUN-AB12").is_ok());
        assert!(RunId::new("RUN-0123456789AB").is_ok());
    }

    #[test]
    fn run_id_rejects_invalid_forms() {
        for bad in ["AB12", "RUN-ab12", "RUN-A", "RUN-0123456789ABC", "RUN-A B1"] {
            assert!(RunId::new(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn generated_run_ids_parse() {
        let id = RunId::generate();
        assert!(RunId::new(id.as_str()).is_ok());
    }

    #[test]
    fn blockers_filters_by_severity() {
        let result = PhaseResult::success(
            Phase::Test,
            PhasePayload::Findings {
                findings: vec![
                    Finding {
                        id: "T1".into(),
                        severity: Severity::Blocker,
                        description: "assertion failed".into(),
                        location: None,
                    },
                    Finding {
                        id: "T2".into(),
                        severity: Severity::TechDebt,
                        description: "slow test".into(),
                        location: None,
                    },
                ],
            },
        );
        let blockers = result.blockers();
        assert_eq!(blockers.len(), 1);
        assert_eq!(blockers[0].id, "T1");
    }

    #[test]
    fn severity_round_trips_as_snake_case() {
        let json = serde_json::to_string(&Severity::TechDebt).unwrap();
        assert_eq!(json, "\"tech_debt\"");
    }
}
