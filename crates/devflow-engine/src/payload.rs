//! Structured payload parsing against the per-phase schema.
//!
//! The agent's JSON payload is checked here before anything downstream sees
//! it. Paths reported by the agent are re-validated with the same path rules
//! as user input; an agent is an external capability, not a trusted caller.

use serde_json::Value;
use thiserror::Error;

use devflow_utils::error::ValidationError;
use devflow_utils::types::{Finding, Phase, PhasePayload, Severity};
use devflow_validation::validate_file_path;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("payload does not match the {phase} schema: {reason}")]
    Mismatch { phase: Phase, reason: String },

    #[error("payload contains a rejected path: {0}")]
    Path(#[from] ValidationError),
}

impl SchemaError {
    fn mismatch(phase: Phase, reason: impl Into<String>) -> Self {
        Self::Mismatch {
            phase,
            reason: reason.into(),
        }
    }
}

/// Parse an agent payload against the schema for `phase`.
pub fn parse_payload(
    phase: Phase,
    payload: &Value,
    allowed_roots: &[String],
) -> Result<PhasePayload, SchemaError> {
    match phase {
        Phase::Plan => {
            let plan_ref = payload
                .get("plan")
                .and_then(Value::as_str)
                .ok_or_else(|| SchemaError::mismatch(phase, "missing string field 'plan'"))?;
            Ok(PhasePayload::Plan {
                plan_ref: plan_ref.to_string(),
            })
        }
        Phase::Build => Ok(PhasePayload::ChangedFiles {
            paths: parse_paths(phase, payload, "changed_files", allowed_roots)?,
        }),
        Phase::Document => Ok(PhasePayload::Documents {
            paths: parse_paths(phase, payload, "documents", allowed_roots)?,
        }),
        Phase::Test | Phase::Review => {
            let raw = payload
                .get("findings")
                .and_then(Value::as_array)
                .ok_or_else(|| SchemaError::mismatch(phase, "missing array field 'findings'"))?;
            let findings = raw
                .iter()
                .map(|f| parse_finding(phase, f))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(PhasePayload::Findings { findings })
        }
        Phase::Resolve => Ok(PhasePayload::Resolutions {
            resolved: parse_id_list(phase, payload, "resolved")?,
            unresolved: parse_id_list(phase, payload, "unresolved")?,
        }),
    }
}

fn parse_paths(
    phase: Phase,
    payload: &Value,
    field: &str,
    allowed_roots: &[String],
) -> Result<Vec<String>, SchemaError> {
    let raw = payload
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| SchemaError::mismatch(phase, format!("missing array field '{field}'")))?;
    raw.iter()
        .map(|p| {
            let path = p
                .as_str()
                .ok_or_else(|| SchemaError::mismatch(phase, format!("non-string entry in '{field}'")))?;
            Ok(validate_file_path(path, allowed_roots)?.into_inner())
        })
        .collect()
}

fn parse_id_list(phase: Phase, payload: &Value, field: &str) -> Result<Vec<String>, SchemaError> {
    match payload.get(field) {
        None => Ok(Vec::new()),
        Some(value) => value
            .as_array()
            .ok_or_else(|| SchemaError::mismatch(phase, format!("'{field}' is not an array")))?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(String::from)
                    .ok_or_else(|| SchemaError::mismatch(phase, format!("non-string entry in '{field}'")))
            })
            .collect(),
    }
}

fn parse_finding(phase: Phase, value: &Value) -> Result<Finding, SchemaError> {
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| SchemaError::mismatch(phase, "finding missing string field 'id'"))?;
    let severity = match value.get("severity").and_then(Value::as_str) {
        Some("blocker") => Severity::Blocker,
        Some("tech_debt") => Severity::TechDebt,
        Some("skippable") => Severity::Skippable,
        other => {
            return Err(SchemaError::mismatch(
                phase,
                format!("finding has unknown severity {other:?}"),
            ));
        }
    };
    let description = value
        .get("description")
        .and_then(Value::as_str)
        .ok_or_else(|| SchemaError::mismatch(phase, "finding missing string field 'description'"))?;
    Ok(Finding {
        id: id.to_string(),
        severity,
        description: description.to_string(),
        location: value
            .get("location")
            .and_then(Value::as_str)
            .map(String::from),
    })
}
