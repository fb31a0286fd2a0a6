//! Request and response types for agent invocations.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use devflow_utils::error::AgentError;
use devflow_utils::types::{ModelTier, Phase, RunId};
use devflow_validation::Validated;

/// A request to execute one phase against the agent.
///
/// Arguments are [`Validated`] values; this type cannot be built from raw
/// strings, which is how unvalidated input is kept away from the agent and
/// from every delegated command downstream of it.
#[derive(Debug, Clone)]
pub struct PhaseRequest {
    pub phase: Phase,
    pub run_id: RunId,
    pub args: Vec<Validated>,
    /// Explicit model override; wins over the tier map when present.
    pub model_hint: Option<String>,
}

impl PhaseRequest {
    #[must_use]
    pub fn new(phase: Phase, run_id: RunId, args: Vec<Validated>) -> Self {
        Self {
            phase,
            run_id,
            args,
            model_hint: None,
        }
    }

    #[must_use]
    pub fn with_model_hint(mut self, hint: impl Into<String>) -> Self {
        self.model_hint = Some(hint.into());
        self
    }
}

/// One concrete call to the agent backend: rendered prompt plus model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInvocation {
    pub run_id: RunId,
    pub phase: Phase,
    pub prompt: String,
    pub model: String,
}

/// Self-reported outcome of an agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Success,
    Failure,
}

/// Parsed agent output.
///
/// `payload` is the structured portion; schema checks against the phase
/// contract happen in the engine, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub status: AgentStatus,
    pub payload: serde_json::Value,
    #[serde(skip)]
    pub raw_text: String,
}

impl AgentResponse {
    #[must_use]
    pub fn success(payload: serde_json::Value) -> Self {
        let raw_text = payload.to_string();
        Self {
            status: AgentStatus::Success,
            payload,
            raw_text,
        }
    }

    #[must_use]
    pub fn failure() -> Self {
        Self {
            status: AgentStatus::Failure,
            payload: serde_json::Value::Null,
            raw_text: String::new(),
        }
    }
}

/// Transport to the external agent capability.
///
/// Implementations must not retry and must not block past the caller's
/// timeout; the gateway owns both policies.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn invoke(&self, invocation: &AgentInvocation) -> Result<AgentResponse, AgentError>;
}

/// Phase → model tier mapping with config-level overrides.
#[derive(Debug, Clone, Default)]
pub struct TierMap {
    overrides: HashMap<Phase, ModelTier>,
}

impl TierMap {
    #[must_use]
    pub fn new(overrides: HashMap<Phase, ModelTier>) -> Self {
        Self { overrides }
    }

    /// The tier for a phase: override if configured, built-in default
    /// otherwise.
    #[must_use]
    pub fn tier_for(&self, phase: Phase) -> ModelTier {
        self.overrides
            .get(&phase)
            .copied()
            .unwrap_or(Self::default_tier(phase))
    }

    /// Built-in defaults: planning, building, and review get the heavy
    /// model; test verification runs on the standard tier; documentation is
    /// cheap.
    #[must_use]
    pub const fn default_tier(phase: Phase) -> ModelTier {
        match phase {
            Phase::Plan | Phase::Build | Phase::Review => ModelTier::Heavy,
            Phase::Test | Phase::Resolve => ModelTier::Standard,
            Phase::Document => ModelTier::Cheap,
        }
    }
}
