//! The gateway combines tier selection, timeout enforcement, and transcript
//! logging around a backend.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use devflow_utils::error::AgentError;

use crate::transcript::TranscriptWriter;
use crate::types::{AgentBackend, AgentInvocation, AgentResponse, PhaseRequest, TierMap};

/// Single entry point for agent invocations.
///
/// The gateway never retries: a timed-out or failed invocation is reported
/// to the caller, which decides between recording an errored result and
/// driving a resolution loop.
pub struct AgentGateway {
    backend: Arc<dyn AgentBackend>,
    tiers: TierMap,
    timeout: Duration,
    transcripts: TranscriptWriter,
}

impl AgentGateway {
    #[must_use]
    pub fn new(
        backend: Arc<dyn AgentBackend>,
        tiers: TierMap,
        timeout: Duration,
        transcripts: TranscriptWriter,
    ) -> Self {
        Self {
            backend,
            tiers,
            timeout,
            transcripts,
        }
    }

    /// Model selected for this request: explicit hint wins over the tier map.
    #[must_use]
    pub fn model_for(&self, request: &PhaseRequest) -> String {
        request
            .model_hint
            .clone()
            .unwrap_or_else(|| self.tiers.tier_for(request.phase).model_name().to_string())
    }

    /// Invoke the agent once with the rendered prompt.
    ///
    /// The prompt and the outcome are appended to the per-(run, phase)
    /// transcript whether the invocation succeeds or not. A timeout maps to
    /// [`AgentError::Timeout`]; the subprocess is killed when the invocation
    /// future is dropped.
    pub async fn invoke(
        &self,
        request: &PhaseRequest,
        prompt: String,
    ) -> Result<AgentResponse, AgentError> {
        let model = self.model_for(request);
        let invocation = AgentInvocation {
            run_id: request.run_id.clone(),
            phase: request.phase,
            prompt,
            model: model.clone(),
        };

        self.transcripts
            .record_prompt(request.phase, &model, &invocation.prompt);
        debug!(phase = %request.phase, model = %model, "invoking agent");

        let outcome = tokio::time::timeout(self.timeout, self.backend.invoke(&invocation))
            .await
            .map_err(|_| AgentError::Timeout {
                duration: self.timeout,
            })
            .and_then(|r| r);

        match &outcome {
            Ok(response) => {
                let raw_ref =
                    self.transcripts
                        .record_response(request.phase, &model, &response.raw_text);
                info!(phase = %request.phase, raw_ref = %raw_ref, "agent invocation completed");
            }
            Err(e) => {
                self.transcripts
                    .record_failure(request.phase, &model, &e.to_string());
            }
        }
        outcome
    }

    /// Raw-output reference for a response (BLAKE3 of the raw text).
    #[must_use]
    pub fn raw_output_ref(response: &AgentResponse) -> String {
        crate::transcript::hash_text(&response.raw_text)
    }
}
