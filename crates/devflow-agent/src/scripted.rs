//! Scripted agent backend for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use devflow_utils::error::AgentError;
use devflow_utils::types::Phase;

use crate::types::{AgentBackend, AgentInvocation, AgentResponse, AgentStatus};

/// Replays queued responses and records every invocation.
///
/// Responses queued for a specific phase take precedence over the global
/// queue; the global queue drives sequential tests, the per-phase queues
/// drive parallel ones where arrival order is nondeterministic. When both
/// are empty the default response (if set) is repeated, which is how tests
/// model an agent that always answers the same way.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<AgentResponse, AgentError>>>,
    phase_scripts: Mutex<HashMap<Phase, VecDeque<Result<AgentResponse, AgentError>>>>,
    default_response: Mutex<Option<Result<AgentResponse, AgentError>>>,
    invocations: Mutex<Vec<AgentInvocation>>,
    delay: Mutex<Option<Duration>>,
    phase_delays: Mutex<HashMap<Phase, Duration>>,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: AgentResponse) {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(response));
    }

    /// Queue a successful response with the given payload.
    pub fn push_success(&self, payload: serde_json::Value) {
        self.push_response(AgentResponse::success(payload));
    }

    /// Queue a self-reported failure.
    pub fn push_failure(&self) {
        self.push_response(AgentResponse {
            status: AgentStatus::Failure,
            payload: serde_json::Value::Null,
            raw_text: r#"{"status":"failure"}"#.to_string(),
        });
    }

    pub fn push_error(&self, error: AgentError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    /// Queue a successful response consumed only by invocations of `phase`.
    pub fn push_success_for(&self, phase: Phase, payload: serde_json::Value) {
        self.phase_scripts
            .lock()
            .unwrap()
            .entry(phase)
            .or_default()
            .push_back(Ok(AgentResponse::success(payload)));
    }

    /// Queue an error consumed only by invocations of `phase`.
    pub fn push_error_for(&self, phase: Phase, error: AgentError) {
        self.phase_scripts
            .lock()
            .unwrap()
            .entry(phase)
            .or_default()
            .push_back(Err(error));
    }

    /// Response repeated once the queue is exhausted.
    pub fn set_default_success(&self, payload: serde_json::Value) {
        *self.default_response.lock().unwrap() = Some(Ok(AgentResponse::success(payload)));
    }

    pub fn set_default_error(&self, error: AgentError) {
        *self.default_response.lock().unwrap() = Some(Err(error));
    }

    /// Sleep this long before answering, for timeout tests.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Sleep before answering invocations of `phase` only.
    pub fn set_delay_for(&self, phase: Phase, delay: Duration) {
        self.phase_delays.lock().unwrap().insert(phase, delay);
    }

    /// Every invocation seen so far, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<AgentInvocation> {
        self.invocations.lock().unwrap().clone()
    }

    #[must_use]
    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    async fn invoke(&self, invocation: &AgentInvocation) -> Result<AgentResponse, AgentError> {
        self.invocations.lock().unwrap().push(invocation.clone());

        let delay = self
            .phase_delays
            .lock()
            .unwrap()
            .get(&invocation.phase)
            .copied()
            .or(*self.delay.lock().unwrap());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let phase_scripted = self
            .phase_scripts
            .lock()
            .unwrap()
            .get_mut(&invocation.phase)
            .and_then(VecDeque::pop_front);
        if let Some(scripted) = phase_scripted {
            return scripted;
        }
        if let Some(scripted) = self.script.lock().unwrap().pop_front() {
            return scripted;
        }
        match &*self.default_response.lock().unwrap() {
            Some(default) => default.clone(),
            None => Err(AgentError::CapabilityUnavailable {
                reason: "scripted backend exhausted".to_string(),
            }),
        }
    }
}
