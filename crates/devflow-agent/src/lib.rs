//! Agent gateway: the single doorway to the external code-generating agent.
//!
//! The agent is an external capability reached through the [`AgentBackend`]
//! trait. Production uses [`AgentCliBackend`], which spawns the agent binary
//! as a subprocess with an argument vector; tests use
//! [`ScriptedBackend`], which replays queued responses and records every
//! invocation.
//!
//! The [`AgentGateway`] owns tier selection, the per-invocation timeout, and
//! transcript logging. It performs no retries: retry policy belongs to the
//! engine's resolution loop, not to the transport.

mod cli_backend;
mod gateway;
#[cfg(any(test, feature = "test-support"))]
mod scripted;
mod transcript;
mod types;

pub use cli_backend::AgentCliBackend;
pub use gateway::AgentGateway;
#[cfg(any(test, feature = "test-support"))]
pub use scripted::ScriptedBackend;
pub use transcript::{TranscriptEntry, TranscriptWriter};
pub use types::{AgentBackend, AgentInvocation, AgentResponse, AgentStatus, PhaseRequest, TierMap};
