//! Error taxonomy for the orchestration engine.
//!
//! Almost none of these escape to a caller: agents recover locally and
//! degrade the response. They exist so the recovery paths can match on
//! *why* a call failed.

use crate::capabilities::ProviderId;

/// Errors produced inside the orchestration layer.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("model call to {provider} timed out after {timeout_ms}ms")]
    ModelTimeout { provider: ProviderId, timeout_ms: u64 },

    #[error("provider {provider} failed: {message}")]
    Provider { provider: ProviderId, message: String },

    #[error("circuit breaker open for {provider}: {consecutive_failures} consecutive failures")]
    CircuitOpen {
        provider: ProviderId,
        consecutive_failures: u32,
    },

    #[error("{agent} agent exceeded its {timeout_ms}ms budget")]
    AgentTimeout { agent: String, timeout_ms: u64 },

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("malformed model output from {agent}: {reason}")]
    MalformedOutput { agent: String, reason: String },

    #[error("sandbox error: {0}")]
    Sandbox(#[from] crate::sandbox::SandboxError),

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Construct a [`OrchestratorError::MalformedOutput`].
    pub fn malformed(agent: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedOutput {
            agent: agent.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure came from the cancellation signal rather than an agent.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
