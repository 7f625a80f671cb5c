//! Capability traits for the external collaborators the engine consumes.
//!
//! - `ModelCaller`: prompt in, raw text out (or timeout/provider error)
//! - `RetrievalService`: query in, ranked code excerpts out
//! - `SandboxRunner`: code + tests in, captured process output out
//!
//! All traits are async and backend-agnostic. In-memory fakes live in the
//! `fakes` module behind the `test-util` feature.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::bundle::CodeBundle;
use crate::sandbox::SandboxResult;

// ---------------------------------------------------------------------------
// ModelCaller
// ---------------------------------------------------------------------------

/// Name of a model provider/model pairing (e.g. `"groq:llama-3.1-8b"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-call options forwarded to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOptions {
    pub json_mode: bool,
    pub max_tokens: u32,
    /// Hard wall-clock limit for this call. Never zero.
    pub timeout_ms: u64,
}

impl CallOptions {
    pub fn json(max_tokens: u32, timeout_ms: u64) -> Self {
        Self {
            json_mode: true,
            max_tokens,
            timeout_ms: timeout_ms.max(1),
        }
    }

    pub fn text(max_tokens: u32, timeout_ms: u64) -> Self {
        Self {
            json_mode: false,
            max_tokens,
            timeout_ms: timeout_ms.max(1),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

/// Failure modes reported by a [`ModelCaller`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("model call timed out")]
    Timeout,

    #[error("provider error: {0}")]
    Provider(String),
}

/// Sends a prompt to a named provider.
///
/// Implementations are unreliable by contract: callers must always wrap
/// invocations with a timeout (see [`crate::guard::ModelGateway::call`]).
#[async_trait]
pub trait ModelCaller: Send + Sync {
    async fn call(
        &self,
        provider: &ProviderId,
        prompt: &str,
        options: CallOptions,
    ) -> std::result::Result<String, ModelError>;
}

// ---------------------------------------------------------------------------
// RetrievalService
// ---------------------------------------------------------------------------

/// Inclusive 1-based line span of an excerpt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }
}

impl std::fmt::Display for LineRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// One ranked excerpt returned by a [`RetrievalService`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub file_path: String,
    pub line_range: LineRange,
    pub content: String,
    /// Similarity score as reported by the backend (higher is better).
    pub score: f32,
}

/// Query-scoped code search over one repository.
#[async_trait]
pub trait RetrievalService: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize) -> std::result::Result<Vec<RetrievedChunk>, String>;
}

// ---------------------------------------------------------------------------
// SandboxRunner
// ---------------------------------------------------------------------------

/// Captured output of one sandboxed test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl SandboxOutput {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr joined, the form the failure digest scans.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Executes untrusted generated code against generated tests in isolation.
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    async fn run(
        &self,
        code: &CodeBundle,
        tests: &str,
        timeout: Duration,
    ) -> SandboxResult<SandboxOutput>;
}
