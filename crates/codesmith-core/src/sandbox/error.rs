//! Error types for the sandbox module.

/// Errors produced while running generated code.
///
/// Every variant is treated by the refinement loop as a failing test run;
/// none of them abort a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox run timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to write outside the sandbox: {0}")]
    UnsafePath(String),

    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),

    #[error("sandbox run cancelled")]
    Cancelled,

    #[error("sandbox io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
