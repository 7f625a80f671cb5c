//! Sandbox: isolated execution of generated code against generated tests.
//!
//! # Modules
//!
//! - [`process`] — `ProcessSandbox`, a temp-directory + child-process runner
//! - [`error`]   — `SandboxError` / `SandboxResult`
//!
//! The [`crate::capabilities::SandboxRunner`] trait is the seam; the
//! refinement loop never sees a concrete runner.

pub mod error;
pub mod process;

pub use error::{SandboxError, SandboxResult};
pub use process::{ProcessSandbox, ProcessSandboxConfig};
