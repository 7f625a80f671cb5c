//! Child-process sandbox.
//!
//! Each run gets a fresh temporary directory holding the bundle's files plus
//! one generated test file, and a test command executed with a cleared
//! environment. The directory is removed when the run returns; the child is
//! killed if the timeout fires.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::error::{SandboxError, SandboxResult};
use crate::capabilities::{SandboxOutput, SandboxRunner};
use crate::domain::bundle::CodeBundle;

/// How the sandbox invokes the test runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSandboxConfig {
    /// argv of the test command, run inside the temp directory.
    pub command: Vec<String>,
    /// Name the generated tests are written under.
    pub tests_file_name: String,
    /// Environment variables copied from the parent; everything else is cleared.
    pub inherit_env: Vec<String>,
}

impl Default for ProcessSandboxConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "python3".to_string(),
                "-m".to_string(),
                "pytest".to_string(),
                "-q".to_string(),
            ],
            tests_file_name: "test_generated.py".to_string(),
            inherit_env: vec!["PATH".to_string()],
        }
    }
}

/// Runs tests as a local child process inside a temp directory.
#[derive(Debug, Clone, Default)]
pub struct ProcessSandbox {
    config: ProcessSandboxConfig,
}

impl ProcessSandbox {
    pub fn new(config: ProcessSandboxConfig) -> SandboxResult<Self> {
        if config.command.is_empty() {
            return Err(SandboxError::InvalidConfig("command is empty".into()));
        }
        relative_path(&config.tests_file_name)?;
        Ok(Self { config })
    }

    fn write_workspace(&self, root: &Path, code: &CodeBundle, tests: &str) -> SandboxResult<()> {
        for file in &code.files {
            let path = root.join(relative_path(&file.file_path)?);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &file.content)?;
        }
        std::fs::write(
            root.join(relative_path(&self.config.tests_file_name)?),
            tests,
        )?;
        Ok(())
    }
}

/// Accept only plain relative paths so a bundle cannot escape the temp dir.
fn relative_path(raw: &str) -> SandboxResult<PathBuf> {
    let path = Path::new(raw);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(SandboxError::UnsafePath(raw.to_string())),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(SandboxError::UnsafePath(raw.to_string()));
    }
    Ok(clean)
}

#[async_trait]
impl SandboxRunner for ProcessSandbox {
    #[instrument(skip(self, code, tests), fields(files = code.files.len()))]
    async fn run(
        &self,
        code: &CodeBundle,
        tests: &str,
        timeout: Duration,
    ) -> SandboxResult<SandboxOutput> {
        let workdir = tempfile::tempdir()?;
        self.write_workspace(workdir.path(), code, tests)?;

        let exe = &self.config.command[0];
        let mut cmd = Command::new(exe);
        cmd.args(&self.config.command[1..])
            .current_dir(workdir.path())
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in &self.config.inherit_env {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }

        let start = Instant::now();
        let child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            command: self.config.command.join(" "),
            source,
        })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(limit_ms = timeout.as_millis() as u64, "sandbox run timed out");
                return Err(SandboxError::Timeout {
                    limit_ms: timeout.as_millis() as u64,
                });
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        debug!(
            exit_code,
            duration_ms = start.elapsed().as_millis() as u64,
            "sandbox run finished"
        );
        Ok(SandboxOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bundle::CodeFile;

    fn shell(script: &str) -> ProcessSandbox {
        ProcessSandbox::new(ProcessSandboxConfig {
            command: vec!["sh".into(), "-c".into(), script.into()],
            ..ProcessSandboxConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_relative_path_rejects_escapes() {
        assert!(relative_path("../etc/passwd").is_err());
        assert!(relative_path("/etc/passwd").is_err());
        assert!(relative_path("").is_err());
        assert_eq!(
            relative_path("./pkg/mod.py").unwrap(),
            PathBuf::from("pkg/mod.py")
        );
    }

    #[test]
    fn test_empty_command_rejected() {
        let err = ProcessSandbox::new(ProcessSandboxConfig {
            command: vec![],
            ..ProcessSandboxConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_files_are_written_and_exit_code_captured() {
        let sandbox = shell("test -f pkg/calc.py && cat test_generated.py && exit 3");
        let bundle = CodeBundle {
            files: vec![CodeFile::new("pkg/calc.py", "def add(a, b):\n    return a + b\n")],
            truncated: false,
            omitted_files: 0,
        };
        let out = sandbox
            .run(&bundle, "def test_add(): pass\n", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(out.stdout.contains("def test_add"));
        assert!(!out.passed());
    }

    #[tokio::test]
    async fn test_environment_is_cleared() {
        std::env::set_var("CODESMITH_SANDBOX_LEAK", "secret");
        let sandbox = shell("echo \"leak=${CODESMITH_SANDBOX_LEAK:-none}\"");
        let out = sandbox
            .run(&CodeBundle::default(), "", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(out.stdout.contains("leak=none"));
        assert!(out.passed());
    }

    #[tokio::test]
    async fn test_timeout_kills_run() {
        let sandbox = shell("sleep 5");
        let err = sandbox
            .run(&CodeBundle::default(), "", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { limit_ms: 100 }));
    }

    #[tokio::test]
    async fn test_bundle_with_escaping_path_rejected() {
        let sandbox = shell("true");
        let bundle = CodeBundle::single("../outside.py", "x = 1\n");
        let err = sandbox
            .run(&bundle, "", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::UnsafePath(_)));
    }
}
