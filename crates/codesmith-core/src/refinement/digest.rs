//! Failure digests: the short summary of a failing test run the fixer sees.

use serde::{Deserialize, Serialize};

use crate::capabilities::SandboxOutput;
use crate::sandbox::SandboxError;

/// Coarse failure taxonomy used to steer the fixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Syntax,
    Import,
    Assertion,
    Runtime,
    Timeout,
    Crash,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDigest {
    pub kind: FailureKind,
    /// Distinct failure lines, in output order.
    pub failures: Vec<String>,
}

impl FailureDigest {
    pub fn render(&self) -> String {
        let mut out = format!("kind: {:?}\n", self.kind);
        for line in &self.failures {
            out.push_str("- ");
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

const MARKERS: &[&str] = &[
    "FAILED ",
    "ERROR ",
    "AssertionError",
    "assert ",
    "SyntaxError",
    "IndentationError",
    "ImportError",
    "ModuleNotFoundError",
    "NameError",
    "TypeError",
    "AttributeError",
    "ValueError",
    "KeyError",
    "Traceback",
    "E   ",
];

fn classify(text: &str) -> FailureKind {
    if text.contains("SyntaxError") || text.contains("IndentationError") {
        FailureKind::Syntax
    } else if text.contains("ImportError") || text.contains("ModuleNotFoundError") {
        FailureKind::Import
    } else if text.contains("AssertionError") || text.contains("assert ") {
        FailureKind::Assertion
    } else if text.contains("Error") || text.contains("Traceback") {
        FailureKind::Runtime
    } else {
        FailureKind::Unknown
    }
}

/// Digest a completed run that exited non-zero.
pub fn digest_output(output: &SandboxOutput, max_failures: usize) -> FailureDigest {
    let text = output.combined();
    let mut failures: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        if !MARKERS.iter().any(|m| line.contains(m)) {
            continue;
        }
        let line = line.trim().to_string();
        if !failures.contains(&line) {
            failures.push(line);
        }
        if failures.len() >= max_failures {
            break;
        }
    }
    if failures.is_empty() {
        // Nothing recognizable; hand over the tail of the output.
        let tail: Vec<&str> = text.lines().rev().take(3).collect();
        let tail: Vec<String> = tail.into_iter().rev().map(str::to_string).collect();
        if tail.is_empty() {
            failures.push(format!("test run exited with code {}", output.exit_code));
        } else {
            failures.extend(tail);
        }
    }
    FailureDigest {
        kind: classify(&text),
        failures,
    }
}

/// Digest a run that never completed.
pub fn digest_error(err: &SandboxError) -> FailureDigest {
    let kind = match err {
        SandboxError::Timeout { .. } => FailureKind::Timeout,
        _ => FailureKind::Crash,
    };
    FailureDigest {
        kind,
        failures: vec![err.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTEST_FAIL: &str = "\
============================= FAILURES =============================
___________________________ test_add ______________________________
    def test_add():
>       assert add(1, 2) == 4
E       assert 3 == 4
E        +  where 3 = add(1, 2)
test_generated.py:4: AssertionError
FAILED test_generated.py::test_add - assert 3 == 4
1 failed in 0.02s";

    #[test]
    fn test_assertion_digest() {
        let out = SandboxOutput {
            stdout: PYTEST_FAIL.into(),
            stderr: String::new(),
            exit_code: 1,
        };
        let d = digest_output(&out, 8);
        assert_eq!(d.kind, FailureKind::Assertion);
        assert!(d
            .failures
            .iter()
            .any(|l| l.starts_with("FAILED test_generated.py::test_add")));
        assert!(d.render().contains("kind: Assertion"));
    }

    #[test]
    fn test_digest_is_bounded_and_deduplicated() {
        let out = SandboxOutput {
            stdout: "E   NameError: x\n".repeat(5) + &"E   TypeError: y\n".repeat(20),
            stderr: String::new(),
            exit_code: 1,
        };
        let d = digest_output(&out, 8);
        assert_eq!(d.failures.len(), 2);
        assert_eq!(d.kind, FailureKind::Runtime);
    }

    #[test]
    fn test_import_and_timeout() {
        let out = SandboxOutput {
            stdout: String::new(),
            stderr: "ModuleNotFoundError: No module named 'calc'".into(),
            exit_code: 2,
        };
        assert_eq!(digest_output(&out, 8).kind, FailureKind::Import);

        let d = digest_error(&SandboxError::Timeout { limit_ms: 30_000 });
        assert_eq!(d.kind, FailureKind::Timeout);
        assert!(d.failures[0].contains("30000ms"));
    }

    #[test]
    fn test_unrecognized_output_keeps_tail() {
        let out = SandboxOutput {
            stdout: "collected 0 items\nno tests ran".into(),
            stderr: String::new(),
            exit_code: 5,
        };
        let d = digest_output(&out, 8);
        assert_eq!(d.kind, FailureKind::Unknown);
        assert_eq!(d.failures, vec!["collected 0 items".to_string(), "no tests ran".to_string()]);
    }
}
