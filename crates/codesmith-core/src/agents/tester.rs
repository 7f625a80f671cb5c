//! Test agent: writes a pytest file for a request, optionally against a bundle.

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::{unfence, Agents};
use crate::capabilities::CallOptions;
use crate::domain::bundle::CodeBundle;
use crate::error::{OrchestratorError, Result};
use crate::prompts;

const TEST_MAX_TOKENS: u32 = 2_048;

impl Agents {
    /// Generate tests. With `code = None` the tests are written from the
    /// request alone, so they can run in parallel with code generation.
    #[instrument(skip_all, fields(against_code = code.is_some()))]
    pub async fn write_tests(
        &self,
        request: &str,
        code: Option<&CodeBundle>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let cfg = &self.config;
        let raw = self
            .gateway
            .call(
                &cfg.providers.test,
                &prompts::tests_for(request, code),
                CallOptions::text(TEST_MAX_TOKENS, cfg.timeouts.test_ms),
                cancel,
            )
            .await?;
        parse_tests(&raw)
    }
}

pub(crate) fn looks_like_tests(text: &str) -> bool {
    text.contains("def test") || text.contains("assert")
}

fn parse_tests(raw: &str) -> Result<String> {
    let tests = unfence(raw);
    if !looks_like_tests(&tests) {
        return Err(OrchestratorError::malformed(
            "test",
            "output contains no test functions or assertions",
        ));
    }
    Ok(format!("{}\n", tests.trim_end()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tests_unfences() {
        let raw = "Here are the tests:\n```python\nfrom m import f\n\ndef test_f():\n    assert f() == 1\n```";
        let tests = parse_tests(raw).unwrap();
        assert!(tests.starts_with("from m import f"));
        assert!(tests.ends_with("== 1\n"));
    }

    #[test]
    fn test_prose_rejected() {
        assert!(parse_tests("I would test the edge cases.").is_err());
    }
}
