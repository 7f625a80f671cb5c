//! Generation agent: plan + code bundle grounded in retrieved context.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{bundle_from_wire, fenced_blocks, Agents, WireFile};
use crate::capabilities::CallOptions;
use crate::context::RetrievedContext;
use crate::domain::bundle::{BundleLimits, CodeBundle, CodeFile, GenerationOutput};
use crate::domain::response::ChatTurn;
use crate::error::{OrchestratorError, Result};
use crate::json_repair::parse_lenient;
use crate::prompts;

const GENERATE_MAX_TOKENS: u32 = 4_096;

#[derive(Debug, Deserialize)]
struct WireGeneration {
    #[serde(default)]
    plan: String,
    #[serde(default)]
    files: Vec<WireFile>,
}

impl Agents {
    #[instrument(skip_all)]
    pub async fn generate(
        &self,
        query: &str,
        history: &[ChatTurn],
        context: &RetrievedContext,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput> {
        let cfg = &self.config;
        let raw = self
            .gateway
            .call(
                &cfg.providers.generate,
                &prompts::generate(query, history, &context.render()),
                CallOptions::json(GENERATE_MAX_TOKENS, cfg.timeouts.generate_ms),
                cancel,
            )
            .await?;
        let output = parse_generation(&raw, cfg.bundle)?;
        debug!(
            files = output.bundle.files.len(),
            truncated = output.bundle.truncated,
            "generation parsed"
        );
        Ok(output)
    }
}

/// JSON first; failing that, treat fenced blocks as files and the prose
/// before them as the plan.
fn parse_generation(raw: &str, limits: BundleLimits) -> Result<GenerationOutput> {
    if let Ok(wire) = parse_lenient::<WireGeneration>(raw) {
        let bundle = bundle_from_wire(wire.files, limits);
        if !bundle.is_empty() {
            return Ok(GenerationOutput {
                plan: wire.plan.trim().to_string(),
                bundle,
            });
        }
    }

    let blocks = fenced_blocks(raw);
    if blocks.is_empty() {
        return Err(OrchestratorError::malformed(
            "generate",
            "no files in JSON and no fenced code",
        ));
    }
    let plan = raw.split("```").next().unwrap_or_default().trim().to_string();
    let files = blocks
        .into_iter()
        .filter(|(_, body)| !body.trim().is_empty())
        .enumerate()
        .map(|(i, (info, body))| CodeFile::new(fallback_name(i, &info), body));
    let bundle = CodeBundle::bounded(files, limits);
    if bundle.is_empty() {
        return Err(OrchestratorError::malformed("generate", "fenced blocks were empty"));
    }
    Ok(GenerationOutput { plan, bundle })
}

fn fallback_name(index: usize, info: &str) -> String {
    let ext = match info.to_ascii_lowercase().as_str() {
        "rust" | "rs" => "rs",
        "javascript" | "js" => "js",
        "typescript" | "ts" => "ts",
        "go" => "go",
        _ => "py",
    };
    format!("generated_{}.{ext}", index + 1)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fakes::ScriptedModelCaller;

    #[test]
    fn test_parse_json_generation() {
        let raw = r#"{"plan":"add helper","files":[{"file_path":"util.py","content":"def helper():\n    return 1\n"}]}"#;
        let out = parse_generation(raw, BundleLimits::default()).unwrap();
        assert_eq!(out.plan, "add helper");
        assert_eq!(out.bundle.paths(), vec!["util.py".to_string()]);
    }

    #[test]
    fn test_fenced_fallback() {
        let raw = "I will add a function.\n```python\ndef f():\n    return 2\n```";
        let out = parse_generation(raw, BundleLimits::default()).unwrap();
        assert_eq!(out.plan, "I will add a function.");
        assert_eq!(out.bundle.files[0].file_path, "generated_1.py");
    }

    #[test]
    fn test_oversized_file_is_flagged() {
        let body = "x = 1\n".repeat(100);
        let raw = serde_json::json!({"plan": "", "files": [{"file_path": "big.py", "content": body}]})
            .to_string();
        let limits = BundleLimits {
            max_file_chars: 50,
            max_total_chars: 100,
        };
        let out = parse_generation(&raw, limits).unwrap();
        assert!(out.bundle.truncated);
        assert!(out.bundle.files[0].truncated);
    }

    #[tokio::test]
    async fn test_prose_only_is_malformed() {
        let caller = Arc::new(ScriptedModelCaller::new());
        caller.respond_when(prompts::TASK_GENERATE, "Sorry, I can't help with that.");
        let agents = crate::agents::test_agents(caller);
        let err = agents
            .generate("add x", &[], &RetrievedContext::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::MalformedOutput { .. }));
    }
}
