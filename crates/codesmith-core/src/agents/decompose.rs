//! Decompose agent: splits a large request into ordered sub-tasks.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::Agents;
use crate::capabilities::CallOptions;
use crate::context::RetrievedContext;
use crate::domain::response::Decomposition;
use crate::error::Result;
use crate::json_repair::parse_lenient;
use crate::prompts;

const DECOMPOSE_MAX_TOKENS: u32 = 768;
const MAX_SUBTASKS: usize = 8;

#[derive(Debug, Deserialize)]
struct WireDecomposition {
    #[serde(default)]
    subtasks: Vec<String>,
    #[serde(default)]
    summary: String,
}

impl Agents {
    /// Model split with a deterministic fallback. Fails only on cancellation.
    #[instrument(skip_all)]
    pub async fn decompose(
        &self,
        query: &str,
        context: &RetrievedContext,
        cancel: &CancellationToken,
    ) -> Result<Decomposition> {
        let cfg = &self.config;
        let reply = self
            .gateway
            .call(
                &cfg.providers.decompose,
                &prompts::decompose(query, &context.render()),
                CallOptions::json(DECOMPOSE_MAX_TOKENS, cfg.timeouts.decompose_ms),
                cancel,
            )
            .await;
        let raw = match reply {
            Ok(raw) => raw,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                debug!(error = %e, "decompose call failed; splitting deterministically");
                return Ok(split_request(query));
            }
        };
        match parse_lenient::<WireDecomposition>(&raw) {
            Ok(wire) => {
                let subtasks: Vec<String> = wire
                    .subtasks
                    .into_iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .take(MAX_SUBTASKS)
                    .collect();
                if subtasks.is_empty() {
                    return Ok(split_request(query));
                }
                let summary = if wire.summary.trim().is_empty() {
                    summarize(&subtasks)
                } else {
                    wire.summary.trim().to_string()
                };
                Ok(Decomposition { subtasks, summary })
            }
            Err(_) => Ok(split_request(query)),
        }
    }
}

/// Split on sentence ends, semicolons, and sequencing conjunctions.
pub fn split_request(query: &str) -> Decomposition {
    let mut normalized = query.replace(&['\n', ';'][..], ". ");
    for joiner in [", and then ", " and then ", ", then ", " then ", " after that ", " finally "] {
        normalized = normalized.replace(joiner, ". ");
    }
    let mut subtasks: Vec<String> = normalized
        .split(&['.', '!', '?'][..])
        .map(|s| s.trim().trim_start_matches("and ").trim())
        .filter(|s| s.split_whitespace().count() >= 2)
        .map(|s| s.to_string())
        .take(MAX_SUBTASKS)
        .collect();
    if subtasks.is_empty() {
        subtasks.push(query.trim().to_string());
    }
    let summary = summarize(&subtasks);
    Decomposition { subtasks, summary }
}

fn summarize(subtasks: &[String]) -> String {
    let mut out = format!("The request breaks down into {} step(s):", subtasks.len());
    for (i, task) in subtasks.iter().enumerate() {
        out.push_str(&format!("\n{}. {}", i + 1, task));
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::capabilities::ModelError;
    use crate::fakes::ScriptedModelCaller;

    #[test]
    fn test_split_on_conjunctions_and_sentences() {
        let d = split_request(
            "Add a cache layer to the client, then update the config loader. Finally document both.",
        );
        assert_eq!(
            d.subtasks,
            vec![
                "Add a cache layer to the client".to_string(),
                "update the config loader".to_string(),
                "Finally document both".to_string(),
            ]
        );
        assert!(d.summary.contains("3 step(s)"));
    }

    #[test]
    fn test_split_never_empty() {
        assert_eq!(split_request("refactor").subtasks, vec!["refactor".to_string()]);
    }

    #[tokio::test]
    async fn test_model_failure_uses_splitter() {
        let caller = Arc::new(ScriptedModelCaller::new());
        caller.fail_when(prompts::TASK_DECOMPOSE, ModelError::Timeout);
        let agents = crate::agents::test_agents(caller);
        let d = agents
            .decompose(
                "migrate the schema; backfill the data",
                &RetrievedContext::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(d.subtasks.len(), 2);
    }

    #[tokio::test]
    async fn test_model_subtasks_used() {
        let caller = Arc::new(ScriptedModelCaller::new());
        caller.respond_when(
            prompts::TASK_DECOMPOSE,
            r#"{"subtasks":["design schema","write migration"],"summary":"two steps"}"#,
        );
        let agents = crate::agents::test_agents(caller);
        let d = agents
            .decompose("x", &RetrievedContext::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(d.subtasks, vec!["design schema".to_string(), "write migration".to_string()]);
        assert_eq!(d.summary, "two steps");
    }
}
