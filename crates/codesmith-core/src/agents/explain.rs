//! Explain agent: answers a question from retrieved context.

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::Agents;
use crate::capabilities::CallOptions;
use crate::context::RetrievedContext;
use crate::domain::response::{ChatTurn, ExplainOutput};
use crate::error::{OrchestratorError, Result};
use crate::prompts;

const EXPLAIN_MAX_TOKENS: u32 = 1_500;

impl Agents {
    #[instrument(skip_all)]
    pub async fn explain(
        &self,
        query: &str,
        history: &[ChatTurn],
        context: &RetrievedContext,
        cancel: &CancellationToken,
    ) -> Result<ExplainOutput> {
        let cfg = &self.config;
        let answer = self
            .gateway
            .call(
                &cfg.providers.explain,
                &prompts::explain(query, history, &context.render()),
                CallOptions::text(EXPLAIN_MAX_TOKENS, cfg.timeouts.explain_ms),
                cancel,
            )
            .await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(OrchestratorError::malformed("explain", "empty answer"));
        }
        Ok(ExplainOutput {
            answer: answer.to_string(),
            citations: context.citations.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::context::build_context;
    use crate::fakes::{chunk, ScriptedModelCaller};
    use crate::guard::ModelGateway;

    #[tokio::test]
    async fn test_explain_cites_context() {
        let caller = Arc::new(ScriptedModelCaller::new());
        caller.respond_when(prompts::TASK_EXPLAIN, "  login() checks the password hash.  ");
        let config = Arc::new(OrchestratorConfig::default());
        let agents = Agents::new(
            Arc::new(ModelGateway::new(caller, config.breaker.clone())),
            config.clone(),
        );
        let ctx = build_context(
            "login",
            &[],
            vec![chunk("auth.py", 3, 20, "def login(u, p): ...", 0.8)],
            &config.retrieval,
        );

        let out = agents
            .explain("what does login do", &[], &ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.answer, "login() checks the password hash.");
        assert_eq!(out.citations.len(), 1);
        assert_eq!(out.citations[0].file_path, "auth.py");
    }

    #[tokio::test]
    async fn test_blank_answer_is_malformed() {
        let caller = Arc::new(ScriptedModelCaller::new());
        caller.set_fallback("   ");
        let agents = crate::agents::test_agents(caller);
        let err = agents
            .explain("q", &[], &RetrievedContext::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::MalformedOutput { .. }));
    }
}
