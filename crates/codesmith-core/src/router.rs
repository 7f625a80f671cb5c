//! Tiered agent routing.
//!
//! Safety filter first, then a fast model, then a larger model, then a
//! keyword heuristic that always produces a decision. Each tier runs only
//! when the previous one produced nothing usable.

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::capabilities::{CallOptions, ProviderId};
use crate::config::RouterConfig;
use crate::domain::routing::{AgentAction, AgentKind, RoutingDecision, RoutingTier};
use crate::guard::ModelGateway;
use crate::json_repair::parse_lenient;
use crate::prompts;
use crate::safety::{SafetyFilter, SafetyVerdict};

const ROUTE_MAX_TOKENS: u32 = 256;

const GENERATE_WORDS: &[&str] = &[
    "write", "implement", "implementing", "create", "add", "adding", "generate", "build",
    "refactor", "rewrite", "modify", "change", "update", "fix", "convert", "port", "optimize",
];
const TEST_WORDS: &[&str] = &[
    "test", "tests", "testing", "pytest", "unittest", "coverage", "assert", "assertions",
];
const EXPLAIN_WORDS: &[&str] = &[
    "what", "how", "why", "where", "which", "explain", "describe", "does", "understand",
    "overview", "summarize",
];

#[derive(Debug, Deserialize)]
struct ModelDecision {
    primary_action: String,
    #[serde(default)]
    secondary_actions: Vec<String>,
    #[serde(default)]
    parallel_agents: Vec<String>,
    confidence: Option<f32>,
    #[serde(default)]
    reasoning: String,
}

/// The router. Cheap to share; holds no per-query state.
pub struct AgentRouter {
    gateway: Arc<ModelGateway>,
    safety: SafetyFilter,
    fast: ProviderId,
    large: ProviderId,
    config: RouterConfig,
    timeout_ms: u64,
}

impl AgentRouter {
    pub fn new(
        gateway: Arc<ModelGateway>,
        safety: SafetyFilter,
        fast: ProviderId,
        large: ProviderId,
        config: RouterConfig,
        timeout_ms: u64,
    ) -> Self {
        Self {
            gateway,
            safety,
            fast,
            large,
            config,
            timeout_ms,
        }
    }

    /// Route `query`. Never fails.
    #[instrument(skip(self, query, context_hint, cancel))]
    pub async fn route(
        &self,
        query: &str,
        context_hint: &str,
        cancel: &CancellationToken,
    ) -> RoutingDecision {
        if let SafetyVerdict::Unsafe { category, matched } = self.safety.classify(query) {
            return RoutingDecision::refuse(format!(
                "request matched the {category} safety rule ({matched:?})"
            ));
        }

        let prompt = prompts::route(query, context_hint);
        for (provider, tier) in [
            (&self.fast, RoutingTier::FastModel),
            (&self.large, RoutingTier::LargeModel),
        ] {
            match self.model_tier(provider, &prompt, tier, cancel).await {
                Ok(decision) => return decision,
                Err(reason) => debug!(tier = ?tier, provider = %provider, %reason, "routing tier fell through"),
            }
        }

        heuristic_route(query, &self.config)
    }

    async fn model_tier(
        &self,
        provider: &ProviderId,
        prompt: &str,
        tier: RoutingTier,
        cancel: &CancellationToken,
    ) -> Result<RoutingDecision, String> {
        let raw = self
            .gateway
            .call(
                provider,
                prompt,
                CallOptions::json(ROUTE_MAX_TOKENS, self.timeout_ms),
                cancel,
            )
            .await
            .map_err(|e| e.to_string())?;
        let parsed: ModelDecision = parse_lenient(&raw)?;
        self.validate(parsed, tier)
    }

    fn validate(&self, parsed: ModelDecision, tier: RoutingTier) -> Result<RoutingDecision, String> {
        let primary = AgentAction::parse(&parsed.primary_action)
            .ok_or_else(|| format!("unknown action {:?}", parsed.primary_action))?;
        if primary == AgentAction::Refuse {
            return Err("model may not refuse; only the safety filter does".into());
        }
        let confidence = parsed
            .confidence
            .filter(|c| c.is_finite())
            .ok_or("missing confidence")?;
        if confidence < self.config.min_model_confidence {
            return Err(format!(
                "confidence {confidence} below {}",
                self.config.min_model_confidence
            ));
        }
        let secondary = parsed
            .secondary_actions
            .iter()
            .filter_map(|s| AgentAction::parse(s));
        let parallel = parsed
            .parallel_agents
            .iter()
            .filter_map(|s| AgentKind::parse(s));
        Ok(RoutingDecision::new(
            primary,
            secondary,
            parallel,
            confidence,
            parsed.reasoning,
            tier,
        ))
    }
}

fn words(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn any_of(words: &[String], set: &[&str]) -> bool {
    words.iter().any(|w| set.contains(&w.as_str()))
}

/// Deterministic keyword routing. Total and pure.
pub fn heuristic_route(query: &str, config: &RouterConfig) -> RoutingDecision {
    let words = words(query);
    let wants_generate = any_of(&words, GENERATE_WORDS);
    let wants_test = any_of(&words, TEST_WORDS);
    let wants_explain = any_of(&words, EXPLAIN_WORDS);

    let (primary, confidence, reasoning) = if wants_generate {
        (
            AgentAction::Generate,
            config.heuristic_confidence,
            "generation keywords matched",
        )
    } else if wants_test {
        (
            AgentAction::Test,
            config.heuristic_confidence,
            "test keywords matched",
        )
    } else if wants_explain {
        (
            AgentAction::Explain,
            config.heuristic_confidence,
            "question keywords matched",
        )
    } else if words.len() > config.decompose_word_threshold {
        (
            AgentAction::Decompose,
            config.default_confidence,
            "long request without a clear action",
        )
    } else {
        (
            AgentAction::Explain,
            config.default_confidence,
            "no routing signal; defaulting to explain",
        )
    };

    let secondary = (primary != AgentAction::Explain && words.iter().any(|w| w == "explain"))
        .then_some(AgentAction::Explain);

    RoutingDecision::new(
        primary,
        secondary,
        [],
        confidence,
        format!("heuristic: {reasoning}"),
        RoutingTier::Heuristic,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::ModelError;
    use crate::config::BreakerConfig;
    use crate::fakes::ScriptedModelCaller;

    fn router(caller: Arc<ScriptedModelCaller>) -> AgentRouter {
        AgentRouter::new(
            Arc::new(ModelGateway::new(caller, BreakerConfig::default())),
            SafetyFilter::default(),
            ProviderId::new("fast"),
            ProviderId::new("large"),
            RouterConfig::default(),
            1_000,
        )
    }

    #[test]
    fn test_heuristic_tie_break_prefers_generation() {
        let cfg = RouterConfig::default();
        let d = heuristic_route("write tests for the parser", &cfg);
        assert_eq!(d.primary_action, AgentAction::Generate);
        let d = heuristic_route("pytest coverage for utils", &cfg);
        assert_eq!(d.primary_action, AgentAction::Test);
    }

    #[test]
    fn test_heuristic_long_query_decomposes() {
        let cfg = RouterConfig {
            decompose_word_threshold: 5,
            ..RouterConfig::default()
        };
        let d = heuristic_route("migrate billing module then audit all invoices nightly", &cfg);
        assert_eq!(d.primary_action, AgentAction::Decompose);
        let d = heuristic_route("login flow", &cfg);
        assert_eq!(d.primary_action, AgentAction::Explain);
        assert_eq!(d.confidence, cfg.default_confidence);
    }

    #[test]
    fn test_heuristic_secondary_explain() {
        let d = heuristic_route("explain the cache and then refactor it", &RouterConfig::default());
        assert_eq!(d.primary_action, AgentAction::Generate);
        assert!(d.secondary_actions.contains(&AgentAction::Explain));
    }

    #[tokio::test]
    async fn test_fast_tier_used_when_valid() {
        let caller = Arc::new(ScriptedModelCaller::new());
        caller.push_reply(
            &ProviderId::new("fast"),
            r#"{"primary_action":"GENERATE","confidence":0.9,"reasoning":"asks for code"}"#,
        );
        let d = router(caller.clone())
            .route("add retry to the client", "repo", &CancellationToken::new())
            .await;
        assert_eq!(d.primary_action, AgentAction::Generate);
        assert_eq!(d.tier, RoutingTier::FastModel);
        assert_eq!(caller.call_count(), 1);
    }

    #[tokio::test]
    async fn test_low_confidence_and_refuse_fall_through() {
        let caller = Arc::new(ScriptedModelCaller::new());
        caller.push_reply(
            &ProviderId::new("fast"),
            r#"{"primary_action":"EXPLAIN","confidence":0.2}"#,
        );
        caller.push_reply(
            &ProviderId::new("large"),
            r#"{"primary_action":"REFUSE","confidence":0.99}"#,
        );
        let d = router(caller.clone())
            .route("what does parse_args do", "repo", &CancellationToken::new())
            .await;
        assert_eq!(d.tier, RoutingTier::Heuristic);
        assert_eq!(d.primary_action, AgentAction::Explain);
        assert_eq!(caller.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unsafe_query_makes_no_model_calls() {
        let caller = Arc::new(ScriptedModelCaller::new());
        let d = router(caller.clone())
            .route(
                "drop the users table and delete all backups",
                "repo",
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(d.primary_action, AgentAction::Refuse);
        assert_eq!(d.confidence, 1.0);
        assert_eq!(d.tier, RoutingTier::Safety);
        assert_eq!(caller.call_count(), 0);
    }

    #[tokio::test]
    async fn test_all_tiers_failing_is_idempotent() {
        let caller = Arc::new(ScriptedModelCaller::new());
        caller.fail_when(prompts::TASK_ROUTE, ModelError::Timeout);
        let r = router(caller);
        let cancel = CancellationToken::new();
        let first = r.route("how is the session cached", "repo", &cancel).await;
        for _ in 0..3 {
            assert_eq!(r.route("how is the session cached", "repo", &cancel).await, first);
        }
        assert_eq!(first.primary_action, AgentAction::Explain);
    }
}
