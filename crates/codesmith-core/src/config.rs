//! Orchestrator configuration.
//!
//! Every tuning knob of the pipeline (routing confidence floor, review score
//! bands, rerank weights, timeouts, size limits) lives here rather than in the
//! agents. All sections are `#[serde(default)]`, so a TOML file only has to
//! name what it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::capabilities::ProviderId;
use crate::domain::bundle::BundleLimits;
use crate::error::{OrchestratorError, Result};

/// Which provider identity each agent talks to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Tier-1 router model (small, low latency).
    pub router_fast: ProviderId,
    /// Tier-2 router model.
    pub router_large: ProviderId,
    pub explain: ProviderId,
    pub generate: ProviderId,
    pub test: ProviderId,
    /// Critic and defender must differ to avoid correlated bias.
    pub critic: ProviderId,
    pub defender: ProviderId,
    pub controller: ProviderId,
    pub fixer: ProviderId,
    pub impact: ProviderId,
    pub decompose: ProviderId,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            router_fast: ProviderId::new("fast"),
            router_large: ProviderId::new("large"),
            explain: ProviderId::new("large"),
            generate: ProviderId::new("large"),
            test: ProviderId::new("fast"),
            critic: ProviderId::new("critic"),
            defender: ProviderId::new("defender"),
            controller: ProviderId::new("large"),
            fixer: ProviderId::new("large"),
            impact: ProviderId::new("fast"),
            decompose: ProviderId::new("fast"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Model decisions below this confidence fall through to the next tier.
    pub min_model_confidence: f32,
    /// Queries longer than this (in words) with no other signal decompose.
    pub decompose_word_threshold: usize,
    /// Confidence reported by the keyword heuristic when a keyword matched.
    pub heuristic_confidence: f32,
    /// Confidence reported when the heuristic fell back to its default.
    pub default_confidence: f32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_model_confidence: 0.5,
            decompose_word_threshold: 40,
            heuristic_confidence: 0.6,
            default_confidence: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// `final_score >= accept_threshold` keeps the original code.
    pub accept_threshold: f32,
    /// `final_score < revise_threshold` requests a revision.
    pub revise_threshold: f32,
    /// Minimum length of a merged bundle for it to count as code.
    pub min_merged_code_chars: usize,
    /// Starting score of the keyword heuristic.
    pub heuristic_base: f32,
    /// Score change per sentiment marker.
    pub heuristic_step: f32,
    /// Cap on the total heuristic adjustment in either direction.
    pub heuristic_max_adjustment: f32,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 8.0,
            revise_threshold: 5.0,
            min_merged_code_chars: 40,
            heuristic_base: 6.0,
            heuristic_step: 0.5,
            heuristic_max_adjustment: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    pub max_iterations: u32,
    /// Upper bound on any caller-supplied `max_iterations`.
    pub iteration_cap: u32,
    pub sandbox_timeout_secs: u64,
    /// Failure lines kept in a digest.
    pub max_failures: usize,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: 4,
            iteration_cap: 10,
            sandbox_timeout_secs: 30,
            max_failures: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactConfig {
    pub max_files: usize,
    /// Excerpts requested per changed file.
    pub references_per_file: usize,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            max_files: 5,
            references_per_file: 8,
        }
    }
}

/// Per-agent wall-clock budgets in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub router_ms: u64,
    pub explain_ms: u64,
    pub generate_ms: u64,
    pub test_ms: u64,
    pub review_ms: u64,
    pub controller_ms: u64,
    pub fix_ms: u64,
    pub impact_ms: u64,
    pub decompose_ms: u64,
    pub retrieval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            router_ms: 4_000,
            explain_ms: 45_000,
            generate_ms: 90_000,
            test_ms: 45_000,
            review_ms: 45_000,
            controller_ms: 60_000,
            fix_ms: 60_000,
            impact_ms: 30_000,
            decompose_ms: 20_000,
            retrieval_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Excerpts requested per query.
    pub k: usize,
    pub lexical_weight: f32,
    pub semantic_weight: f32,
    /// Character budget for the packed context block.
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 12,
            lexical_weight: 0.7,
            semantic_weight: 0.3,
            max_context_chars: 16_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 256,
            ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepWarmConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub providers: Vec<ProviderId>,
}

impl Default for KeepWarmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 240,
            providers: vec![ProviderId::new("fast")],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Additional case-insensitive regexes; the built-in list always applies.
    pub extra_patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before a provider is skipped.
    pub failure_threshold: u32,
    /// How long an open breaker skips calls before letting one trial call through.
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 30,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub providers: ProviderConfig,
    pub router: RouterConfig,
    pub evaluator: EvaluatorConfig,
    pub refinement: RefinementConfig,
    pub impact: ImpactConfig,
    pub timeouts: TimeoutConfig,
    pub bundle: BundleLimits,
    pub retrieval: RetrievalConfig,
    pub cache: CacheConfig,
    pub keep_warm: KeepWarmConfig,
    pub safety: SafetyConfig,
    pub breaker: BreakerConfig,
}

impl OrchestratorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(text).map_err(|e| OrchestratorError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject configurations that would break pipeline invariants.
    pub fn validate(&self) -> Result<()> {
        let ev = &self.evaluator;
        if !(0.0..=10.0).contains(&ev.revise_threshold)
            || !(0.0..=10.0).contains(&ev.accept_threshold)
            || ev.revise_threshold > ev.accept_threshold
        {
            return Err(OrchestratorError::Config(format!(
                "evaluator thresholds must satisfy 0 <= revise ({}) <= accept ({}) <= 10",
                ev.revise_threshold, ev.accept_threshold
            )));
        }
        if ev.heuristic_max_adjustment < 0.0 || ev.heuristic_step < 0.0 {
            return Err(OrchestratorError::Config(
                "heuristic step and max adjustment must be non-negative".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.router.min_model_confidence) {
            return Err(OrchestratorError::Config(
                "router.min_model_confidence must be within [0, 1]".into(),
            ));
        }
        let rt = &self.retrieval;
        if rt.lexical_weight < 0.0 || rt.semantic_weight < 0.0 {
            return Err(OrchestratorError::Config(
                "rerank weights must be non-negative".into(),
            ));
        }
        if self.refinement.max_iterations == 0
            || self.refinement.max_iterations > self.refinement.iteration_cap
        {
            return Err(OrchestratorError::Config(format!(
                "refinement.max_iterations must be within 1..={}",
                self.refinement.iteration_cap
            )));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(OrchestratorError::Config(
                "breaker.failure_threshold must be positive".into(),
            ));
        }
        if self.refinement.sandbox_timeout_secs == 0 {
            return Err(OrchestratorError::Config(
                "refinement.sandbox_timeout_secs must be positive".into(),
            ));
        }
        if self.providers.critic == self.providers.defender {
            return Err(OrchestratorError::Config(
                "critic and defender must use different providers".into(),
            ));
        }
        Ok(())
    }

    /// Clamp a caller-supplied iteration count into the allowed range.
    pub fn effective_iterations(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.refinement.max_iterations)
            .clamp(1, self.refinement.iteration_cap.max(1))
    }
}
