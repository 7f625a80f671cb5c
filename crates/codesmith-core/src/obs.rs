//! Structured observability hooks for the query lifecycle.
//!
//! This module provides:
//! - A query-scoped tracing span via [`query_span`]
//! - Emission functions for lifecycle events: received, routed, agent
//!   finished, evaluation decided, refinement iteration, impact, finished
//!
//! Events are emitted at `info!` (degradations at `warn!`). Filtering and
//! JSON output are configured through [`crate::telemetry::init_tracing`].

use tracing::{info, warn};

use crate::domain::impact::RiskLevel;
use crate::domain::refinement::IterationAction;
use crate::domain::review::ControllerVerdict;
use crate::domain::routing::{AgentKind, RoutingDecision};

/// Span tagging every event of one query with its request and repository.
///
/// Attach it to the query future with `tracing::Instrument`:
///
/// ```ignore
/// run_query().instrument(query_span(&request_id, "repo-1")).await
/// ```
pub fn query_span(request_id: &str, repo_id: &str) -> tracing::Span {
    tracing::info_span!("codesmith.query", request_id = %request_id, repo_id = %repo_id)
}

pub fn emit_query_received(request_id: &str, repo_id: &str, question_chars: usize) {
    info!(
        event = "query.received",
        request_id = %request_id,
        repo_id = %repo_id,
        question_chars = question_chars,
    );
}

/// Emit event: routing decided, with the tier that produced the decision.
pub fn emit_query_routed(decision: &RoutingDecision) {
    info!(
        event = "query.routed",
        primary = %decision.primary_action,
        tier = ?decision.tier,
        confidence = decision.confidence,
        agents = decision.active_agents().len(),
    );
}

/// Emit event: one agent task ended. `failure` is set when it degraded.
pub fn emit_agent_finished(agent: AgentKind, elapsed_ms: u64, failure: Option<&str>) {
    match failure {
        None => info!(event = "agent.finished", agent = %agent, elapsed_ms = elapsed_ms),
        Some(reason) => warn!(
            event = "agent.unavailable",
            agent = %agent,
            elapsed_ms = elapsed_ms,
            reason = %reason,
        ),
    }
}

pub fn emit_evaluation_decided(decision: ControllerVerdict, final_score: f32, confidence: f32) {
    info!(
        event = "evaluation.decided",
        decision = ?decision,
        final_score = final_score,
        confidence = confidence,
    );
}

pub fn emit_refinement_iteration(
    index: u32,
    passed: bool,
    action: IterationAction,
    failures: usize,
) {
    info!(
        event = "refinement.iteration",
        index = index,
        passed = passed,
        action = ?action,
        failures = failures,
    );
}

pub fn emit_impact_assessed(changed: usize, affected: usize, risk: RiskLevel) {
    info!(
        event = "impact.assessed",
        changed = changed,
        affected = affected,
        risk = ?risk,
    );
}

/// Emit event: response assembled.
pub fn emit_query_finished(request_id: &str, duration_ms: u64, degraded: usize, cached: bool) {
    info!(
        event = "query.finished",
        request_id = %request_id,
        duration_ms = duration_ms,
        degraded = degraded,
        cached = cached,
    );
}
