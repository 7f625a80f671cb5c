//! Response assembly: folds whatever the scheduler produced into one
//! [`OrchestrationResponse`].

use std::collections::BTreeSet;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::response::{AgentOutcome, Citation, OrchestrationResponse};
use crate::domain::review::ControllerVerdict;
use crate::domain::routing::{AgentAction, AgentKind, RoutingDecision};
use crate::scheduler::PhaseResults;

/// Build the response for `decision` from `results`.
pub fn assemble(
    request_id: Uuid,
    decision: RoutingDecision,
    results: PhaseResults,
) -> OrchestrationResponse {
    let agents_used = decision.active_agents();
    let agents_skipped: Vec<AgentKind> = if decision.primary_action == AgentAction::Refuse {
        AgentKind::ALL.to_vec()
    } else {
        decision.skip_agents.iter().copied().collect()
    };
    let degraded = results.degraded();
    let answer = compose_answer(&decision, &results);
    let citations = collect_citations(&results);

    OrchestrationResponse {
        request_id,
        routing: decision,
        agents_used,
        agents_skipped,
        answer,
        generate: results.generate,
        test: results.test,
        evaluation: results.evaluation,
        impact: results.impact,
        decomposition: results.decomposition,
        citations,
        degraded,
        cached: false,
        generated_at: Utc::now(),
    }
}

/// Explain answer first, then the generation plan and verdict, then the
/// decomposition. A refusal answers with the safety reason only.
fn compose_answer(decision: &RoutingDecision, results: &PhaseResults) -> String {
    if decision.primary_action == AgentAction::Refuse {
        return format!("This request was declined: {}.", decision.reasoning);
    }

    let mut sections: Vec<String> = Vec::new();
    if let Some(explain) = results.explain.as_ref().and_then(AgentOutcome::completed) {
        sections.push(explain.answer.clone());
    }
    if let Some(generated) = results.generate.as_ref().and_then(AgentOutcome::completed) {
        let files = generated.bundle.paths().join(", ");
        let mut text = if generated.plan.is_empty() {
            format!("Generated {files}.")
        } else {
            format!("{}\n\nGenerated {files}.", generated.plan)
        };
        if let Some(evaluation) = results.evaluation.as_ref().and_then(AgentOutcome::completed) {
            let c = &evaluation.controller;
            let note = match c.decision {
                ControllerVerdict::AcceptOriginal => "accepted as written",
                ControllerVerdict::MergeFeedback => "revised with reviewer feedback",
                ControllerVerdict::RequestRevision => "needs revision before use",
            };
            text.push_str(&format!(" Review score {:.1}/10: {note}.", c.final_score));
        }
        sections.push(text);
    }
    if let Some(decomposition) = results
        .decomposition
        .as_ref()
        .and_then(AgentOutcome::completed)
    {
        let mut text = decomposition.summary.clone();
        for (i, step) in decomposition.subtasks.iter().enumerate() {
            text.push_str(&format!("\n{}. {step}", i + 1));
        }
        sections.push(text);
    }
    if sections.is_empty() && decision.primary_action == AgentAction::Test {
        if let Some(tests) = results.test.as_ref().and_then(AgentOutcome::completed) {
            sections.push(format!("Generated tests:\n\n{}", tests.tests));
        }
    }

    if sections.is_empty() {
        "No agent produced an answer for this request; see `degraded` for details.".to_string()
    } else {
        sections.join("\n\n")
    }
}

fn collect_citations(results: &PhaseResults) -> Option<Vec<Citation>> {
    let cited = match results.explain.as_ref().and_then(AgentOutcome::completed) {
        Some(explain) => explain.citations.clone(),
        None => results.context.citations.clone(),
    };
    let mut seen = BTreeSet::new();
    let unique: Vec<Citation> = cited
        .into_iter()
        .filter(|c| seen.insert((c.file_path.clone(), c.line_range)))
        .collect();
    (!unique.is_empty()).then_some(unique)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::LineRange;
    use crate::domain::bundle::{CodeBundle, GenerationOutput};
    use crate::domain::response::{Decomposition, ExplainOutput};
    use crate::domain::routing::RoutingTier;

    fn decision(primary: AgentAction) -> RoutingDecision {
        RoutingDecision::new(primary, [], [], 0.9, "r", RoutingTier::FastModel)
    }

    #[test]
    fn test_refusal_skips_everything() {
        let response = assemble(
            Uuid::new_v4(),
            RoutingDecision::refuse("matched destructive database rule"),
            PhaseResults::default(),
        );
        assert!(response.agents_used.is_empty());
        assert_eq!(response.agents_skipped.len(), AgentKind::ALL.len());
        assert!(response.answer.contains("destructive database"));
        assert!(response.degraded.is_empty());
        assert!(response.citations.is_none());
    }

    #[test]
    fn test_explain_and_generate_answers_are_joined() {
        let cite = Citation {
            file_path: "auth.py".into(),
            line_range: LineRange::new(1, 9),
        };
        let results = PhaseResults {
            explain: Some(AgentOutcome::Completed(ExplainOutput {
                answer: "login checks the password".into(),
                citations: vec![cite.clone(), cite.clone()],
            })),
            generate: Some(AgentOutcome::Completed(GenerationOutput {
                plan: "add mfa".into(),
                bundle: CodeBundle::single("auth.py", "def login(): pass"),
            })),
            test: Some(AgentOutcome::unavailable("timed out")),
            ..PhaseResults::default()
        };
        let d = RoutingDecision::new(
            AgentAction::Generate,
            [AgentAction::Explain],
            [],
            0.9,
            "r",
            RoutingTier::FastModel,
        );
        let response = assemble(Uuid::new_v4(), d, results);
        assert!(response.answer.starts_with("login checks the password"));
        assert!(response.answer.contains("Generated auth.py."));
        assert_eq!(response.citations, Some(vec![cite]));
        assert_eq!(response.degraded, vec![AgentKind::Test]);
        assert!(!response.cached);
    }

    #[test]
    fn test_decomposition_is_numbered() {
        let results = PhaseResults {
            decomposition: Some(AgentOutcome::Completed(Decomposition {
                subtasks: vec!["migrate schema".into(), "backfill".into()],
                summary: "Two steps.".into(),
            })),
            ..PhaseResults::default()
        };
        let response = assemble(Uuid::new_v4(), decision(AgentAction::Decompose), results);
        assert_eq!(response.answer, "Two steps.\n1. migrate schema\n2. backfill");
    }

    #[test]
    fn test_nothing_completed_still_answers() {
        let results = PhaseResults {
            explain: Some(AgentOutcome::unavailable("cancelled")),
            ..PhaseResults::default()
        };
        let response = assemble(Uuid::new_v4(), decision(AgentAction::Explain), results);
        assert!(response.answer.contains("No agent produced an answer"));
        assert_eq!(response.degraded, vec![AgentKind::Explain]);
    }
}
