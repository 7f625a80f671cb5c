//! Controller: reconciles the two reviews into one verdict.
//!
//! The score and band are computed here, deterministically. The controller
//! model is consulted only for the merge band, to write the merged code.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agents::{bundle_from_wire, Agents, WireFile};
use crate::capabilities::CallOptions;
use crate::config::EvaluatorConfig;
use crate::domain::bundle::CodeBundle;
use crate::domain::review::{ControllerDecision, ControllerVerdict, Review};
use crate::error::Result;
use crate::json_repair::parse_lenient;
use crate::prompts;

const CONTROLLER_MAX_TOKENS: u32 = 4_096;

#[derive(Debug, Deserialize)]
struct WireMerge {
    #[serde(default)]
    reasoning: String,
    #[serde(default, alias = "files")]
    final_code: Vec<WireFile>,
}

/// Combined score in `[1, 10]`.
///
/// Two parsed (or two heuristic) reviews average. When exactly one review
/// is heuristic, it only nudges the parsed score by its own offset from the
/// heuristic base.
pub fn final_score(critic: &Review, defender: &Review, config: &EvaluatorConfig) -> f32 {
    let score = match (critic.heuristic, defender.heuristic) {
        (true, false) => defender.score + (critic.score - config.heuristic_base),
        (false, true) => critic.score + (defender.score - config.heuristic_base),
        _ => (critic.score + defender.score) / 2.0,
    };
    score.clamp(1.0, 10.0)
}

/// Agreement between reviewers, halved for each heuristic review.
pub fn confidence(critic: &Review, defender: &Review) -> f32 {
    let mut c = 1.0 - (critic.score - defender.score).abs() / 10.0;
    for review in [critic, defender] {
        if review.heuristic {
            c *= 0.5;
        }
    }
    c.clamp(0.0, 1.0)
}

pub fn band(score: f32, config: &EvaluatorConfig) -> ControllerVerdict {
    if score >= config.accept_threshold {
        ControllerVerdict::AcceptOriginal
    } else if score >= config.revise_threshold {
        ControllerVerdict::MergeFeedback
    } else {
        ControllerVerdict::RequestRevision
    }
}

fn summary(critic: &Review, defender: &Review) -> String {
    format!(
        "critic {:.1}{} / defender {:.1}{}",
        critic.score,
        if critic.heuristic { " (heuristic)" } else { "" },
        defender.score,
        if defender.heuristic { " (heuristic)" } else { "" },
    )
}

impl Agents {
    /// Reconcile both reviews. Fails only on cancellation.
    pub(crate) async fn control(
        &self,
        request: &str,
        original: &CodeBundle,
        critic: &Review,
        defender: &Review,
        cancel: &CancellationToken,
    ) -> Result<ControllerDecision> {
        let cfg = &self.config.evaluator;
        let score = final_score(critic, defender, cfg);
        let confidence = confidence(critic, defender);
        let scores = summary(critic, defender);

        let accept = |reasoning: String| ControllerDecision {
            decision: ControllerVerdict::AcceptOriginal,
            final_score: score,
            confidence,
            reasoning,
            final_code: original.clone(),
        };

        match band(score, cfg) {
            ControllerVerdict::AcceptOriginal => Ok(accept(format!(
                "{scores}: score {score:.1} meets the acceptance threshold"
            ))),
            ControllerVerdict::RequestRevision => Ok(ControllerDecision {
                decision: ControllerVerdict::RequestRevision,
                final_score: score,
                confidence,
                reasoning: format!("{scores}: score {score:.1} is below the revision threshold"),
                final_code: original.clone(),
            }),
            ControllerVerdict::MergeFeedback => {
                let reply = self
                    .gateway
                    .call(
                        &self.config.providers.controller,
                        &prompts::controller(request, original, critic, defender),
                        CallOptions::json(CONTROLLER_MAX_TOKENS, self.config.timeouts.controller_ms),
                        cancel,
                    )
                    .await;
                let raw = match reply {
                    Ok(raw) => raw,
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        warn!(error = %e, "controller call failed; keeping original");
                        return Ok(accept(format!(
                            "{scores}: controller unavailable ({e}); original kept"
                        )));
                    }
                };
                Ok(self.merge(raw, score, confidence, &scores, original, critic, defender, accept))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn merge(
        &self,
        raw: String,
        score: f32,
        confidence: f32,
        scores: &str,
        original: &CodeBundle,
        critic: &Review,
        defender: &Review,
        accept: impl Fn(String) -> ControllerDecision,
    ) -> ControllerDecision {
        let cfg = &self.config.evaluator;
        let min_chars = cfg.min_merged_code_chars;
        let (reasoning, merged) = match parse_lenient::<WireMerge>(&raw) {
            Ok(wire) => (
                wire.reasoning,
                bundle_from_wire(wire.final_code, self.config.bundle),
            ),
            Err(e) => {
                debug!(error = %e, "controller output unparseable");
                (String::new(), CodeBundle::default())
            }
        };
        if merged.is_code_shaped(min_chars) {
            return ControllerDecision {
                decision: ControllerVerdict::MergeFeedback,
                final_score: score,
                confidence,
                reasoning: format!("{scores}: merged reviewer feedback. {}", reasoning.trim()),
                final_code: merged,
            };
        }

        // Prefer the higher-scoring reviewer's rewrite.
        let mut reviewers = [critic, defender];
        reviewers.sort_by(|a, b| b.score.total_cmp(&a.score));
        let fallback = reviewers.iter().find_map(|r| {
            r.improved_code
                .as_ref()
                .filter(|c| c.is_code_shaped(min_chars))
                .map(|c| (r.reviewer_id, c.clone()))
        });
        match fallback {
            Some((reviewer, code)) => ControllerDecision {
                decision: ControllerVerdict::MergeFeedback,
                final_score: score,
                confidence,
                reasoning: format!(
                    "{scores}: merged code failed validation; using the {reviewer}'s improved code"
                ),
                final_code: code,
            },
            None => accept(format!(
                "{scores}: merged code failed validation and no reviewer code was usable; original kept"
            )),
        }
    }
}
