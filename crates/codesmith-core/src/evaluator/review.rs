//! Reviewer output parsing and the keyword-sentiment fallback.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::agents::{bundle_from_wire, WireFile};
use crate::config::EvaluatorConfig;
use crate::domain::bundle::BundleLimits;
use crate::domain::review::{Review, ReviewVerdict, ReviewerId};
use crate::json_repair::parse_lenient;

/// Whole-word sentiment markers; "incorrect" never counts as "correct".
const POSITIVE_MARKERS: &str =
    r"\b(?:looks good|lgtm|correct|well[ -]structured|clean|readable|solid|handles edge cases|approve[sd]?)\b";

const NEGATIVE_MARKERS: &str =
    r"\b(?:bugs?|buggy|incorrect|wrong|broken|fail(?:s|ed|ing|ure|ures)?|missing|crash\w*|vulnerab\w*|unsafe|reject\w*)\b";

fn markers() -> Option<&'static (Regex, Regex)> {
    static COMPILED: OnceLock<Option<(Regex, Regex)>> = OnceLock::new();
    COMPILED
        .get_or_init(|| Some((Regex::new(POSITIVE_MARKERS).ok()?, Regex::new(NEGATIVE_MARKERS).ok()?)))
        .as_ref()
}

#[derive(Debug, Deserialize)]
struct WireReview {
    score: Option<Value>,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    verdict: Option<String>,
    #[serde(default)]
    improved_code: Option<Vec<WireFile>>,
}

/// Accept `7`, `7.5`, `"7"`, or `"7/10"`.
fn score_value(value: &Value) -> Option<f32> {
    let score = match value {
        Value::Number(n) => n.as_f64().map(|f| f as f32),
        Value::String(s) => s
            .split('/')
            .next()
            .and_then(|head| head.trim().parse::<f32>().ok()),
        _ => None,
    };
    score.filter(|s| s.is_finite())
}

/// Parse a reviewer's JSON reply. `None` when no usable score is present.
pub fn parse_review(
    reviewer: ReviewerId,
    raw: &str,
    config: &EvaluatorConfig,
    limits: BundleLimits,
) -> Option<Review> {
    let wire: WireReview = parse_lenient(raw).ok()?;
    let score = wire.score.as_ref().and_then(score_value)?.clamp(0.0, 10.0);
    let verdict = wire
        .verdict
        .as_deref()
        .and_then(ReviewVerdict::parse)
        .unwrap_or_else(|| {
            ReviewVerdict::from_score(score, config.accept_threshold, config.revise_threshold)
        });
    let improved_code = wire
        .improved_code
        .map(|files| bundle_from_wire(files, limits))
        .filter(|b| !b.is_empty());
    Some(Review {
        reviewer_id: reviewer,
        score,
        issues: wire.issues,
        suggestions: wire.suggestions,
        verdict,
        improved_code,
        heuristic: false,
    })
}

/// Score unparseable reviewer text by counting sentiment markers.
///
/// Starts at `heuristic_base`, moves `heuristic_step` per marker, bounded by
/// `heuristic_max_adjustment` either way, clamped to `[1, 10]`.
pub fn heuristic_review(reviewer: ReviewerId, raw: &str, config: &EvaluatorConfig) -> Review {
    let text = raw.to_lowercase();
    let (positive, negative) = markers()
        .map(|(pos, neg)| (pos.find_iter(&text).count(), neg.find_iter(&text).count()))
        .unwrap_or_default();
    let adjustment = ((positive as f32 - negative as f32) * config.heuristic_step)
        .clamp(-config.heuristic_max_adjustment, config.heuristic_max_adjustment);
    let score = (config.heuristic_base + adjustment).clamp(1.0, 10.0);
    Review {
        reviewer_id: reviewer,
        score,
        issues: Vec::new(),
        suggestions: Vec::new(),
        verdict: ReviewVerdict::from_score(score, config.accept_threshold, config.revise_threshold),
        improved_code: None,
        heuristic: true,
    }
}
