//! Review and controller vocabulary for the adversarial evaluation protocol.

use serde::{Deserialize, Serialize};

use super::bundle::CodeBundle;

/// The two independent reviewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerId {
    Critic,
    Defender,
}

impl std::fmt::Display for ReviewerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewerId::Critic => write!(f, "critic"),
            ReviewerId::Defender => write!(f, "defender"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewVerdict {
    Approve,
    NeedsChanges,
    Reject,
}

impl ReviewVerdict {
    pub fn parse(label: &str) -> Option<Self> {
        let norm = label.trim().to_ascii_uppercase().replace(|c: char| c == ' ' || c == '-', "_");
        match norm.as_str() {
            "APPROVE" | "APPROVED" | "ACCEPT" => Some(Self::Approve),
            "NEEDS_CHANGES" | "CHANGES_REQUESTED" | "REVISE" => Some(Self::NeedsChanges),
            "REJECT" | "REJECTED" => Some(Self::Reject),
            _ => None,
        }
    }

    /// Verdict implied by a bare score when the reviewer gave none.
    pub fn from_score(score: f32, accept_at: f32, revise_at: f32) -> Self {
        if score >= accept_at {
            Self::Approve
        } else if score >= revise_at {
            Self::NeedsChanges
        } else {
            Self::Reject
        }
    }
}

/// One reviewer's assessment of a code bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub reviewer_id: ReviewerId,
    /// Always within `[0, 10]`.
    pub score: f32,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub verdict: ReviewVerdict,
    pub improved_code: Option<CodeBundle>,
    /// Scored by the keyword fallback rather than parsed from the model.
    #[serde(default)]
    pub heuristic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerVerdict {
    AcceptOriginal,
    MergeFeedback,
    RequestRevision,
}

impl std::fmt::Display for ControllerVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AcceptOriginal => "ACCEPT_ORIGINAL",
            Self::MergeFeedback => "MERGE_FEEDBACK",
            Self::RequestRevision => "REQUEST_REVISION",
        };
        write!(f, "{s}")
    }
}

/// The controller's reconciliation of both reviews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerDecision {
    pub decision: ControllerVerdict,
    pub final_score: f32,
    pub confidence: f32,
    pub reasoning: String,
    pub final_code: CodeBundle,
}

/// Body of an evaluation: both reviews plus the controller's call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub critic: Review,
    pub defender: Review,
    pub controller: ControllerDecision,
}
