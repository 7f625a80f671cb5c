//! Request and response shapes of the orchestration pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bundle::GenerationOutput;
use super::impact::ImpactReport;
use super::review::EvaluationResult;
use super::routing::{AgentKind, RoutingDecision};
use crate::capabilities::LineRange;

/// One prior turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// A user query as accepted by the pipeline. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub repo_id: String,
    pub question: String,
    #[serde(default)]
    pub chat_history: Vec<ChatTurn>,
    #[serde(default)]
    pub context_file_hints: Vec<String>,
}

impl QueryRequest {
    pub fn new(repo_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            question: question.into(),
            chat_history: Vec::new(),
            context_file_hints: Vec::new(),
        }
    }
}

/// Result slot for one agent: either its output or an explicit marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentOutcome<T> {
    Completed(T),
    Unavailable { reason: String },
}

impl<T> AgentOutcome<T> {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            Self::Completed(v) => Some(v),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn into_completed(self) -> Option<T> {
        match self {
            Self::Completed(v) => Some(v),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Where an answer came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub file_path: String,
    pub line_range: LineRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainOutput {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Generated tests for a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutput {
    pub tests: String,
    /// Written against a bundle the controller later replaced.
    #[serde(default)]
    pub stale_against_final: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decomposition {
    pub subtasks: Vec<String>,
    pub summary: String,
}

/// The assembled answer to one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResponse {
    pub request_id: Uuid,
    pub routing: RoutingDecision,
    pub agents_used: Vec<AgentKind>,
    pub agents_skipped: Vec<AgentKind>,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate: Option<AgentOutcome<GenerationOutput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<AgentOutcome<TestOutput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<AgentOutcome<EvaluationResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<AgentOutcome<ImpactReport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decomposition: Option<AgentOutcome<Decomposition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    /// Agents that ran but degraded to an unavailable marker.
    pub degraded: Vec<AgentKind>,
    pub cached: bool,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_wire_format() {
        let ok: AgentOutcome<TestOutput> = AgentOutcome::Completed(TestOutput {
            tests: "def test_x(): pass".into(),
            stale_against_final: false,
        });
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["tests"], "def test_x(): pass");

        let missing: AgentOutcome<TestOutput> = AgentOutcome::unavailable("timed out");
        let json = serde_json::to_value(&missing).unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["reason"], "timed out");
        assert!(missing.completed().is_none());
    }

    #[test]
    fn test_query_request_optional_fields_default() {
        let req: QueryRequest =
            serde_json::from_str(r#"{"repo_id":"r1","question":"what is this"}"#).unwrap();
        assert!(req.chat_history.is_empty());
        assert!(req.context_file_hints.is_empty());
    }
}
