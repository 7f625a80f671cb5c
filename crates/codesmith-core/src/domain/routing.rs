//! Routing vocabulary: `AgentAction`, `AgentKind`, `RoutingDecision`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The five things a query can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentAction {
    Explain,
    Generate,
    Test,
    Decompose,
    Refuse,
}

impl AgentAction {
    /// Lenient parse of a model-supplied action label.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "EXPLAIN" => Some(Self::Explain),
            "GENERATE" => Some(Self::Generate),
            "TEST" => Some(Self::Test),
            "DECOMPOSE" => Some(Self::Decompose),
            "REFUSE" => Some(Self::Refuse),
            _ => None,
        }
    }

    /// Agents that must run for this action to be served.
    pub fn agents(self) -> &'static [AgentKind] {
        match self {
            Self::Explain => &[AgentKind::Explain],
            // Evaluation, speculative tests and impact all hang off generation.
            Self::Generate => &[
                AgentKind::Generate,
                AgentKind::Evaluate,
                AgentKind::Test,
                AgentKind::Impact,
            ],
            Self::Test => &[AgentKind::Test],
            Self::Decompose => &[AgentKind::Decompose],
            Self::Refuse => &[],
        }
    }
}

impl std::fmt::Display for AgentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Explain => "EXPLAIN",
            Self::Generate => "GENERATE",
            Self::Test => "TEST",
            Self::Decompose => "DECOMPOSE",
            Self::Refuse => "REFUSE",
        };
        write!(f, "{s}")
    }
}

/// Closed set of agents the phase scheduler knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Explain,
    Generate,
    Test,
    Evaluate,
    Impact,
    Decompose,
}

impl AgentKind {
    pub const ALL: [AgentKind; 6] = [
        AgentKind::Explain,
        AgentKind::Generate,
        AgentKind::Test,
        AgentKind::Evaluate,
        AgentKind::Impact,
        AgentKind::Decompose,
    ];

    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "explain" => Some(Self::Explain),
            "generate" => Some(Self::Generate),
            "test" => Some(Self::Test),
            "evaluate" => Some(Self::Evaluate),
            "impact" => Some(Self::Impact),
            "decompose" => Some(Self::Decompose),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Explain => "explain",
            Self::Generate => "generate",
            Self::Test => "test",
            Self::Evaluate => "evaluate",
            Self::Impact => "impact",
            Self::Decompose => "decompose",
        };
        write!(f, "{s}")
    }
}

/// Which stage of the routing cascade produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingTier {
    Safety,
    FastModel,
    LargeModel,
    Heuristic,
}

/// The router's verdict for one query. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub primary_action: AgentAction,
    pub secondary_actions: BTreeSet<AgentAction>,
    pub parallel_agents: BTreeSet<AgentKind>,
    pub skip_agents: BTreeSet<AgentKind>,
    /// Always within `[0, 1]`.
    pub confidence: f32,
    pub reasoning: String,
    pub tier: RoutingTier,
}

impl RoutingDecision {
    /// Build a decision, normalizing the action sets and deriving `skip_agents`.
    ///
    /// `Refuse` is never kept as a secondary action, and the primary action is
    /// removed from the secondary set.
    pub fn new(
        primary_action: AgentAction,
        secondary_actions: impl IntoIterator<Item = AgentAction>,
        parallel_agents: impl IntoIterator<Item = AgentKind>,
        confidence: f32,
        reasoning: impl Into<String>,
        tier: RoutingTier,
    ) -> Self {
        let refused = primary_action == AgentAction::Refuse;
        let secondary_actions: BTreeSet<AgentAction> = if refused {
            BTreeSet::new()
        } else {
            secondary_actions
                .into_iter()
                .filter(|a| *a != primary_action && *a != AgentAction::Refuse)
                .collect()
        };
        let parallel_agents: BTreeSet<AgentKind> = if refused {
            BTreeSet::new()
        } else {
            parallel_agents.into_iter().collect()
        };

        let mut active: BTreeSet<AgentKind> = primary_action.agents().iter().copied().collect();
        for action in &secondary_actions {
            active.extend(action.agents().iter().copied());
        }
        active.extend(parallel_agents.iter().copied());

        let skip_agents = AgentKind::ALL
            .iter()
            .copied()
            .filter(|k| !active.contains(k))
            .collect();

        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            primary_action,
            secondary_actions,
            parallel_agents,
            skip_agents,
            confidence,
            reasoning: reasoning.into(),
            tier,
        }
    }

    /// A refusal with full confidence; no agents run.
    pub fn refuse(reasoning: impl Into<String>) -> Self {
        Self::new(
            AgentAction::Refuse,
            [],
            [],
            1.0,
            reasoning,
            RoutingTier::Safety,
        )
    }

    /// Whether the scheduler should run `kind` for this decision.
    pub fn wants(&self, kind: AgentKind) -> bool {
        self.primary_action != AgentAction::Refuse && !self.skip_agents.contains(&kind)
    }

    /// Agents that will run, in scheduler order.
    pub fn active_agents(&self) -> Vec<AgentKind> {
        AgentKind::ALL
            .iter()
            .copied()
            .filter(|k| self.wants(*k))
            .collect()
    }
}
