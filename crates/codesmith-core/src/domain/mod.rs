//! Domain model for one query's lifetime.
//!
//! Everything here is created within a single request and discarded once the
//! response is assembled.

pub mod bundle;
pub mod impact;
pub mod refinement;
pub mod response;
pub mod review;
pub mod routing;

pub use bundle::{BundleLimits, CodeBundle, CodeFile, GenerationOutput};
pub use impact::{AffectedFile, ImpactReport, RiskLevel};
pub use refinement::{
    FixTarget, IterationAction, RefinementIteration, RefinementResult, RefinementState,
};
pub use response::{
    AgentOutcome, ChatTurn, Citation, Decomposition, ExplainOutput, OrchestrationResponse,
    QueryRequest, TestOutput,
};
pub use review::{
    ControllerDecision, ControllerVerdict, EvaluationResult, Review, ReviewVerdict, ReviewerId,
};
pub use routing::{AgentAction, AgentKind, RoutingDecision, RoutingTier};
