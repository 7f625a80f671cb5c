//! Codesmith core library
//!
//! Multi-agent orchestration for retrieval-augmented code assistance: a
//! safety pre-filter, tiered routing, a speculative phase scheduler,
//! adversarial evaluation, a sandboxed refinement loop and impact analysis.
//!
//! The pipeline talks to the outside world only through the capability
//! traits in [`capabilities`]; `fakes` (feature `test-util`) provides in-memory versions.

pub mod agents;
pub mod assembler;
pub mod cache;
pub mod capabilities;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod evaluator;
#[cfg(any(test, feature = "test-util"))]
pub mod fakes;
pub mod guard;
pub mod impact;
pub mod json_repair;
pub mod obs;
pub mod orchestrator;
pub mod prompts;
pub mod refinement;
pub mod router;
pub mod safety;
pub mod sandbox;
pub mod scheduler;
pub mod telemetry;
pub mod warmup;

pub use agents::Agents;
pub use cache::{cache_key, ResponseCache};
pub use capabilities::{
    CallOptions, LineRange, ModelCaller, ModelError, ProviderId, RetrievalService,
    RetrievedChunk, SandboxOutput, SandboxRunner,
};
pub use config::OrchestratorConfig;
pub use context::{build_context, retrieve_context, RetrievedContext};
pub use domain::{
    AffectedFile, AgentAction, AgentKind, AgentOutcome, BundleLimits, ChatTurn, Citation,
    CodeBundle, CodeFile, ControllerDecision, ControllerVerdict, Decomposition,
    EvaluationResult, ExplainOutput, GenerationOutput, ImpactReport, IterationAction,
    OrchestrationResponse, QueryRequest, RefinementIteration, RefinementResult, Review,
    ReviewVerdict, ReviewerId, RiskLevel, RoutingDecision, RoutingTier, TestOutput,
};
pub use error::{OrchestratorError, Result};
pub use guard::{CircuitBreaker, ModelGateway};
pub use orchestrator::Orchestrator;
pub use router::{heuristic_route, AgentRouter};
pub use safety::{classify_safety, SafetyCategory, SafetyFilter, SafetyVerdict};
pub use sandbox::{ProcessSandbox, ProcessSandboxConfig, SandboxError, SandboxResult};
pub use scheduler::{PhaseResults, PhaseScheduler};
pub use telemetry::init_tracing;
pub use warmup::KeepWarm;
