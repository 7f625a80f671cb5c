//! Phase scheduler: fans the routed agents out, wave by wave.
//!
//! First wave: explain, generate, decompose and (for a TEST-only request)
//! tests against the retrieved code. The moment generation yields a bundle
//! the second wave starts speculatively: evaluation plus tests written
//! against that bundle. The speculative tests sit on their own child token
//! and are held back until the controller verdict is known; a
//! REQUEST_REVISION cancels and discards them. Impact runs last, on the
//! finalized bundle.
//!
//! Every task carries its own budget. A task that times out, fails, or is
//! cancelled leaves an `Unavailable` marker instead of an output.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::agents::Agents;
use crate::capabilities::RetrievalService;
use crate::context::{retrieve_context, RetrievedContext};
use crate::domain::bundle::{CodeBundle, CodeFile, GenerationOutput};
use crate::domain::impact::ImpactReport;
use crate::domain::response::{
    AgentOutcome, ChatTurn, Decomposition, ExplainOutput, QueryRequest, TestOutput,
};
use crate::domain::review::{ControllerVerdict, EvaluationResult};
use crate::domain::routing::{AgentKind, RoutingDecision};
use crate::error::{OrchestratorError, Result};
use crate::obs;

/// Reason recorded for speculative tests thrown away after a revision request.
pub const DISCARDED: &str = "discarded";

/// Per-agent outputs of one scheduled query. `None` means the agent was
/// never scheduled.
#[derive(Debug, Default)]
pub struct PhaseResults {
    pub context: RetrievedContext,
    pub explain: Option<AgentOutcome<ExplainOutput>>,
    pub generate: Option<AgentOutcome<GenerationOutput>>,
    pub test: Option<AgentOutcome<TestOutput>>,
    pub evaluation: Option<AgentOutcome<EvaluationResult>>,
    pub impact: Option<AgentOutcome<ImpactReport>>,
    pub decomposition: Option<AgentOutcome<Decomposition>>,
}

impl PhaseResults {
    /// Agents that were scheduled but produced no output.
    pub fn degraded(&self) -> Vec<AgentKind> {
        let slots = [
            (AgentKind::Explain, self.explain.as_ref().map(AgentOutcome::is_completed)),
            (AgentKind::Generate, self.generate.as_ref().map(AgentOutcome::is_completed)),
            (AgentKind::Test, self.test.as_ref().map(AgentOutcome::is_completed)),
            (AgentKind::Evaluate, self.evaluation.as_ref().map(AgentOutcome::is_completed)),
            (AgentKind::Impact, self.impact.as_ref().map(AgentOutcome::is_completed)),
            (AgentKind::Decompose, self.decomposition.as_ref().map(AgentOutcome::is_completed)),
        ];
        slots
            .into_iter()
            .filter(|(_, done)| *done == Some(false))
            .map(|(kind, _)| kind)
            .collect()
    }

    fn mark_unavailable(&mut self, kind: AgentKind, reason: &str) {
        match kind {
            AgentKind::Explain => self.explain = Some(AgentOutcome::unavailable(reason)),
            AgentKind::Generate => self.generate = Some(AgentOutcome::unavailable(reason)),
            AgentKind::Test => self.test = Some(AgentOutcome::unavailable(reason)),
            AgentKind::Evaluate => self.evaluation = Some(AgentOutcome::unavailable(reason)),
            AgentKind::Impact => self.impact = Some(AgentOutcome::unavailable(reason)),
            AgentKind::Decompose => self.decomposition = Some(AgentOutcome::unavailable(reason)),
        }
    }

    fn slot_filled(&self, kind: AgentKind) -> bool {
        match kind {
            AgentKind::Explain => self.explain.is_some(),
            AgentKind::Generate => self.generate.is_some(),
            AgentKind::Test => self.test.is_some(),
            AgentKind::Evaluate => self.evaluation.is_some(),
            AgentKind::Impact => self.impact.is_some(),
            AgentKind::Decompose => self.decomposition.is_some(),
        }
    }
}

// ---------------------------------------------------------------------------
// Task plumbing
// ---------------------------------------------------------------------------

enum TaskOutput {
    Explain(Result<ExplainOutput>),
    Generate(Result<GenerationOutput>),
    Tests(Result<String>),
    SpeculativeTests(Result<String>),
    Evaluate(Result<EvaluationResult>),
    Impact(Result<ImpactReport>),
    Decompose(Result<Decomposition>),
}

struct Finished {
    kind: AgentKind,
    elapsed_ms: u64,
    output: TaskOutput,
}

/// Second-wave bookkeeping for one generated bundle.
#[derive(Default)]
struct SecondWave {
    original: CodeBundle,
    /// Set once evaluation settled (or was never scheduled).
    verdict: Option<Option<ControllerVerdict>>,
    final_code: CodeBundle,
    tests: Option<Result<String>>,
}

fn reason_for(err: &OrchestratorError) -> String {
    if err.is_cancelled() {
        "cancelled".to_string()
    } else {
        err.to_string()
    }
}

fn settle<T>(kind: AgentKind, elapsed_ms: u64, result: Result<T>) -> AgentOutcome<T> {
    match result {
        Ok(value) => {
            obs::emit_agent_finished(kind, elapsed_ms, None);
            AgentOutcome::Completed(value)
        }
        Err(e) => {
            let reason = reason_for(&e);
            obs::emit_agent_finished(kind, elapsed_ms, Some(&reason));
            AgentOutcome::unavailable(reason)
        }
    }
}

/// Spawn `fut` under a `budget_ms` deadline; an expired deadline becomes
/// `AgentTimeout`.
fn spawn_task<T, F>(
    set: &mut JoinSet<Finished>,
    pending: &mut BTreeSet<AgentKind>,
    kind: AgentKind,
    budget_ms: u64,
    wrap: fn(Result<T>) -> TaskOutput,
    fut: F,
) where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    pending.insert(kind);
    set.spawn(async move {
        let started = Instant::now();
        let result = match tokio::time::timeout(Duration::from_millis(budget_ms.max(1)), fut).await
        {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::AgentTimeout {
                agent: kind.to_string(),
                timeout_ms: budget_ms,
            }),
        };
        Finished {
            kind,
            elapsed_ms: started.elapsed().as_millis() as u64,
            output: wrap(result),
        }
    });
}

// ---------------------------------------------------------------------------
// PhaseScheduler
// ---------------------------------------------------------------------------

/// Runs the agents a [`RoutingDecision`] asks for.
#[derive(Clone)]
pub struct PhaseScheduler {
    agents: Agents,
}

impl PhaseScheduler {
    pub fn new(agents: Agents) -> Self {
        Self { agents }
    }

    /// Execute `decision` for `request`. Never fails: every scheduled agent
    /// ends with either an output or an `Unavailable` marker.
    #[instrument(skip_all, fields(primary = %decision.primary_action))]
    pub async fn execute(
        &self,
        decision: &RoutingDecision,
        request: &QueryRequest,
        retrieval: Arc<dyn RetrievalService>,
        cancel: &CancellationToken,
    ) -> PhaseResults {
        let mut results = PhaseResults::default();
        let active = decision.active_agents();
        if active.is_empty() {
            return results;
        }
        let cfg = self.agents.config.clone();

        results.context = match retrieve_context(
            &retrieval,
            &request.question,
            &request.context_file_hints,
            &cfg.retrieval,
            cfg.timeouts.retrieval_ms,
            cancel,
        )
        .await
        {
            Ok(context) => context,
            Err(_) => {
                for kind in active {
                    results.mark_unavailable(kind, "cancelled");
                }
                return results;
            }
        };
        let context = Arc::new(results.context.clone());
        let query: Arc<str> = Arc::from(request.question.as_str());
        let history: Arc<Vec<ChatTurn>> = Arc::new(request.chat_history.clone());
        let test_token = cancel.child_token();

        let mut set: JoinSet<Finished> = JoinSet::new();
        let mut pending: BTreeSet<AgentKind> = BTreeSet::new();
        let mut wave = SecondWave::default();

        // First wave.
        if decision.wants(AgentKind::Explain) {
            let agents = self.agents.clone();
            let (query, history, context) = (query.clone(), history.clone(), context.clone());
            let token = cancel.clone();
            spawn_task(
                &mut set,
                &mut pending,
                AgentKind::Explain,
                cfg.timeouts.explain_ms,
                TaskOutput::Explain,
                async move { agents.explain(&query, &history, &context, &token).await },
            );
        }
        if decision.wants(AgentKind::Generate) {
            let agents = self.agents.clone();
            let (query, history, context) = (query.clone(), history.clone(), context.clone());
            let token = cancel.clone();
            spawn_task(
                &mut set,
                &mut pending,
                AgentKind::Generate,
                cfg.timeouts.generate_ms,
                TaskOutput::Generate,
                async move { agents.generate(&query, &history, &context, &token).await },
            );
        } else if decision.wants(AgentKind::Test) {
            // Tests for code that already exists: the retrieved excerpts are the code under test.
            let existing = CodeBundle::bounded(
                context
                    .chunks
                    .iter()
                    .map(|c| CodeFile::new(c.file_path.clone(), c.content.clone())),
                cfg.bundle,
            );
            let (agents, query, token) = (self.agents.clone(), query.clone(), cancel.clone());
            spawn_task(
                &mut set,
                &mut pending,
                AgentKind::Test,
                cfg.timeouts.test_ms,
                TaskOutput::Tests,
                async move {
                    let code = (!existing.is_empty()).then_some(&existing);
                    agents.write_tests(&query, code, &token).await
                },
            );
        }
        if decision.wants(AgentKind::Decompose) {
            let agents = self.agents.clone();
            let (query, context, token) = (query.clone(), context.clone(), cancel.clone());
            spawn_task(
                &mut set,
                &mut pending,
                AgentKind::Decompose,
                cfg.timeouts.decompose_ms,
                TaskOutput::Decompose,
                async move { agents.decompose(&query, &context, &token).await },
            );
        }

        while let Some(joined) = set.join_next().await {
            let Finished {
                kind,
                elapsed_ms,
                output,
            } = match joined {
                Ok(finished) => finished,
                Err(e) => {
                    warn!(error = %e, "agent task aborted");
                    continue;
                }
            };
            pending.remove(&kind);

            match output {
                TaskOutput::Explain(r) => results.explain = Some(settle(kind, elapsed_ms, r)),
                TaskOutput::Decompose(r) => {
                    results.decomposition = Some(settle(kind, elapsed_ms, r))
                }
                TaskOutput::Tests(r) => {
                    results.test = Some(settle(
                        kind,
                        elapsed_ms,
                        r.map(|tests| TestOutput {
                            tests,
                            stale_against_final: false,
                        }),
                    ))
                }
                TaskOutput::Impact(r) => results.impact = Some(settle(kind, elapsed_ms, r)),
                TaskOutput::Generate(r) => {
                    let outcome = settle(kind, elapsed_ms, r);
                    match outcome.completed() {
                        Some(generated) if !generated.bundle.is_empty() => {
                            wave.original = generated.bundle.clone();
                            wave.final_code = generated.bundle.clone();
                            self.launch_second_wave(
                                decision,
                                &mut set,
                                &mut pending,
                                &query,
                                &context,
                                &wave.original,
                                cancel,
                                &test_token,
                            );
                            if !decision.wants(AgentKind::Evaluate) {
                                wave.verdict = Some(None);
                                self.launch_impact(
                                    decision,
                                    &mut set,
                                    &mut pending,
                                    &retrieval,
                                    &wave.final_code,
                                    cancel,
                                );
                            }
                        }
                        _ => {
                            let reason = match &outcome {
                                AgentOutcome::Unavailable { reason } => {
                                    format!("generation unavailable: {reason}")
                                }
                                AgentOutcome::Completed(_) => {
                                    "generation produced no code".to_string()
                                }
                            };
                            for dependent in [AgentKind::Evaluate, AgentKind::Test, AgentKind::Impact] {
                                if decision.wants(dependent) {
                                    results.mark_unavailable(dependent, &reason);
                                }
                            }
                        }
                    }
                    results.generate = Some(outcome);
                }
                TaskOutput::Evaluate(r) => {
                    let outcome = settle(kind, elapsed_ms, r);
                    let verdict = match outcome.completed() {
                        Some(evaluation) => {
                            wave.final_code = evaluation.controller.final_code.clone();
                            let decided = evaluation.controller.decision;
                            obs::emit_evaluation_decided(
                                decided,
                                evaluation.controller.final_score,
                                evaluation.controller.confidence,
                            );
                            decided
                        }
                        // A failed evaluation keeps the original.
                        None => ControllerVerdict::AcceptOriginal,
                    };
                    if verdict == ControllerVerdict::RequestRevision {
                        debug!("revision requested; discarding speculative tests");
                        test_token.cancel();
                    }
                    wave.verdict = Some(Some(verdict));
                    results.evaluation = Some(outcome);
                    self.launch_impact(
                        decision,
                        &mut set,
                        &mut pending,
                        &retrieval,
                        &wave.final_code,
                        cancel,
                    );
                }
                TaskOutput::SpeculativeTests(r) => {
                    if let Err(e) = &r {
                        obs::emit_agent_finished(kind, elapsed_ms, Some(&reason_for(e)));
                    } else {
                        obs::emit_agent_finished(kind, elapsed_ms, None);
                    }
                    wave.tests = Some(r);
                }
            }

            if let Some(verdict) = wave.verdict {
                if let Some(tests) = wave.tests.take() {
                    results.test = Some(confirm_tests(verdict, tests, &wave));
                }
            }
        }

        // Evaluation never settled; tests written against the original stand.
        if let Some(tests) = wave.tests.take() {
            results.test = Some(confirm_tests(None, tests, &wave));
        }
        // A panicked task leaves its own slot empty and never unlocks its dependents.
        if !pending.is_empty() {
            warn!(?pending, "agents finished without a result");
        }
        for kind in decision.active_agents() {
            if !results.slot_filled(kind) {
                results.mark_unavailable(kind, "agent task aborted");
            }
        }
        results
    }

    #[allow(clippy::too_many_arguments)]
    fn launch_second_wave(
        &self,
        decision: &RoutingDecision,
        set: &mut JoinSet<Finished>,
        pending: &mut BTreeSet<AgentKind>,
        query: &Arc<str>,
        context: &Arc<RetrievedContext>,
        bundle: &CodeBundle,
        cancel: &CancellationToken,
        test_token: &CancellationToken,
    ) {
        let timeouts = &self.agents.config.timeouts;
        if decision.wants(AgentKind::Evaluate) {
            let (agents, query, token) = (self.agents.clone(), query.clone(), cancel.clone());
            let (code, rendered) = (bundle.clone(), context.render());
            spawn_task(
                set,
                pending,
                AgentKind::Evaluate,
                timeouts.review_ms + timeouts.controller_ms,
                TaskOutput::Evaluate,
                async move { agents.evaluate(&code, &query, &rendered, &token).await },
            );
        }
        if decision.wants(AgentKind::Test) {
            let (agents, query, token) = (self.agents.clone(), query.clone(), test_token.clone());
            let code = bundle.clone();
            spawn_task(
                set,
                pending,
                AgentKind::Test,
                timeouts.test_ms,
                TaskOutput::SpeculativeTests,
                async move { agents.write_tests(&query, Some(&code), &token).await },
            );
        }
    }

    fn launch_impact(
        &self,
        decision: &RoutingDecision,
        set: &mut JoinSet<Finished>,
        pending: &mut BTreeSet<AgentKind>,
        retrieval: &Arc<dyn RetrievalService>,
        final_code: &CodeBundle,
        cancel: &CancellationToken,
    ) {
        if !decision.wants(AgentKind::Impact) {
            return;
        }
        let cfg = &self.agents.config;
        let budget = cfg.timeouts.retrieval_ms * cfg.impact.max_files as u64 + cfg.timeouts.impact_ms;
        let (agents, retrieval, token) = (self.agents.clone(), retrieval.clone(), cancel.clone());
        let (paths, changes) = (final_code.paths(), final_code.render());
        spawn_task(set, pending, AgentKind::Impact, budget, TaskOutput::Impact, async move {
            agents.analyze_impact(&retrieval, &paths, &changes, &token).await
        });
    }
}

/// Decide what the speculative tests become once the verdict is known.
fn confirm_tests(
    verdict: Option<ControllerVerdict>,
    tests: Result<String>,
    wave: &SecondWave,
) -> AgentOutcome<TestOutput> {
    if verdict == Some(ControllerVerdict::RequestRevision) {
        return AgentOutcome::unavailable(DISCARDED);
    }
    match tests {
        Ok(tests) => AgentOutcome::Completed(TestOutput {
            tests,
            stale_against_final: verdict == Some(ControllerVerdict::MergeFeedback)
                && wave.final_code != wave.original,
        }),
        Err(e) => AgentOutcome::unavailable(reason_for(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{ModelError, ProviderId};
    use crate::domain::routing::{AgentAction, RoutingTier};
    use crate::fakes::{chunk, ScriptedModelCaller, StaticRetrieval};
    use crate::prompts;

    const GEN: &str = r#"{"plan":"add helper","files":[{"file_path":"util.py","content":"def pad(s, n):\n    return s.ljust(n)\n"}]}"#;
    const TESTS: &str = "from util import pad\n\ndef test_pad():\n    assert pad('a', 2) == 'a '\n";

    fn retrieval() -> Arc<dyn RetrievalService> {
        Arc::new(StaticRetrieval::new(vec![chunk(
            "util.py",
            1,
            3,
            "def pad(s): return s",
            0.9,
        )]))
    }

    fn decision(primary: AgentAction) -> RoutingDecision {
        RoutingDecision::new(primary, [], [], 0.9, "test", RoutingTier::FastModel)
    }

    fn reviews(caller: &ScriptedModelCaller, critic: u32, defender: u32) {
        caller.respond_when(
            prompts::TASK_CRITIC,
            &format!(r#"{{"score":{critic},"issues":[],"suggestions":[],"verdict":"APPROVE"}}"#),
        );
        caller.respond_when(
            prompts::TASK_DEFENDER,
            &format!(r#"{{"score":{defender},"issues":[],"suggestions":[],"verdict":"APPROVE"}}"#),
        );
    }

    /// Panics inside the generation call, delegating everything else.
    struct PanicOnGenerate(ScriptedModelCaller);

    #[async_trait::async_trait]
    impl crate::capabilities::ModelCaller for PanicOnGenerate {
        async fn call(
            &self,
            provider: &ProviderId,
            prompt: &str,
            options: crate::capabilities::CallOptions,
        ) -> std::result::Result<String, ModelError> {
            if prompt.contains(prompts::TASK_GENERATE) {
                panic!("generator blew up");
            }
            self.0.call(provider, prompt, options).await
        }
    }

    fn scheduler(caller: Arc<ScriptedModelCaller>) -> PhaseScheduler {
        PhaseScheduler::new(crate::agents::test_agents(caller))
    }

    #[tokio::test]
    async fn test_explain_only_runs_one_agent() {
        let caller = Arc::new(ScriptedModelCaller::new());
        caller.respond_when(prompts::TASK_EXPLAIN, "pad right-justifies (util.py:1-3)");
        let results = scheduler(caller.clone())
            .execute(
                &decision(AgentAction::Explain),
                &QueryRequest::new("r1", "what does pad do"),
                retrieval(),
                &CancellationToken::new(),
            )
            .await;
        assert!(results.explain.as_ref().unwrap().is_completed());
        assert!(results.generate.is_none());
        assert!(results.test.is_none());
        assert_eq!(caller.call_count(), 1);
        assert!(results.degraded().is_empty());
    }

    #[tokio::test]
    async fn test_accepted_generation_keeps_tests_and_runs_impact() {
        let caller = Arc::new(ScriptedModelCaller::new());
        caller.respond_when(prompts::TASK_GENERATE, GEN);
        caller.respond_when(prompts::TASK_TEST, TESTS);
        caller.respond_when(prompts::TASK_IMPACT, r#"{"risk_level":"LOW"}"#);
        reviews(&caller, 9, 9);

        let results = scheduler(caller)
            .execute(
                &decision(AgentAction::Generate),
                &QueryRequest::new("r1", "add a pad helper"),
                retrieval(),
                &CancellationToken::new(),
            )
            .await;
        let evaluation = results.evaluation.unwrap().into_completed().unwrap();
        assert_eq!(evaluation.controller.decision, ControllerVerdict::AcceptOriginal);
        let tests = results.test.unwrap().into_completed().unwrap();
        assert!(!tests.stale_against_final);
        let impact = results.impact.unwrap().into_completed().unwrap();
        assert_eq!(impact.directly_changed, vec!["util.py".to_string()]);
    }

    #[tokio::test]
    async fn test_revision_request_discards_speculative_tests() {
        let caller = Arc::new(ScriptedModelCaller::new());
        caller.respond_when(prompts::TASK_GENERATE, GEN);
        caller.respond_when(prompts::TASK_TEST, TESTS);
        caller.respond_when(prompts::TASK_IMPACT, r#"{"risk_level":"LOW"}"#);
        reviews(&caller, 2, 3);

        let results = scheduler(caller)
            .execute(
                &decision(AgentAction::Generate),
                &QueryRequest::new("r1", "add a pad helper"),
                retrieval(),
                &CancellationToken::new(),
            )
            .await;
        let evaluation = results.evaluation.unwrap().into_completed().unwrap();
        assert_eq!(evaluation.controller.decision, ControllerVerdict::RequestRevision);
        assert_eq!(results.test, Some(AgentOutcome::unavailable(DISCARDED)));
    }

    #[tokio::test]
    async fn test_failed_generation_marks_dependents_unavailable() {
        let caller = Arc::new(ScriptedModelCaller::new());
        caller.fail_when(prompts::TASK_GENERATE, ModelError::Provider("overloaded".into()));

        let results = scheduler(caller.clone())
            .execute(
                &decision(AgentAction::Generate),
                &QueryRequest::new("r1", "add a pad helper"),
                retrieval(),
                &CancellationToken::new(),
            )
            .await;
        assert!(!results.generate.as_ref().unwrap().is_completed());
        let degraded = results.degraded();
        for kind in [AgentKind::Generate, AgentKind::Evaluate, AgentKind::Test, AgentKind::Impact] {
            assert!(degraded.contains(&kind), "{kind} should be degraded");
        }
        assert_eq!(caller.count_matching(prompts::TASK_CRITIC), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_agent_times_out_independently() {
        let caller = Arc::new(ScriptedModelCaller::new());
        caller.delay_when(prompts::TASK_EXPLAIN, Duration::from_secs(600), "late answer");
        caller.respond_when(prompts::TASK_DECOMPOSE, r#"{"subtasks":["a","b"],"summary":"two steps"}"#);
        let d = RoutingDecision::new(
            AgentAction::Explain,
            [AgentAction::Decompose],
            [],
            0.9,
            "test",
            RoutingTier::FastModel,
        );

        let results = scheduler(caller)
            .execute(&d, &QueryRequest::new("r1", "what is pad"), retrieval(), &CancellationToken::new())
            .await;
        assert!(!results.explain.unwrap().is_completed());
        let decomposition = results.decomposition.unwrap().into_completed().unwrap();
        assert_eq!(decomposition.subtasks, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_marks_everything_unavailable() {
        let caller = Arc::new(ScriptedModelCaller::new());
        caller.set_fallback("unused");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = scheduler(caller.clone())
            .execute(
                &decision(AgentAction::Generate),
                &QueryRequest::new("r1", "add a pad helper"),
                retrieval(),
                &cancel,
            )
            .await;
        assert_eq!(results.generate, Some(AgentOutcome::unavailable("cancelled")));
        assert_eq!(results.degraded().len(), 4);
        assert_eq!(caller.call_count(), 0);
    }

    #[tokio::test]
    async fn test_panicked_generation_fills_every_requested_slot() {
        let inner = ScriptedModelCaller::new();
        inner.set_fallback("unused");
        let cfg = Arc::new(crate::config::OrchestratorConfig::default());
        let gateway = crate::guard::ModelGateway::new(Arc::new(PanicOnGenerate(inner)), cfg.breaker.clone());
        let scheduler = PhaseScheduler::new(Agents::new(Arc::new(gateway), cfg));
        let d = decision(AgentAction::Generate);

        let results = scheduler
            .execute(&d, &QueryRequest::new("r1", "add a pad helper"), retrieval(), &CancellationToken::new())
            .await;
        assert_eq!(results.generate, Some(AgentOutcome::unavailable("agent task aborted")));
        for kind in d.active_agents() {
            assert!(results.slot_filled(kind), "{kind} left empty");
        }
        assert_eq!(results.degraded().len(), d.active_agents().len());
        assert_eq!(results.test, Some(AgentOutcome::unavailable("agent task aborted")));
    }

    #[tokio::test]
    async fn test_test_only_request_uses_retrieved_code() {
        let caller = Arc::new(ScriptedModelCaller::new());
        caller.respond_when(prompts::TASK_TEST, TESTS);
        let results = scheduler(caller.clone())
            .execute(
                &decision(AgentAction::Test),
                &QueryRequest::new("r1", "pytest for pad"),
                retrieval(),
                &CancellationToken::new(),
            )
            .await;
        assert!(results.test.unwrap().is_completed());
        let prompt = &caller.calls()[0].prompt;
        assert!(prompt.contains("def pad(s): return s"));
        assert_eq!(caller.calls()[0].provider, ProviderId::new("fast"));
    }
}
