//! Bounded generate-test-repair loop.
//!
//! Iterations are strictly sequential; at most one sandbox run is in flight.
//! The loop ends on the first passing run or after `max_iterations`, and
//! always returns the last code and tests it had.

pub mod digest;

use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::agents::tester::looks_like_tests;
use crate::agents::{bundle_from_wire, unfence, Agents, WireFile};
use crate::capabilities::{CallOptions, SandboxRunner};
use crate::context::RetrievedContext;
use crate::domain::bundle::CodeBundle;
use crate::domain::refinement::{
    FixTarget, IterationAction, RefinementIteration, RefinementResult, RefinementState,
};
use crate::obs;
use crate::prompts;
use crate::sandbox::SandboxError;

pub use digest::{digest_error, digest_output, FailureDigest, FailureKind};

const FIX_MAX_TOKENS: u32 = 4_096;

/// Slack past the runner's own limit before the loop stops waiting on it.
const SANDBOX_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct WireFix {
    target: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    files: Vec<WireFile>,
    #[serde(default)]
    tests: Option<String>,
}

/// What the repair step produced for the next iteration.
#[derive(Debug)]
enum Repair {
    Code(CodeBundle),
    Tests(String),
    Nothing,
}

impl Repair {
    fn action(&self) -> IterationAction {
        match self {
            Repair::Code(_) => IterationAction::FixedCode,
            Repair::Tests(_) => IterationAction::FixedTests,
            Repair::Nothing => IterationAction::NoFixAvailable,
        }
    }
}

impl Agents {
    /// Run the loop for `request`.
    ///
    /// A cancelled loop stops before its next sandbox run and reports
    /// `success = false` with whatever code and tests it has.
    #[instrument(skip_all, fields(max_iterations = max_iterations))]
    pub async fn refine(
        &self,
        sandbox: &dyn SandboxRunner,
        request: &str,
        context: &RetrievedContext,
        max_iterations: u32,
        cancel: &CancellationToken,
    ) -> RefinementResult {
        let cfg = &self.config.refinement;
        let max_iterations = max_iterations.clamp(1, cfg.iteration_cap.max(1));
        let timeout = Duration::from_secs(cfg.sandbox_timeout_secs);

        let mut state = RefinementState::GenerateCode;
        let mut code = CodeBundle::default();
        let mut tests = String::new();
        let mut action = IterationAction::InitialGeneration;
        let mut log: Vec<RefinementIteration> = Vec::new();

        for index in 1..=max_iterations {
            // GENERATE_CODE / GENERATE_TESTS
            if index == 1 {
                debug!(?state, index, "refinement state");
                let (generated, written) = tokio::join!(
                    self.generate(request, &[], context, cancel),
                    self.write_tests(request, None, cancel),
                );
                if let Ok(out) = generated {
                    code = out.bundle;
                }
                if let Ok(t) = written {
                    tests = t;
                }
            } else if code.is_empty() {
                state = RefinementState::GenerateCode;
                debug!(?state, index, "regenerating code");
                if let Ok(out) = self.generate(request, &[], context, cancel).await {
                    code = out.bundle;
                }
            }
            if !code.is_empty() && tests.trim().is_empty() {
                state = RefinementState::GenerateTests;
                debug!(?state, index, "refinement state");
                if let Ok(t) = self.write_tests(request, Some(&code), cancel).await {
                    tests = t;
                }
            }

            if cancel.is_cancelled() {
                debug!(index, "refinement cancelled before sandbox run");
                break;
            }

            // RUN_TESTS
            state = RefinementState::RunTests;
            debug!(?state, index, "refinement state");
            let (passed, test_output, failures) = if code.is_empty() || tests.trim().is_empty() {
                let missing = if code.is_empty() { "code" } else { "tests" };
                (
                    false,
                    String::new(),
                    vec![format!("{missing} generation produced nothing runnable")],
                )
            } else {
                self.run_once(sandbox, &code, &tests, timeout, cancel).await
            };
            obs::emit_refinement_iteration(index, passed, action, failures.len());
            log.push(RefinementIteration {
                index,
                code: code.clone(),
                tests: tests.clone(),
                test_output,
                passed,
                failures: failures.clone(),
                action_taken: action,
            });

            if passed {
                state = RefinementState::Done;
                break;
            }
            if cancel.is_cancelled() {
                state = RefinementState::Failed;
                debug!(index, "refinement cancelled during sandbox run");
                break;
            }
            if index == max_iterations {
                state = RefinementState::Failed;
                break;
            }

            // ANALYZE_AND_FIX
            state = RefinementState::AnalyzeAndFix;
            debug!(?state, index, "refinement state");
            if code.is_empty() {
                // Nothing to repair; next iteration regenerates.
                action = IterationAction::FixedCode;
                continue;
            }
            let digest = failures.join("\n");
            let repair = self.repair(request, &code, &tests, &digest, cancel).await;
            action = repair.action();
            match repair {
                Repair::Code(fixed) => code = fixed,
                Repair::Tests(fixed) => tests = fixed,
                Repair::Nothing => {}
            }
        }

        info!(state = ?state, iterations = log.len(), "refinement finished");
        let mut result = RefinementResult::from_log(log);
        if result.iteration_log.is_empty() {
            result.final_code = code;
            result.final_tests = tests;
        }
        result
    }

    async fn run_once(
        &self,
        sandbox: &dyn SandboxRunner,
        code: &CodeBundle,
        tests: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> (bool, String, Vec<String>) {
        let max = self.config.refinement.max_failures;
        let limit_ms = timeout.as_millis() as u64;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SandboxError::Cancelled),
            r = tokio::time::timeout(timeout + SANDBOX_GRACE, sandbox.run(code, tests, timeout)) => {
                r.unwrap_or_else(|_| {
                    warn!(limit_ms, "sandbox overran its deadline");
                    Err(SandboxError::Timeout { limit_ms })
                })
            }
        };
        match outcome {
            Ok(output) if output.passed() => (true, output.combined(), Vec::new()),
            Ok(output) => {
                let digest = digest_output(&output, max);
                (false, output.combined(), digest.failures)
            }
            Err(e) => {
                let digest = digest_error(&e);
                (false, e.to_string(), digest.failures)
            }
        }
    }

    /// Ask the fixer which artifact is wrong and take its correction.
    ///
    /// Any failure (call, parse, unusable content) yields `Repair::Nothing`,
    /// which carries both artifacts forward.
    async fn repair(
        &self,
        request: &str,
        code: &CodeBundle,
        tests: &str,
        digest: &str,
        cancel: &CancellationToken,
    ) -> Repair {
        let raw = match self
            .gateway
            .call(
                &self.config.providers.fixer,
                &prompts::fix(request, code, tests, digest),
                CallOptions::json(FIX_MAX_TOKENS, self.config.timeouts.fix_ms),
                cancel,
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "fix call failed");
                return Repair::Nothing;
            }
        };
        let Ok(wire) = crate::json_repair::parse_lenient::<WireFix>(&raw) else {
            debug!("fix output unparseable");
            return Repair::Nothing;
        };
        let target = match wire.target.trim().to_ascii_lowercase().as_str() {
            "tests" | "test" => FixTarget::Tests,
            _ => FixTarget::Code,
        };
        debug!(?target, reasoning = %wire.reasoning, "fix decided");
        match target {
            FixTarget::Code => {
                let bundle = bundle_from_wire(wire.files, self.config.bundle);
                if bundle.is_empty() {
                    Repair::Nothing
                } else {
                    Repair::Code(bundle)
                }
            }
            FixTarget::Tests => match wire.tests.map(|t| unfence(&t)) {
                Some(t) if looks_like_tests(&t) => Repair::Tests(format!("{}\n", t.trim_end())),
                _ => Repair::Nothing,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fakes::{SandboxStep, ScriptedModelCaller, ScriptedSandbox};

    const GEN: &str = r#"{"plan":"p","files":[{"file_path":"calc.py","content":"def add(a, b):\n    return a - b\n"}]}"#;
    const TESTS: &str = "from calc import add\n\ndef test_add():\n    assert add(1, 2) == 3\n";

    fn scripted() -> Arc<ScriptedModelCaller> {
        let caller = Arc::new(ScriptedModelCaller::new());
        caller.respond_when(prompts::TASK_GENERATE, GEN);
        caller.respond_when(prompts::TASK_TEST, TESTS);
        caller
    }

    #[tokio::test]
    async fn test_fixed_code_is_used_next_iteration() {
        let caller = scripted();
        caller.respond_when(
            prompts::TASK_FIX,
            r#"{"target":"code","reasoning":"subtracts","files":[{"file_path":"calc.py","content":"def add(a, b):\n    return a + b\n"}]}"#,
        );
        let agents = crate::agents::test_agents(caller);
        let sandbox = ScriptedSandbox::new([
            SandboxStep::Fail("E   assert -1 == 3".into()),
            SandboxStep::Pass,
        ]);

        let result = agents
            .refine(&sandbox, "add two numbers", &RetrievedContext::default(), 4, &CancellationToken::new())
            .await;
        assert!(result.success);
        assert_eq!(result.total_iterations, 2);
        assert_eq!(result.iteration_log[1].action_taken, IterationAction::FixedCode);
        assert!(result.final_code.files[0].content.contains("a + b"));
        assert_eq!(result.final_tests, TESTS);
    }

    #[tokio::test]
    async fn test_fixed_tests_carry_code_forward() {
        let caller = scripted();
        caller.respond_when(
            prompts::TASK_FIX,
            r#"{"target":"tests","tests":"from calc import add\n\ndef test_add():\n    assert add(1, 2) == -1\n"}"#,
        );
        let agents = crate::agents::test_agents(caller);
        let sandbox = ScriptedSandbox::new([SandboxStep::Fail("E   assert -1 == 3".into()), SandboxStep::Pass]);

        let result = agents
            .refine(&sandbox, "r", &RetrievedContext::default(), 4, &CancellationToken::new())
            .await;
        assert!(result.success);
        let log = &result.iteration_log;
        assert_eq!(log[1].action_taken, IterationAction::FixedTests);
        assert_eq!(log[0].code, log[1].code);
        assert!(log[1].tests.contains("== -1"));
    }

    #[tokio::test]
    async fn test_unusable_fix_still_advances() {
        let caller = scripted();
        caller.respond_when(prompts::TASK_FIX, "I'm not sure what is wrong.");
        let agents = crate::agents::test_agents(caller);
        let sandbox = ScriptedSandbox::always(SandboxStep::Fail("E   boom".into()));

        let result = agents
            .refine(&sandbox, "r", &RetrievedContext::default(), 3, &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert_eq!(result.total_iterations, 3);
        assert_eq!(result.iteration_log[2].action_taken, IterationAction::NoFixAvailable);
        assert_eq!(sandbox.run_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_sandbox_counts_as_timeout() {
        let agents = crate::agents::test_agents(scripted());
        let sandbox = ScriptedSandbox::always(SandboxStep::Hang);
        let started = tokio::time::Instant::now();

        let result = agents
            .refine(&sandbox, "r", &RetrievedContext::default(), 4, &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert_eq!(result.total_iterations, 4);
        assert_eq!(sandbox.run_count(), 4);
        assert!(result.iteration_log[0].failures[0].contains("timed out"));
        let per_run = Duration::from_secs(agents.config.refinement.sandbox_timeout_secs) + SANDBOX_GRACE;
        assert!(started.elapsed() >= per_run * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_running_sandbox() {
        let agents = crate::agents::test_agents(scripted());
        let sandbox = ScriptedSandbox::always(SandboxStep::Hang);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = agents
            .refine(&sandbox, "r", &RetrievedContext::default(), 4, &cancel)
            .await;
        assert!(!result.success);
        assert_eq!(result.total_iterations, 1);
        assert_eq!(sandbox.run_count(), 1);
        assert_eq!(result.iteration_log[0].failures, vec!["sandbox run cancelled".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_loop_never_runs_sandbox() {
        let agents = crate::agents::test_agents(scripted());
        let sandbox = ScriptedSandbox::always(SandboxStep::Pass);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = agents
            .refine(&sandbox, "r", &RetrievedContext::default(), 4, &cancel)
            .await;
        assert!(!result.success);
        assert_eq!(result.total_iterations, 0);
        assert_eq!(sandbox.run_count(), 0);
    }
}
