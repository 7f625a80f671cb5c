//! Generate-test-repair loop against a scripted sandbox.

use std::sync::Arc;
use std::time::Duration;

use codesmith_core::fakes::{chunk, SandboxStep, ScriptedModelCaller, ScriptedSandbox, StaticRetrieval};
use codesmith_core::prompts;
use codesmith_core::{IterationAction, Orchestrator, OrchestratorConfig, RetrievalService};
use tokio_util::sync::CancellationToken;

const GEN: &str = r#"{"plan":"slugify","files":[{"file_path":"text/slug.py","content":"def slugify(s):\n    return s.lower()\n"}]}"#;
const FIX: &str = r#"{"target":"code","reasoning":"spaces must become dashes","files":[{"file_path":"text/slug.py","content":"def slugify(s):\n    return s.lower().replace(' ', '-')\n"}]}"#;
const TESTS: &str = "from text.slug import slugify\n\ndef test_slugify():\n    assert slugify('A B') == 'a-b'\n";
const FAILURE: &str = "FAILED test_slug.py::test_slugify - AssertionError: assert 'a b' == 'a-b'\n1 failed in 0.02s";

fn scripted() -> Arc<ScriptedModelCaller> {
    let caller = Arc::new(ScriptedModelCaller::new());
    caller.respond_when(prompts::TASK_GENERATE, GEN);
    caller.respond_when(prompts::TASK_TEST, TESTS);
    caller.respond_when(prompts::TASK_FIX, FIX);
    caller
}

fn retrieval() -> Arc<dyn RetrievalService> {
    Arc::new(StaticRetrieval::new(vec![chunk(
        "text/util.py",
        1,
        4,
        "def strip_accents(s): ...",
        0.6,
    )]))
}

fn orchestrator(caller: Arc<ScriptedModelCaller>, sandbox: Arc<ScriptedSandbox>) -> Orchestrator {
    Orchestrator::new(OrchestratorConfig::default(), caller, sandbox).unwrap()
}

#[tokio::test]
async fn test_passes_on_third_iteration() {
    let sandbox = Arc::new(ScriptedSandbox::new([
        SandboxStep::Fail(FAILURE.into()),
        SandboxStep::Fail(FAILURE.into()),
        SandboxStep::Pass,
    ]));
    let result = orchestrator(scripted(), sandbox.clone())
        .refine("slugify a title", retrieval(), Some(5), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.total_iterations, 3);
    let log = &result.iteration_log;
    assert_eq!(log.iter().map(|i| i.index).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(log[0].action_taken, IterationAction::InitialGeneration);
    assert_eq!(log[1].action_taken, IterationAction::FixedCode);
    assert!(!log[0].passed && !log[1].passed && log[2].passed);
    assert!(log[0].failures.iter().any(|f| f.contains("test_slugify")));
    assert!(result.final_code.files[0].content.contains("replace"));
    assert_eq!(result.final_tests, log[2].tests);
    assert_eq!(sandbox.run_count(), 3);
}

#[tokio::test]
async fn test_exhaustion_returns_last_attempt() {
    let sandbox = Arc::new(ScriptedSandbox::always(SandboxStep::Timeout));
    let result = orchestrator(scripted(), sandbox.clone())
        .refine("slugify a title", retrieval(), Some(4), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.total_iterations, 4);
    assert!(!result.final_code.is_empty());
    assert!(result.final_tests.contains("def test_slugify"));
    let last = result.iteration_log.last().unwrap();
    assert_eq!(result.final_code, last.code);
    assert!(!last.failures.is_empty());
    assert_eq!(sandbox.run_count(), 4);
}

#[tokio::test]
async fn test_requested_iterations_are_capped() {
    let sandbox = Arc::new(ScriptedSandbox::always(SandboxStep::Fail(FAILURE.into())));
    let o = orchestrator(scripted(), sandbox.clone());
    let cap = o.config().refinement.iteration_cap;
    let result = o
        .refine("slugify a title", retrieval(), Some(cap + 25), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.total_iterations, cap);
    assert_eq!(sandbox.run_count(), cap as usize);
}

#[tokio::test(start_paused = true)]
async fn test_sandbox_runs_never_overlap() {
    let sandbox = Arc::new(
        ScriptedSandbox::new([
            SandboxStep::Fail(FAILURE.into()),
            SandboxStep::Fail(FAILURE.into()),
            SandboxStep::Fail(FAILURE.into()),
        ])
        .with_run_delay(Duration::from_secs(2)),
    );
    let result = orchestrator(scripted(), sandbox.clone())
        .refine("slugify a title", retrieval(), Some(3), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.total_iterations, 3);
    assert_eq!(sandbox.run_count(), 3);
    assert_eq!(sandbox.max_concurrent_runs(), 1);
}

#[tokio::test]
async fn test_unusable_fix_carries_both_artifacts() {
    let caller = Arc::new(ScriptedModelCaller::new());
    caller.respond_when(prompts::TASK_GENERATE, GEN);
    caller.respond_when(prompts::TASK_TEST, TESTS);
    caller.respond_when(prompts::TASK_FIX, "I am not sure what went wrong.");
    let sandbox = Arc::new(ScriptedSandbox::new([
        SandboxStep::Fail(FAILURE.into()),
        SandboxStep::Pass,
    ]));

    let result = orchestrator(caller, sandbox.clone())
        .refine("slugify a title", retrieval(), Some(3), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    let log = &result.iteration_log;
    assert_eq!(log[1].action_taken, IterationAction::NoFixAvailable);
    assert_eq!(log[1].code, log[0].code);
    assert_eq!(log[1].tests, log[0].tests);
    let runs = sandbox.runs();
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test(start_paused = true)]
async fn test_sandbox_ignoring_its_deadline_cannot_stall_the_loop() {
    let sandbox = Arc::new(ScriptedSandbox::always(SandboxStep::Hang));
    let orch = orchestrator(scripted(), sandbox.clone());
    let cancel = CancellationToken::new();
    let run = orch.refine(
        "slugify a title",
        retrieval(),
        Some(4),
        &cancel,
    );
    let result = tokio::time::timeout(Duration::from_secs(600), run)
        .await
        .expect("refinement stalled on a hung sandbox")
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.total_iterations, 4);
    assert_eq!(sandbox.run_count(), 4);
    assert!(result.iteration_log.iter().all(|i| i.failures[0].contains("timed out")));
}
