//! In-memory fakes for the capability traits (testing only)
//!
//! Provides `ScriptedModelCaller`, `StaticRetrieval`, and `ScriptedSandbox`
//! that satisfy the trait contracts without any network or process access.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::capabilities::*;
use crate::domain::bundle::CodeBundle;
use crate::sandbox::{SandboxError, SandboxResult};

// ---------------------------------------------------------------------------
// ScriptedModelCaller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Error(ModelError),
    Delayed(Duration, String),
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub provider: ProviderId,
    pub prompt: String,
    pub options: CallOptions,
}

/// Model caller that replays scripted responses.
///
/// Resolution order per call: the provider's FIFO queue, then the first
/// standing rule whose needle occurs in the prompt, then the fallback reply.
/// With none of those the call fails with a provider error.
#[derive(Debug, Default)]
pub struct ScriptedModelCaller {
    queues: Mutex<HashMap<ProviderId, VecDeque<Scripted>>>,
    rules: Mutex<Vec<(String, Scripted)>>,
    fallback: Mutex<Option<String>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModelCaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, provider: &ProviderId, reply: impl Into<String>) {
        self.push(provider, Scripted::Reply(reply.into()));
    }

    pub fn push_error(&self, provider: &ProviderId, error: ModelError) {
        self.push(provider, Scripted::Error(error));
    }

    /// Reply after `delay` (use with a paused tokio clock).
    pub fn push_delayed(&self, provider: &ProviderId, delay: Duration, reply: impl Into<String>) {
        self.push(provider, Scripted::Delayed(delay, reply.into()));
    }

    /// Answer every prompt containing `needle` with `reply`.
    pub fn respond_when(&self, needle: impl Into<String>, reply: impl Into<String>) {
        self.rules
            .lock()
            .unwrap()
            .push((needle.into(), Scripted::Reply(reply.into())));
    }

    /// Fail every prompt containing `needle`.
    pub fn fail_when(&self, needle: impl Into<String>, error: ModelError) {
        self.rules
            .lock()
            .unwrap()
            .push((needle.into(), Scripted::Error(error)));
    }

    /// Answer every prompt containing `needle` after `delay`.
    pub fn delay_when(&self, needle: impl Into<String>, delay: Duration, reply: impl Into<String>) {
        self.rules
            .lock()
            .unwrap()
            .push((needle.into(), Scripted::Delayed(delay, reply.into())));
    }

    pub fn set_fallback(&self, reply: impl Into<String>) {
        *self.fallback.lock().unwrap() = Some(reply.into());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Number of recorded prompts containing `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.prompt.contains(needle))
            .count()
    }

    fn push(&self, provider: &ProviderId, item: Scripted) {
        self.queues
            .lock()
            .unwrap()
            .entry(provider.clone())
            .or_default()
            .push_back(item);
    }

    fn next(&self, provider: &ProviderId, prompt: &str) -> Option<Scripted> {
        if let Some(item) = self
            .queues
            .lock()
            .unwrap()
            .get_mut(provider)
            .and_then(|q| q.pop_front())
        {
            return Some(item);
        }
        if let Some((_, item)) = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
        {
            return Some(item.clone());
        }
        self.fallback.lock().unwrap().clone().map(Scripted::Reply)
    }
}

#[async_trait]
impl ModelCaller for ScriptedModelCaller {
    async fn call(
        &self,
        provider: &ProviderId,
        prompt: &str,
        options: CallOptions,
    ) -> Result<String, ModelError> {
        self.calls.lock().unwrap().push(RecordedCall {
            provider: provider.clone(),
            prompt: prompt.to_string(),
            options,
        });
        match self.next(provider, prompt) {
            Some(Scripted::Reply(text)) => Ok(text),
            Some(Scripted::Error(err)) => Err(err),
            Some(Scripted::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => Err(ModelError::Provider(format!(
                "no scripted response for {provider}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// StaticRetrieval
// ---------------------------------------------------------------------------

/// Retrieval over a fixed chunk list.
///
/// Returns chunks whose path or content contains any query word of three or
/// more characters, in insertion order, at most `k`.
#[derive(Debug, Default)]
pub struct StaticRetrieval {
    chunks: Vec<RetrievedChunk>,
    fail: bool,
    calls: AtomicUsize,
}

impl StaticRetrieval {
    pub fn new(chunks: Vec<RetrievedChunk>) -> Self {
        Self {
            chunks,
            ..Self::default()
        }
    }

    /// A retrieval service whose every call errors.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Convenience constructor for test chunks.
pub fn chunk(file_path: &str, start: u32, end: u32, content: &str, score: f32) -> RetrievedChunk {
    RetrievedChunk {
        file_path: file_path.to_string(),
        line_range: LineRange::new(start, end),
        content: content.to_string(),
        score,
    }
}

#[async_trait]
impl RetrievalService for StaticRetrieval {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err("retrieval backend unavailable".to_string());
        }
        let words: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| w.len() >= 3)
            .map(|w| w.to_lowercase())
            .collect();
        Ok(self
            .chunks
            .iter()
            .filter(|c| {
                let haystack = format!("{} {}", c.file_path, c.content).to_lowercase();
                words.iter().any(|w| haystack.contains(w.as_str()))
            })
            .take(k)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// ScriptedSandbox
// ---------------------------------------------------------------------------

/// One scripted sandbox outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxStep {
    Pass,
    /// Exit code 1 with the given pytest-style output.
    Fail(String),
    /// Simulated wall-clock timeout.
    Timeout,
    /// Never returns, like a runner that ignores its deadline.
    Hang,
}

/// Sandbox that replays scripted outcomes and records what it was asked to run.
#[derive(Debug, Default)]
pub struct ScriptedSandbox {
    steps: Mutex<VecDeque<SandboxStep>>,
    default_step: Option<SandboxStep>,
    run_delay: Duration,
    runs: Mutex<Vec<(CodeBundle, String)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSandbox {
    pub fn new(steps: impl IntoIterator<Item = SandboxStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Every run produces `step`.
    pub fn always(step: SandboxStep) -> Self {
        Self {
            default_step: Some(step),
            ..Self::default()
        }
    }

    /// Hold each run open for `delay` so overlapping runs are observable.
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn runs(&self) -> Vec<(CodeBundle, String)> {
        self.runs.lock().unwrap().clone()
    }

    /// Highest number of runs that were executing at the same time.
    pub fn max_concurrent_runs(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxRunner for ScriptedSandbox {
    async fn run(
        &self,
        code: &CodeBundle,
        tests: &str,
        timeout: Duration,
    ) -> SandboxResult<SandboxOutput> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.runs
            .lock()
            .unwrap()
            .push((code.clone(), tests.to_string()));

        if !self.run_delay.is_zero() {
            tokio::time::sleep(self.run_delay).await;
        }
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.default_step.clone())
            .unwrap_or_else(|| SandboxStep::Fail("no scripted sandbox outcome".into()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match step {
            SandboxStep::Pass => Ok(SandboxOutput {
                stdout: "1 passed in 0.01s".into(),
                stderr: String::new(),
                exit_code: 0,
            }),
            SandboxStep::Fail(output) => Ok(SandboxOutput {
                stdout: output,
                stderr: String::new(),
                exit_code: 1,
            }),
            SandboxStep::Timeout => Err(SandboxError::Timeout {
                limit_ms: timeout.as_millis() as u64,
            }),
            SandboxStep::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_then_rules_then_fallback() {
        let caller = ScriptedModelCaller::new();
        let p = ProviderId::new("p");
        caller.push_reply(&p, "queued");
        caller.respond_when("route", "rule");
        caller.set_fallback("fallback");
        let opts = CallOptions::text(8, 100);

        assert_eq!(caller.call(&p, "route me", opts).await.unwrap(), "queued");
        assert_eq!(caller.call(&p, "route me", opts).await.unwrap(), "rule");
        assert_eq!(caller.call(&p, "other", opts).await.unwrap(), "fallback");
        assert_eq!(caller.call_count(), 3);
        assert_eq!(caller.count_matching("route"), 2);
    }

    #[tokio::test]
    async fn test_unscripted_call_errors() {
        let caller = ScriptedModelCaller::new();
        let err = caller
            .call(&ProviderId::new("p"), "x", CallOptions::text(8, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Provider(_)));
    }

    #[tokio::test]
    async fn test_static_retrieval_filters_by_query_words() {
        let retrieval = StaticRetrieval::new(vec![
            chunk("auth.py", 1, 10, "def login(user): ...", 0.9),
            chunk("db.py", 1, 5, "def connect(): ...", 0.8),
        ]);
        let hits = retrieval.retrieve("what does login do", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path, "auth.py");
        assert!(StaticRetrieval::failing().retrieve("x", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_sandbox_replays_steps() {
        let sandbox = ScriptedSandbox::new([SandboxStep::Fail("E assert 1 == 2".into()), SandboxStep::Pass]);
        let code = CodeBundle::single("m.py", "x = 1");
        let first = sandbox.run(&code, "t", Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.exit_code, 1);
        let second = sandbox.run(&code, "t", Duration::from_secs(1)).await.unwrap();
        assert!(second.passed());
        assert_eq!(sandbox.run_count(), 2);
        assert_eq!(sandbox.max_concurrent_runs(), 1);
    }
}
