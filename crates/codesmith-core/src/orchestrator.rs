//! The orchestrator: one entry point per pipeline operation.
//!
//! Owns the shared pieces (gateway with its breakers, router, response
//! cache, keep-warm task) and wires them together per request. Retrieval is
//! supplied per call because each repository has its own index.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, Instrument};
use uuid::Uuid;

use crate::agents::Agents;
use crate::assembler::assemble;
use crate::cache::{cache_key, ResponseCache};
use crate::capabilities::{ModelCaller, RetrievalService, SandboxRunner};
use crate::config::OrchestratorConfig;
use crate::context::{retrieve_context, RetrievedContext};
use crate::domain::bundle::CodeBundle;
use crate::domain::impact::ImpactReport;
use crate::domain::refinement::RefinementResult;
use crate::domain::response::{OrchestrationResponse, QueryRequest};
use crate::domain::review::EvaluationResult;
use crate::error::{OrchestratorError, Result};
use crate::guard::ModelGateway;
use crate::obs;
use crate::router::AgentRouter;
use crate::safety::SafetyFilter;
use crate::scheduler::PhaseScheduler;
use crate::warmup::KeepWarm;

pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    gateway: Arc<ModelGateway>,
    router: AgentRouter,
    agents: Agents,
    scheduler: PhaseScheduler,
    sandbox: Arc<dyn SandboxRunner>,
    cache: ResponseCache,
    keep_warm: Mutex<Option<KeepWarm>>,
}

impl Orchestrator {
    /// Validate `config` and build the pipeline. Keep-warm is not started
    /// here; see [`Orchestrator::start_keep_warm`].
    pub fn new(
        config: OrchestratorConfig,
        caller: Arc<dyn ModelCaller>,
        sandbox: Arc<dyn SandboxRunner>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let gateway = Arc::new(ModelGateway::new(caller, config.breaker.clone()));
        let router = AgentRouter::new(
            gateway.clone(),
            SafetyFilter::new(&config.safety.extra_patterns)?,
            config.providers.router_fast.clone(),
            config.providers.router_large.clone(),
            config.router.clone(),
            config.timeouts.router_ms,
        );
        let agents = Agents::new(gateway.clone(), config.clone());
        Ok(Self {
            cache: ResponseCache::new(&config.cache),
            scheduler: PhaseScheduler::new(agents.clone()),
            config,
            gateway,
            router,
            agents,
            sandbox,
            keep_warm: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<ModelGateway> {
        &self.gateway
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Start the keep-warm pinger if configured. Idempotent.
    pub async fn start_keep_warm(&self) -> bool {
        if !self.config.keep_warm.enabled {
            return false;
        }
        let mut slot = self.keep_warm.lock().await;
        if slot.is_none() {
            *slot = Some(KeepWarm::start(self.gateway.clone(), &self.config.keep_warm));
        }
        true
    }

    /// Stop background work.
    pub async fn shutdown(&self) {
        if let Some(warm) = self.keep_warm.lock().await.take() {
            warm.stop().await;
        }
    }

    /// Route, schedule and assemble one query.
    ///
    /// Only a malformed request is an error; agent failures degrade inside
    /// the response.
    #[instrument(skip_all, fields(repo_id = %request.repo_id))]
    pub async fn handle_query(
        &self,
        request: QueryRequest,
        retrieval: Arc<dyn RetrievalService>,
        cancel: &CancellationToken,
    ) -> Result<OrchestrationResponse> {
        if request.repo_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest("repo_id is empty".into()));
        }
        if request.question.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest("question is empty".into()));
        }

        let key = cache_key(&request);
        if self.config.cache.enabled {
            if let Some(mut hit) = self.cache.get(&key).await {
                debug!("response cache hit");
                hit.cached = true;
                return Ok(hit);
            }
        }

        let started = Instant::now();
        let request_id = Uuid::new_v4();
        let id = request_id.to_string();
        let span = obs::query_span(&id, &request.repo_id);
        let response = async {
            obs::emit_query_received(&id, &request.repo_id, request.question.len());

            let decision = self
                .router
                .route(&request.question, &request.repo_id, cancel)
                .await;
            obs::emit_query_routed(&decision);

            let results = self
                .scheduler
                .execute(&decision, &request, retrieval, cancel)
                .await;
            let response = assemble(request_id, decision, results);

            // Degraded answers are not reused; the next ask may do better.
            if self.config.cache.enabled && response.degraded.is_empty() && !cancel.is_cancelled()
            {
                self.cache.insert(key, response.clone()).await;
            }
            obs::emit_query_finished(
                &id,
                started.elapsed().as_millis() as u64,
                response.degraded.len(),
                false,
            );
            response
        }
        .instrument(span)
        .await;
        Ok(response)
    }

    /// Adversarial review of a caller-supplied bundle.
    #[instrument(skip_all, fields(files = code.files.len()))]
    pub async fn evaluate(
        &self,
        request_text: &str,
        code: &CodeBundle,
        tests: Option<&str>,
        context: &str,
        cancel: &CancellationToken,
    ) -> Result<EvaluationResult> {
        if request_text.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest("request_text is empty".into()));
        }
        if code.is_empty() {
            return Err(OrchestratorError::InvalidRequest("code_bundle has no files".into()));
        }
        let code = CodeBundle::bounded(code.files.iter().cloned(), self.config.bundle);
        let context = match tests.map(str::trim).filter(|t| !t.is_empty()) {
            Some(tests) => format!("{context}\n\nAccompanying tests:\n{tests}"),
            None => context.to_string(),
        };
        let evaluation = self
            .agents
            .evaluate(&code, request_text, &context, cancel)
            .await?;
        let c = &evaluation.controller;
        obs::emit_evaluation_decided(c.decision, c.final_score, c.confidence);
        Ok(evaluation)
    }

    /// Generate-test-repair loop for `request`.
    #[instrument(skip_all)]
    pub async fn refine(
        &self,
        request: &str,
        retrieval: Arc<dyn RetrievalService>,
        max_iterations: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<RefinementResult> {
        if request.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest("request is empty".into()));
        }
        let context = retrieve_context(
            &retrieval,
            request,
            &[],
            &self.config.retrieval,
            self.config.timeouts.retrieval_ms,
            cancel,
        )
        .await
        .unwrap_or_else(|_| RetrievedContext::default());
        let iterations = self.config.effective_iterations(max_iterations);
        Ok(self
            .agents
            .refine(self.sandbox.as_ref(), request, &context, iterations, cancel)
            .await)
    }

    /// Blast radius and risk of a change.
    #[instrument(skip_all, fields(changed = changed_files.len()))]
    pub async fn impact(
        &self,
        retrieval: Arc<dyn RetrievalService>,
        changed_files: &[String],
        code_changes: &str,
        cancel: &CancellationToken,
    ) -> Result<ImpactReport> {
        if changed_files.iter().all(|f| f.trim().is_empty()) {
            return Err(OrchestratorError::InvalidRequest("changed_files is empty".into()));
        }
        let report = match self
            .agents
            .analyze_impact(&retrieval, changed_files, code_changes, cancel)
            .await
        {
            Ok(report) => report,
            Err(e) => ImpactReport::fallback(
                changed_files.to_vec(),
                Vec::new(),
                format!("Impact analysis did not complete ({e})."),
            ),
        };
        Ok(report)
    }
}
