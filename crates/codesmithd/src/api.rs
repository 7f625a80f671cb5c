//! HTTP surface.
//!
//! Agent failures never change the status code: a degraded pipeline still
//! answers 200 with `Unavailable` markers. Only malformed bodies (400) and
//! unknown repositories (404) are rejected.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use codesmith_core::{
    CodeBundle, CodeFile, EvaluationResult, ImpactReport, OrchestrationResponse, Orchestrator,
    ProcessSandbox, QueryRequest, RefinementResult, RetrievalService,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::clients::{HttpModelCaller, HttpRetrievalService};
use crate::config::Settings;
use crate::error::{ApiError, ApiResult};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    repos: Arc<HashMap<String, Arc<dyn RetrievalService>>>,
    /// Cancelled on shutdown; every request runs under a child of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        repos: HashMap<String, Arc<dyn RetrievalService>>,
    ) -> Self {
        Self {
            orchestrator,
            repos: Arc::new(repos),
            shutdown: CancellationToken::new(),
        }
    }

    /// Wire the HTTP clients and the process sandbox from `settings`.
    pub fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let caller = Arc::new(HttpModelCaller::new(settings.daemon.model.clone())?);
        let sandbox = Arc::new(ProcessSandbox::new(settings.daemon.sandbox.clone())?);
        let orchestrator = Orchestrator::new(settings.orchestrator, caller, sandbox)?;

        let client = reqwest::Client::builder().build()?;
        let repos = settings
            .daemon
            .repos
            .into_iter()
            .map(|(id, repo)| {
                let service: Arc<dyn RetrievalService> =
                    Arc::new(HttpRetrievalService::new(client.clone(), repo));
                (id, service)
            })
            .collect();
        Ok(Self::new(Arc::new(orchestrator), repos))
    }

    fn retrieval(&self, repo_id: &str) -> ApiResult<Arc<dyn RetrievalService>> {
        self.repos
            .get(repo_id)
            .cloned()
            .ok_or_else(|| ApiError::UnknownRepo(repo_id.to_string()))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/route+explain+generate", post(smart))
        .route("/smart", post(smart))
        .route("/evaluate", post(evaluate))
        .route("/refine", post(refine))
        .route("/impact", post(impact))
        .route("/health", get(health))
        .with_state(state)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn smart(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<Json<OrchestrationResponse>> {
    let request = body(payload)?;
    let retrieval = state.retrieval(&request.repo_id)?;
    let cancel = state.shutdown.child_token();
    let response = state
        .orchestrator
        .handle_query(request, retrieval, &cancel)
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct WireFile {
    #[serde(alias = "path", alias = "filename")]
    file_path: String,
    #[serde(alias = "code")]
    content: String,
}

/// A bundle as callers send it: `{files: [...]}`, a bare file list, or raw text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireBundle {
    Files { files: Vec<WireFile> },
    List(Vec<WireFile>),
    Text(String),
}

impl WireBundle {
    fn into_files(self) -> Vec<CodeFile> {
        match self {
            WireBundle::Files { files } | WireBundle::List(files) => files
                .into_iter()
                .map(|f| CodeFile::new(f.file_path, f.content))
                .collect(),
            WireBundle::Text(text) if text.trim().is_empty() => Vec::new(),
            WireBundle::Text(text) => vec![CodeFile::new("snippet.py", text)],
        }
    }
}

#[derive(Debug, Deserialize)]
struct EvaluateBody {
    request_text: String,
    code_bundle: WireBundle,
    #[serde(default)]
    tests_text: Option<String>,
    #[serde(default)]
    context: Option<String>,
}

async fn evaluate(
    State(state): State<AppState>,
    payload: Result<Json<EvaluateBody>, JsonRejection>,
) -> ApiResult<Json<EvaluationResult>> {
    let req = body(payload)?;
    let code = CodeBundle::bounded(
        req.code_bundle.into_files(),
        state.orchestrator.config().bundle,
    );
    let cancel = state.shutdown.child_token();
    let result = state
        .orchestrator
        .evaluate(
            &req.request_text,
            &code,
            req.tests_text.as_deref(),
            req.context.as_deref().unwrap_or_default(),
            &cancel,
        )
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct RefineBody {
    repo_id: String,
    request: String,
    #[serde(default)]
    max_iterations: Option<u32>,
}

async fn refine(
    State(state): State<AppState>,
    payload: Result<Json<RefineBody>, JsonRejection>,
) -> ApiResult<Json<RefinementResult>> {
    let req = body(payload)?;
    let retrieval = state.retrieval(&req.repo_id)?;
    let cancel = state.shutdown.child_token();
    let result = state
        .orchestrator
        .refine(&req.request, retrieval, req.max_iterations, &cancel)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct ImpactBody {
    repo_id: String,
    changed_files: Vec<String>,
    #[serde(default)]
    code_changes: String,
}

async fn impact(
    State(state): State<AppState>,
    payload: Result<Json<ImpactBody>, JsonRejection>,
) -> ApiResult<Json<ImpactReport>> {
    let req = body(payload)?;
    let retrieval = state.retrieval(&req.repo_id)?;
    let cancel = state.shutdown.child_token();
    let report = state
        .orchestrator
        .impact(retrieval, &req.changed_files, &req.code_changes, &cancel)
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
