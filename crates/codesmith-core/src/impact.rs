//! Impact analysis: who else is touched by a change, and how risky it is.
//!
//! The blast radius comes from retrieval alone and survives a failed
//! classification call; only the risk level depends on the model.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::agents::Agents;
use crate::capabilities::{CallOptions, RetrievalService, RetrievedChunk};
use crate::domain::impact::{AffectedFile, ImpactReport, RiskLevel};
use crate::error::{OrchestratorError, Result};
use crate::json_repair::parse_lenient;
use crate::obs;
use crate::prompts;

const IMPACT_MAX_TOKENS: u32 = 1_024;
const MAX_REFERENCE_CHARS: usize = 6_000;

#[derive(Debug, Deserialize)]
struct WireImpact {
    risk_level: String,
    #[serde(default)]
    risks: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
}

/// Search term for a changed file: its stem (`src/auth/login.py` -> `login`).
pub fn module_name(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .filter(|s| !s.is_empty() && s != "mod" && s != "__init__" && s != "index")
        .or_else(|| {
            Path::new(path)
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|s| s.to_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| path.to_string())
}

impl Agents {
    /// Analyze `changed_files`. Fails only on cancellation.
    #[instrument(skip_all, fields(changed = changed_files.len()))]
    pub async fn analyze_impact(
        &self,
        retrieval: &Arc<dyn RetrievalService>,
        changed_files: &[String],
        code_changes: &str,
        cancel: &CancellationToken,
    ) -> Result<ImpactReport> {
        let cfg = &self.config;
        let mut seen = BTreeSet::new();
        let changed: Vec<String> = changed_files
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty() && seen.insert(f.clone()))
            .take(cfg.impact.max_files)
            .collect();
        let changed_set: BTreeSet<&str> = changed.iter().map(String::as_str).collect();

        let mut affected: Vec<AffectedFile> = Vec::new();
        let mut references = String::new();
        let mut retrieval_failed = false;
        for file in &changed {
            let module = module_name(file);
            let hits = match self
                .find_references(retrieval, &module, cfg.impact.references_per_file, cancel)
                .await
            {
                Ok(hits) => hits,
                Err(OrchestratorError::Cancelled) => return Err(OrchestratorError::Cancelled),
                Err(e) => {
                    warn!(file = %file, error = %e, "reference lookup failed");
                    retrieval_failed = true;
                    continue;
                }
            };
            for hit in hits {
                if changed_set.contains(hit.file_path.as_str()) {
                    continue;
                }
                if references.len() < MAX_REFERENCE_CHARS {
                    references.push_str(&format!(
                        "--- {}:{}\n{}\n",
                        hit.file_path, hit.line_range, hit.content
                    ));
                }
                if affected.iter().any(|a| a.path == hit.file_path) {
                    continue;
                }
                affected.push(AffectedFile {
                    reason: format!("references `{module}` (lines {})", hit.line_range),
                    path: hit.file_path,
                });
            }
        }
        debug!(affected = affected.len(), "blast radius computed");

        let reply = self
            .gateway
            .call(
                &cfg.providers.impact,
                &prompts::impact(&changed, code_changes, &references),
                CallOptions::json(IMPACT_MAX_TOKENS, cfg.timeouts.impact_ms),
                cancel,
            )
            .await;
        let raw = match reply {
            Ok(raw) => raw,
            Err(OrchestratorError::Cancelled) => return Err(OrchestratorError::Cancelled),
            Err(e) => {
                return Ok(ImpactReport::fallback(
                    changed,
                    affected,
                    format!("Risk classification unavailable ({e})."),
                ))
            }
        };
        let parsed = parse_lenient::<WireImpact>(&raw)
            .ok()
            .and_then(|w| RiskLevel::parse(&w.risk_level).map(|level| (level, w)));
        let Some((risk_level, wire)) = parsed else {
            return Ok(ImpactReport::fallback(
                changed,
                affected,
                "Risk classification returned an unreadable answer.",
            ));
        };

        obs::emit_impact_assessed(changed.len(), affected.len(), risk_level);
        let mut risks = wire.risks;
        if retrieval_failed {
            risks.push("Reference search was incomplete; indirect impact may be understated.".into());
        }
        Ok(ImpactReport {
            directly_changed: changed,
            indirectly_affected: affected,
            risk_level,
            risks,
            recommendations: wire.recommendations,
        })
    }

    async fn find_references(
        &self,
        retrieval: &Arc<dyn RetrievalService>,
        module: &str,
        k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievedChunk>> {
        let timeout = Duration::from_millis(self.config.timeouts.retrieval_ms.max(1));
        let lookup = tokio::time::timeout(timeout, retrieval.retrieve(module, k));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            r = lookup => match r {
                Ok(Ok(hits)) => Ok(hits),
                Ok(Err(e)) => Err(OrchestratorError::Retrieval(e)),
                Err(_) => Err(OrchestratorError::Retrieval(format!(
                    "timed out after {}ms",
                    timeout.as_millis()
                ))),
            },
        }
    }
}
