//! Retrieval context: rerank, de-duplicate, pack into a prompt budget.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::capabilities::{RetrievalService, RetrievedChunk};
use crate::config::RetrievalConfig;
use crate::domain::response::Citation;
use crate::error::{OrchestratorError, Result};

/// Packed excerpts ready for a prompt, with the citations they back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    pub chunks: Vec<RetrievedChunk>,
    pub citations: Vec<Citation>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Render as fenced excerpts headed by `path:start-end`.
    pub fn render(&self) -> String {
        if self.chunks.is_empty() {
            return "(no repository context available)".to_string();
        }
        let mut out = String::new();
        for c in &self.chunks {
            out.push_str(&format!("--- {}:{}\n{}\n", c.file_path, c.line_range, c.content));
        }
        out
    }
}

fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() >= 3)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Fraction of query terms that occur in the chunk (path included).
fn term_overlap(query_terms: &BTreeSet<String>, chunk: &RetrievedChunk) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let haystack = format!("{} {}", chunk.file_path, chunk.content).to_lowercase();
    let hits = query_terms
        .iter()
        .filter(|t| haystack.contains(t.as_str()))
        .count();
    hits as f32 / query_terms.len() as f32
}

/// Rerank, drop duplicate `(file, range)` pairs, and pack within the budget.
///
/// Hinted files get a small boost so user-named files surface first.
pub fn build_context(
    query: &str,
    hints: &[String],
    chunks: Vec<RetrievedChunk>,
    config: &RetrievalConfig,
) -> RetrievedContext {
    let query_terms = terms(query);
    let mut scored: Vec<(f32, RetrievedChunk)> = chunks
        .into_iter()
        .map(|c| {
            let semantic = c.score.clamp(0.0, 1.0);
            let mut score = config.lexical_weight * term_overlap(&query_terms, &c)
                + config.semantic_weight * semantic;
            if hints.iter().any(|h| c.file_path.ends_with(h.as_str())) {
                score += 0.1;
            }
            (score, c)
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut seen = HashSet::new();
    let mut budget = config.max_context_chars;
    let mut out = RetrievedContext::default();
    for (_, chunk) in scored {
        if !seen.insert((chunk.file_path.clone(), chunk.line_range)) {
            continue;
        }
        let len = chunk.content.chars().count();
        if len > budget {
            continue;
        }
        budget -= len;
        out.citations.push(Citation {
            file_path: chunk.file_path.clone(),
            line_range: chunk.line_range,
        });
        out.chunks.push(chunk);
    }
    out
}

/// Query the retrieval service under a timeout and build the context.
///
/// A retrieval failure degrades to an empty context; only cancellation is
/// returned as an error.
pub async fn retrieve_context(
    retrieval: &Arc<dyn RetrievalService>,
    query: &str,
    hints: &[String],
    config: &RetrievalConfig,
    timeout_ms: u64,
    cancel: &CancellationToken,
) -> Result<RetrievedContext> {
    let search = if hints.is_empty() {
        query.to_string()
    } else {
        format!("{query} {}", hints.join(" "))
    };
    let call = tokio::time::timeout(
        Duration::from_millis(timeout_ms.max(1)),
        retrieval.retrieve(&search, config.k),
    );
    let fetched = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
        r = call => r,
    };
    let chunks = match fetched {
        Ok(Ok(chunks)) => chunks,
        Ok(Err(e)) => {
            warn!(error = %e, "retrieval failed; continuing without context");
            Vec::new()
        }
        Err(_) => {
            warn!(timeout_ms, "retrieval timed out; continuing without context");
            Vec::new()
        }
    };
    let context = build_context(query, hints, chunks, config);
    debug!(chunks = context.chunks.len(), "context built");
    Ok(context)
}
