//! Model-backed agents.
//!
//! Each agent is one guarded model call plus parsing. Agents return
//! `Result`; the scheduler turns an error into an unavailable marker.

pub mod decompose;
pub mod explain;
pub mod generate;
pub mod tester;

use std::sync::Arc;

use serde::Deserialize;

use crate::config::OrchestratorConfig;
use crate::domain::bundle::{BundleLimits, CodeBundle, CodeFile};
use crate::guard::ModelGateway;

/// Shared handle the agents run against. Cheap to clone into tasks.
#[derive(Clone)]
pub struct Agents {
    pub(crate) gateway: Arc<ModelGateway>,
    pub(crate) config: Arc<OrchestratorConfig>,
}

impl Agents {
    pub fn new(gateway: Arc<ModelGateway>, config: Arc<OrchestratorConfig>) -> Self {
        Self { gateway, config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<ModelGateway> {
        &self.gateway
    }
}

/// A file as models are asked to emit it.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireFile {
    #[serde(alias = "path", alias = "filename")]
    pub file_path: String,
    #[serde(alias = "code")]
    pub content: String,
}

pub(crate) fn bundle_from_wire(files: Vec<WireFile>, limits: BundleLimits) -> CodeBundle {
    CodeBundle::bounded(
        files
            .into_iter()
            .filter(|f| !f.file_path.trim().is_empty())
            .map(|f| CodeFile::new(f.file_path.trim(), f.content)),
        limits,
    )
}

/// Bodies of the fenced code blocks in `text`, with their info strings.
pub(crate) fn fenced_blocks(text: &str) -> Vec<(String, String)> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let (info, body_start) = match after.find('\n') {
            Some(nl) => (after[..nl].trim().to_string(), nl + 1),
            None => break,
        };
        let body = &after[body_start..];
        match body.find("```") {
            Some(close) => {
                blocks.push((info, body[..close].trim_end().to_string()));
                rest = &body[close + 3..];
            }
            None => {
                // Unterminated fence: the model ran out of tokens.
                blocks.push((info, body.trim_end().to_string()));
                break;
            }
        }
    }
    blocks
}

/// The first fenced block, or the whole text when there is none.
pub(crate) fn unfence(text: &str) -> String {
    fenced_blocks(text)
        .into_iter()
        .next()
        .map(|(_, body)| body)
        .unwrap_or_else(|| text.trim().to_string())
}

#[cfg(test)]
pub(crate) fn test_agents(caller: Arc<crate::fakes::ScriptedModelCaller>) -> Agents {
    let config = Arc::new(OrchestratorConfig::default());
    Agents::new(
        Arc::new(ModelGateway::new(caller, config.breaker.clone())),
        config,
    )
}
