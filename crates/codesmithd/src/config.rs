//! Daemon settings: the orchestrator sections plus a `[daemon]` table.
//!
//! ```toml
//! [evaluator]
//! accept_threshold = 8.0
//!
//! [daemon]
//! bind = "127.0.0.1:7070"
//!
//! [daemon.model]
//! base_url = "http://localhost:11434/v1"
//! api_key_env = "CODESMITH_API_KEY"
//!
//! [daemon.model.models]
//! fast = "qwen2.5-coder:3b"
//! large = "qwen2.5-coder:32b"
//!
//! [daemon.repos.billing]
//! retrieval_url = "http://localhost:9100/repos/billing/search"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use codesmith_core::{OrchestratorConfig, ProcessSandboxConfig};
use serde::{Deserialize, Serialize};

/// OpenAI-compatible chat completions endpoint shared by every provider id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelEndpointConfig {
    pub base_url: String,
    /// Name of the environment variable holding the bearer token, if any.
    pub api_key_env: Option<String>,
    /// Provider id -> model name. Unlisted ids are sent as the model name.
    pub models: BTreeMap<String, String>,
}

impl Default for ModelEndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            api_key_env: None,
            models: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Search endpoint answering `POST {query, k}` with ranked chunks.
    pub retrieval_url: String,
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_ms: u64,
}

fn default_retrieval_timeout() -> u64 {
    5_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub bind: String,
    pub model: ModelEndpointConfig,
    pub repos: BTreeMap<String, RepoConfig>,
    pub sandbox: ProcessSandboxConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7070".to_string(),
            model: ModelEndpointConfig::default(),
            repos: BTreeMap::new(),
            sandbox: ProcessSandboxConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DaemonSection {
    #[serde(default)]
    daemon: DaemonConfig,
}

/// Everything the daemon reads from its config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub orchestrator: OrchestratorConfig,
    pub daemon: DaemonConfig,
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let orchestrator = OrchestratorConfig::from_toml_str(text)?;
        let section: DaemonSection = toml::from_str(text).context("invalid [daemon] section")?;
        let settings = Self {
            orchestrator,
            daemon: section.daemon,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path`, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        for (repo_id, repo) in &self.daemon.repos {
            if repo.retrieval_url.trim().is_empty() {
                bail!("repo {repo_id:?} has an empty retrieval_url");
            }
        }
        if self.daemon.model.base_url.trim().is_empty() {
            bail!("daemon.model.base_url is empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_section_and_core_sections_parse_together() {
        let settings = Settings::from_toml_str(
            r#"
            [evaluator]
            accept_threshold = 9.0

            [daemon]
            bind = "0.0.0.0:9000"

            [daemon.model.models]
            fast = "small-model"

            [daemon.repos.billing]
            retrieval_url = "http://search/billing"
            "#,
        )
        .unwrap();
        assert_eq!(settings.orchestrator.evaluator.accept_threshold, 9.0);
        assert_eq!(settings.daemon.bind, "0.0.0.0:9000");
        assert_eq!(settings.daemon.model.models["fast"], "small-model");
        assert_eq!(settings.daemon.repos["billing"].timeout_ms, 5_000);
    }

    #[test]
    fn test_empty_retrieval_url_rejected() {
        let err = Settings::from_toml_str(
            r#"
            [daemon.repos.r]
            retrieval_url = " "
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("retrieval_url"));
    }

    #[test]
    fn test_no_path_means_defaults() {
        let settings = Settings::load(None).unwrap();
        assert!(settings.daemon.repos.is_empty());
    }
}
