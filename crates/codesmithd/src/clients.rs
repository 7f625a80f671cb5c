//! HTTP implementations of the model and retrieval capabilities.

use std::time::Duration;

use async_trait::async_trait;
use codesmith_core::{CallOptions, ModelCaller, ModelError, ProviderId, RetrievalService, RetrievedChunk};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ModelEndpointConfig, RepoConfig};

// ---------------------------------------------------------------------------
// HttpModelCaller
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Model caller for an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpModelCaller {
    client: Client,
    config: ModelEndpointConfig,
    api_key: Option<String>,
}

impl HttpModelCaller {
    pub fn new(config: ModelEndpointConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty());
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn model_for<'a>(&'a self, provider: &'a ProviderId) -> &'a str {
        self.config
            .models
            .get(provider.as_str())
            .map(String::as_str)
            .unwrap_or(provider.as_str())
    }
}

fn transport_error(err: reqwest::Error) -> ModelError {
    if err.is_timeout() {
        ModelError::Timeout
    } else {
        ModelError::Provider(err.to_string())
    }
}

#[async_trait]
impl ModelCaller for HttpModelCaller {
    async fn call(
        &self,
        provider: &ProviderId,
        prompt: &str,
        options: CallOptions,
    ) -> Result<String, ModelError> {
        let body = ChatRequest {
            model: self.model_for(provider),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: options.max_tokens,
            temperature: 0.2,
            response_format: options.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };
        let mut request = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .timeout(Duration::from_millis(options.timeout_ms.max(1)))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ModelError::Provider(format!(
                "{status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }
        let parsed: ChatResponse = response.json().await.map_err(transport_error)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::Provider("response has no choices".into()))?;
        debug!(provider = %provider, chars = content.len(), "model replied");
        Ok(content)
    }
}

// ---------------------------------------------------------------------------
// HttpRetrievalService
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    k: usize,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Wrapped { chunks: Vec<RetrievedChunk> },
    Bare(Vec<RetrievedChunk>),
}

/// Retrieval over a per-repository search endpoint.
pub struct HttpRetrievalService {
    client: Client,
    config: RepoConfig,
}

impl HttpRetrievalService {
    pub fn new(client: Client, config: RepoConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl RetrievalService for HttpRetrievalService {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, String> {
        let response = self
            .client
            .post(&self.config.retrieval_url)
            .timeout(Duration::from_millis(self.config.timeout_ms.max(1)))
            .json(&SearchRequest { query, k })
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("search returned {}", response.status()));
        }
        let chunks = match response
            .json::<SearchResponse>()
            .await
            .map_err(|e| e.to_string())?
        {
            SearchResponse::Wrapped { chunks } | SearchResponse::Bare(chunks) => chunks,
        };
        Ok(chunks.into_iter().take(k).collect())
    }
}
