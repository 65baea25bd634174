use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};

pub const DEFAULT_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "mistral:7b-instruct-q4_K_M";

/// Local Ollama server, non-streaming `/api/generate`
pub struct OllamaProvider {
    host: String,
    model: String,
    default_timeout: Duration,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(host: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            model: model.into(),
            default_timeout: Duration::from_secs(120),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.default_timeout = Duration::from_secs(timeout_secs);
        self
    }
}

#[async_trait::async_trait]
impl LlmProvider for OllamaProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let body = GenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                num_ctx: request.context_window,
                num_predict: request.max_tokens,
            },
        };

        let url = format!("{}/api/generate", self.host);
        let response = tokio::time::timeout(timeout, self.client.post(&url).json(&body).send())
            .await
            .context("Ollama request timed out")?
            .context("Ollama HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API error {}: {}", status, text);
        }

        let resp: GenerateResponse = response.json().await.context("Failed to parse Ollama response")?;
        let prompt_tokens = resp.prompt_eval_count.unwrap_or(0);
        let completion_tokens = resp.eval_count.unwrap_or(0);

        Ok(LlmResponse {
            content: resp.response,
            usage: UsageMetadata {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            model: resp.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    async fn health(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.host);
        let response = tokio::time::timeout(Duration::from_secs(10), self.client.get(&url).send())
            .await
            .context("Ollama health check timed out")?
            .context("Ollama is unreachable")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama tags endpoint returned {}", response.status());
        }
        let tags: TagsResponse = response.json().await.context("Failed to parse Ollama tags")?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    model: Option<String>,
    #[serde(default)]
    response: String,
    prompt_eval_count: Option<usize>,
    eval_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}
