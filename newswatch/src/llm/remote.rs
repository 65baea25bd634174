use anyhow::{Context, Result};
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};

/// OpenAI-compatible chat-completions endpoint (OpenAI, vLLM, llama.cpp server, Ollama's `/v1`).
pub struct RemoteLlmProvider {
    chat_url: String,
    models_url: String,
    api_key: String,
    model: String,
    default_timeout: Duration,
    default_max_tokens: usize,
    default_temperature: f32,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    /// `chat_url` is the full completions URL, e.g. `https://api.openai.com/v1/chat/completions`.
    pub fn new(chat_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let chat_url = chat_url.into();
        Self {
            models_url: models_url_for(&chat_url),
            chat_url,
            api_key: api_key.into(),
            model: model.into(),
            default_timeout: Duration::from_secs(30),
            default_max_tokens: 500,
            default_temperature: 0.3,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_defaults(mut self, timeout_secs: u64, max_tokens: usize, temperature: f32) -> Self {
        self.default_timeout = Duration::from_secs(timeout_secs);
        self.default_max_tokens = max_tokens;
        self.default_temperature = temperature;
        self
    }

    async fn send(&self, request: RequestBuilder, timeout: Duration, what: &str) -> Result<Response> {
        let response = tokio::time::timeout(timeout, request.bearer_auth(&self.api_key).send())
            .await
            .with_context(|| format!("{} timed out after {:?}", what, timeout))?
            .with_context(|| format!("{} failed", what))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} returned {}: {}", what, status, body);
        }
        Ok(response)
    }
}

/// The models listing sits next to the completions route:
/// `.../v1/chat/completions` -> `.../v1/models`.
fn models_url_for(chat_url: &str) -> String {
    let root = chat_url
        .strip_suffix("/chat/completions")
        .or_else(|| chat_url.strip_suffix("/completions"))
        .unwrap_or_else(|| chat_url.trim_end_matches('/'));
    format!("{}/models", root)
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        // context_window has no chat-completions equivalent; the server decides
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens.unwrap_or(self.default_max_tokens),
            temperature: request.temperature.unwrap_or(self.default_temperature),
        };

        let response = self
            .send(self.client.post(&self.chat_url).json(&body), timeout, "LLM request")
            .await?;
        let parsed: ChatResponse = response.json().await.context("Failed to parse LLM response")?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("LLM response has no choices")?;

        let usage = parsed
            .usage
            .map(|u| UsageMetadata {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content,
            usage,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    async fn health(&self) -> Result<Vec<String>> {
        let response = self
            .send(self.client.get(&self.models_url), self.default_timeout, "LLM models listing")
            .await?;
        let listing: ModelsResponse = response.json().await.context("Failed to parse models listing")?;
        Ok(listing.data.into_iter().map(|m| m.id).collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Usage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}
