use anyhow::{Context, Result};
use common::LlmConfig;
use std::sync::Arc;

pub mod ollama;
pub mod remote;

/// Core trait for LLM providers (local or remote)
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate completion for a given prompt
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Reachability probe. Returns the models the endpoint serves.
    async fn health(&self) -> Result<Vec<String>>;

    /// Model name used for generation
    fn model(&self) -> &str;
}

/// Request structure for LLM generation
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    /// Context window size in tokens, for engines that take one per request
    pub context_window: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// The span from the first `{` to the last `}`, if there is one.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Builds the configured provider. Secrets come from the environment variable named in config.
pub fn create_provider(llm_config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let adapter = llm_config.adapter.as_deref().unwrap_or("ollama");
    match adapter {
        "ollama" => {
            let cfg = llm_config.ollama.clone().unwrap_or_default();
            let provider = ollama::OllamaProvider::new(
                cfg.host.unwrap_or_else(|| ollama::DEFAULT_HOST.to_string()),
                cfg.model.unwrap_or_else(|| ollama::DEFAULT_MODEL.to_string()),
            )
            .with_timeout(cfg.timeout_seconds.unwrap_or(120));
            Ok(Arc::new(provider))
        }
        "remote" => {
            let cfg = llm_config
                .remote
                .clone()
                .context("Remote adapter selected but [llm.remote] is missing")?;
            let api_key_env = cfg
                .api_key_env
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("Missing api_key_env in remote config"))?;
            let api_key = std::env::var(api_key_env)
                .with_context(|| format!("LLM API key env var '{}' not set", api_key_env))?;

            let provider = remote::RemoteLlmProvider::new(
                cfg.api_url
                    .unwrap_or_else(|| "http://localhost:11434/v1/chat/completions".to_string()),
                api_key,
                cfg.model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
            )
            .with_defaults(cfg.timeout_seconds.unwrap_or(30), cfg.max_tokens.unwrap_or(500), 0.3);
            Ok(Arc::new(provider))
        }
        _ => anyhow::bail!("Unknown LLM adapter type: {}", adapter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_object_span() {
        assert_eq!(
            extract_json_object("Sure! {\"a\": {\"b\": 1}} hope it helps"),
            Some("{\"a\": {\"b\": 1}}")
        );
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn unknown_adapter_is_rejected() {
        let cfg = LlmConfig {
            adapter: Some("carrier-pigeon".to_string()),
            ..LlmConfig::default()
        };
        assert!(create_provider(&cfg).is_err());
    }
}
