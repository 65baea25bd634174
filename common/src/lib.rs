/*!
common/src/lib.rs

Shared configuration types and DB helper functions for newswatch.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader merging a default file with an override file
- Helpers to initialize and migrate the SQLite record store
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/newswatch.db")
    pub path: String,
}

/// Ollama endpoint config (used if `llm.adapter = "ollama"`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub host: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// OpenAI-compatible endpoint config (used if `llm.adapter = "remote"`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
}

/// LLM top-level config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub adapter: Option<String>, // "ollama", "remote"
    pub ollama: Option<OllamaConfig>,
    pub remote: Option<RemoteLlmConfig>,
}

/// Normalization worker settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Human readable language name used in the prompt, e.g. "Russian"
    pub target_language: Option<String>,
    /// Script checked by the language gate: "cyrillic", "latin", "greek", "arabic", "hebrew", "han"
    pub target_script: Option<String>,
    pub max_prompt_chars: Option<usize>,
    pub temperature: Option<f32>,
    pub context_window: Option<u32>,
    /// Max normalize-and-persist jobs running at once
    pub concurrency: Option<usize>,
}

/// Web (RSS/HTML) fetcher settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebSourceConfig {
    pub fetch_timeout_seconds: Option<u64>,
    pub max_links_per_page: Option<usize>,
    pub max_text_chars: Option<usize>,
    pub user_agent: Option<String>,
}

/// Messaging channel fetcher settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelSourceConfig {
    /// Base URL of the public channel preview, default "https://t.me"
    pub base_url: Option<String>,
    pub max_messages: Option<usize>,
    /// Concurrent users of the shared session
    pub session_permits: Option<usize>,
    pub fetch_timeout_seconds: Option<u64>,
}

/// Discussion forum fetcher settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForumSourceConfig {
    pub client_id_env: Option<String>,
    pub client_secret_env: Option<String>,
    pub username_env: Option<String>,
    pub password_env: Option<String>,
    pub user_agent: Option<String>,
    pub limit_per_community: Option<usize>,
    /// hour, day, week, month, year, all
    pub time_filter: Option<String>,
    pub polite_delay_ms: Option<u64>,
    pub fetch_timeout_seconds: Option<u64>,
    /// Overrides for tests / proxies
    pub public_base_url: Option<String>,
    pub oauth_base_url: Option<String>,
    pub token_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub web: Option<WebSourceConfig>,
    pub channel: Option<ChannelSourceConfig>,
    pub forum: Option<ForumSourceConfig>,
}

/// Retry policy for one source job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: Option<u32>,
    pub delay_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrySection {
    pub web: Option<RetryConfig>,
    pub channel: Option<RetryConfig>,
    pub forum: Option<RetryConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub retry: Option<RetrySection>,
}

/// Notification sink settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_api_base: Option<String>,
}

/// HTTP surface settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: Option<String>,
    pub port: Option<u16>,
}

/// A company watched on a fixed interval by the background worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub company: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub communities: Vec<String>,
    /// "web", "channel", "forum"; defaults to web + channel, plus forum when communities are set
    pub sources: Option<Vec<String>>,
    pub interval_hours: Option<u64>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: Option<LlmConfig>,
    pub normalize: Option<NormalizeConfig>,
    pub sources: Option<SourcesConfig>,
    pub orchestrator: Option<OrchestratorConfig>,
    pub notify: Option<NotifyConfig>,
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    pub fn sources(&self) -> SourcesConfig {
        self.sources.clone().unwrap_or_default()
    }

    pub fn normalize(&self) -> NormalizeConfig {
        self.normalize.clone().unwrap_or_default()
    }

    pub fn retry(&self) -> RetrySection {
        self.orchestrator
            .as_ref()
            .and_then(|o| o.retry.clone())
            .unwrap_or_default()
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Read a secret from the environment variable named in config.
/// Returns `None` when no variable is configured or it is unset/empty.
pub fn env_secret(var_name: Option<&str>) -> Option<String> {
    let name = var_name?;
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Run SQL migrations using sqlx's migration macro.
/// Migrations live in the workspace-level `migrations` directory.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../migrations")
        .run(pool)
        .await
        .context("Failed to run sqlx migrations")?;

    Ok(())
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory and the DB file if necessary and returns a pool in WAL
/// mode. A modest pool size keeps this usable on small devices:
/// - max_connections: 5
///
/// Example:
///   let pool = init_db_pool("data/newswatch.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}
