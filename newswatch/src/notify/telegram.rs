use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

use super::NotificationSink;

/// Telegram Bot API `sendMessage`, HTML parse mode.
pub struct TelegramBotSink {
    api_base: String,
    token: String,
    chat_id: String,
    http: reqwest::Client,
}

impl TelegramBotSink {
    pub fn new(token: String, chat_id: String) -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            token,
            chat_id,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl NotificationSink for TelegramBotSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn deliver(&self, message: &str) -> anyhow::Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let payload = json!({
            "chat_id": self.chat_id,
            "text": message,
            "parse_mode": "HTML",
        });

        let resp = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(10))
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Telegram sendMessage returned non-success");
            anyhow::bail!("Telegram sendMessage returned {status}");
        }
        Ok(())
    }
}
