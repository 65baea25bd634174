//! Notification sinks subscribed to stored-record events.

use async_trait::async_trait;
use common::{env_secret, NotifyConfig};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::events::{EventBus, StoredEvent};

pub mod noop;
pub mod telegram;

pub use noop::NoopSink;
pub use telegram::TelegramBotSink;

/// Pluggable notification backend.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver one HTML-formatted message.
    async fn deliver(&self, message: &str) -> anyhow::Result<()>;
}

/// "🗞️ <b>Company</b>" header, the excerpt, and a link to the item. Values are HTML-escaped.
pub fn format_message(event: &StoredEvent) -> String {
    format!(
        "🗞️ <b>{}</b>\n{}...\n<a href='{}'>Read</a>",
        html_escape::encode_text(&event.company),
        html_escape::encode_text(&event.excerpt),
        html_escape::encode_single_quoted_attribute(&event.url),
    )
}

/// Telegram when both the bot token and the chat id are configured, no-op otherwise.
pub fn sink_from_config(cfg: Option<&NotifyConfig>) -> Arc<dyn NotificationSink> {
    let Some(cfg) = cfg else {
        return Arc::new(NoopSink);
    };
    match (env_secret(cfg.telegram_bot_token_env.as_deref()), cfg.telegram_chat_id.clone()) {
        (Some(token), Some(chat_id)) => {
            let mut sink = TelegramBotSink::new(token, chat_id);
            if let Some(base) = cfg.telegram_api_base.as_deref() {
                sink = sink.with_api_base(base);
            }
            Arc::new(sink)
        }
        _ => Arc::new(NoopSink),
    }
}

/// Delivers every stored event to the sink until the bus closes.
/// Delivery failures are logged and dropped.
pub fn spawn_dispatcher(bus: &EventBus, sink: Arc<dyn NotificationSink>) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    info!(sink = sink.name(), "notify: dispatcher started");
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = sink.deliver(&format_message(&event)).await {
                        warn!(sink = sink.name(), url = %event.url, error = %e, "notify: delivery failed");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(sink = sink.name(), skipped, "notify: dispatcher lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!(sink = sink.name(), "notify: dispatcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Source;

    #[test]
    fn message_is_escaped() {
        let event = StoredEvent {
            company: "AT&T".into(),
            excerpt: "<script>alert(1)</script> wins".into(),
            url: "https://a.example/?q='x'".into(),
            source: Source::Web,
        };
        let msg = format_message(&event);
        assert!(msg.starts_with("🗞️ <b>AT&amp;T</b>\n"));
        assert!(msg.contains("&lt;script&gt;"));
        assert!(!msg.contains("'x'"));
    }
}
