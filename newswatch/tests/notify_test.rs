use mockito::Matcher;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use newswatch::events::{EventBus, StoredEvent};
use newswatch::model::Source;
use newswatch::notify::{format_message, spawn_dispatcher, NotificationSink, TelegramBotSink};

fn event(url: &str) -> StoredEvent {
    StoredEvent {
        company: "Tesla".to_string(),
        excerpt: "Tesla открыла новый завод.".to_string(),
        url: url.to_string(),
        source: Source::Web,
    }
}

#[tokio::test]
async fn telegram_sink_posts_html_message() {
    let mut server = mockito::Server::new_async().await;
    let message = format_message(&event("https://news.example.com/a"));
    let send = server
        .mock("POST", "/bottok-1/sendMessage")
        .match_body(Matcher::Json(json!({
            "chat_id": "-100200",
            "text": message,
            "parse_mode": "HTML",
        })))
        .with_status(200)
        .with_body(r#"{"ok": true}"#)
        .create_async()
        .await;

    let sink = TelegramBotSink::new("tok-1".to_string(), "-100200".to_string()).with_api_base(&server.url());
    sink.deliver(&message).await.unwrap();
    send.assert_async().await;
}

#[tokio::test]
async fn telegram_sink_reports_api_errors() {
    let mut server = mockito::Server::new_async().await;
    let _send = server
        .mock("POST", "/bottok-1/sendMessage")
        .with_status(400)
        .with_body(r#"{"ok": false, "description": "chat not found"}"#)
        .create_async()
        .await;

    let sink = TelegramBotSink::new("tok-1".to_string(), "nope".to_string()).with_api_base(&server.url());
    let err = sink.deliver("hello").await.unwrap_err();
    assert!(err.to_string().contains("400"));
}

/// Fails on the first delivery, records the rest.
struct FlakySink {
    calls: AtomicUsize,
    delivered: mpsc::UnboundedSender<String>,
}

#[async_trait::async_trait]
impl NotificationSink for FlakySink {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn deliver(&self, message: &str) -> anyhow::Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            anyhow::bail!("sink unavailable");
        }
        self.delivered.send(message.to_string())?;
        Ok(())
    }
}

#[tokio::test]
async fn dispatcher_survives_delivery_failures() {
    let bus = EventBus::new(16);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink = Arc::new(FlakySink {
        calls: AtomicUsize::new(0),
        delivered: tx,
    });
    let _dispatcher = spawn_dispatcher(&bus, sink.clone());

    bus.publish(event("https://news.example.com/lost"));
    bus.publish(event("https://news.example.com/kept"));

    let delivered = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("delivery in time")
        .expect("message");
    assert!(delivered.contains("https://news.example.com/kept"));
    assert!(delivered.contains("<b>Tesla</b>"));
    assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
}
