use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::model::{PersistedRecord, Source};
use crate::scraping::truncate_chars;

const EXCERPT_CHARS: usize = 100;

/// Emitted once per newly stored record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEvent {
    pub company: String,
    pub excerpt: String,
    pub url: String,
    pub source: Source,
}

impl StoredEvent {
    pub fn from_record(record: &PersistedRecord) -> Self {
        Self {
            company: record.company.clone(),
            excerpt: excerpt_for(&record.summary, &record.title),
            url: record.url.clone(),
            source: record.source,
        }
    }
}

/// At most 100 characters of the summary, or of the title when the summary is empty.
pub fn excerpt_for(summary: &str, title: &str) -> String {
    let text = match summary.trim() {
        "" => title.trim(),
        summary => summary,
    };
    truncate_chars(text, EXCERPT_CHARS)
}

/// Fan-out of post-persistence events to any number of subscribers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoredEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoredEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: StoredEvent) {
        if self.tx.send(event).is_err() {
            debug!("events: no subscribers for stored event");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_prefers_summary() {
        assert_eq!(excerpt_for("Короткое резюме.", "Title"), "Короткое резюме.");
        let long_title = "t".repeat(150);
        assert_eq!(excerpt_for("  ", &long_title).len(), 100);
    }

    #[test]
    fn long_summary_is_capped() {
        let summary = "Компания открыла завод. ".repeat(20);
        let excerpt = excerpt_for(&summary, "Title");
        assert_eq!(excerpt.chars().count(), 100);
        assert!(summary.starts_with(&excerpt));
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(StoredEvent {
            company: "Apple".into(),
            excerpt: "x".into(),
            url: "https://a.example/1".into(),
            source: Source::Web,
        });
        let got = rx.recv().await.expect("event");
        assert_eq!(got.url, "https://a.example/1");
    }
}
