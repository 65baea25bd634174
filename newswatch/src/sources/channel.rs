use anyhow::Context;
use chrono::{DateTime, Utc};
use common::ChannelSourceConfig;
use reqwest::{Client, StatusCode};
use scraper::Html;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{is_stale, SourceFetcher, MAX_ITEM_TEXT_CHARS};
use crate::error::FetchError;
use crate::ingestion::http_client;
use crate::model::{ItemExtras, RawItem, Source};
use crate::scraping::{clean_text, element_text, selector};

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);
const MAX_PREVIEW_PAGES: usize = 10;

static SYNONYMS: [(&str, &[&str]); 4] = [
    ("apple", &["iphone", "ipad", "macos", "iwatch", "airpods", "mac", "ios", "aapl", "tim cook"]),
    ("nvidia", &["rtx", "geforce", "cuda", "nvda", "jensen huang"]),
    ("microsoft", &["windows", "azure", "msft", "satya nadella"]),
    ("tesla", &["elon musk", "model s", "model 3", "tsla", "cybertruck"]),
];

/// One message as returned by a channel provider
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub id: u64,
    pub text: String,
    pub date: Option<DateTime<Utc>>,
    pub views: Option<i64>,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel session not authorized: {0}")]
    Unauthorized(String),
    #[error("channel provider asked to wait {0:?}")]
    RateLimited(Duration),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Access to a messaging network's public channels.
#[async_trait::async_trait]
pub trait ChannelProvider: Send + Sync {
    async fn ensure_authorized(&self) -> Result<(), ChannelError>;

    /// Up to `limit` most recent messages, newest first.
    async fn recent_messages(&self, channel: &str, limit: usize) -> Result<Vec<ChannelMessage>, ChannelError>;
}

/// Case-insensitive match on the company name or a known product, ticker or executive.
pub fn is_relevant_to_company(text: &str, company: &str) -> bool {
    if text.is_empty() || company.is_empty() {
        return false;
    }
    let text = text.to_lowercase();
    let company = company.to_lowercase();
    if text.contains(&company) {
        return true;
    }
    SYNONYMS
        .iter()
        .find(|(name, _)| *name == company)
        .map(|(_, words)| words.iter().any(|w| text.contains(w)))
        .unwrap_or(false)
}

pub struct ChannelFetcher {
    provider: Arc<dyn ChannelProvider>,
    session: Arc<Semaphore>,
    max_messages: usize,
}

impl ChannelFetcher {
    pub fn new(provider: Arc<dyn ChannelProvider>, session: Arc<Semaphore>, max_messages: usize) -> Self {
        Self {
            provider,
            session,
            max_messages,
        }
    }

    fn to_items(&self, company: &str, handle: &str, messages: Vec<ChannelMessage>, since: Option<DateTime<Utc>>) -> Vec<RawItem> {
        let mut items = Vec::new();
        for msg in messages {
            if msg.text.trim().is_empty() {
                continue;
            }
            let Some(date) = msg.date else { continue };
            if is_stale(Some(date), since) {
                break;
            }
            if !is_relevant_to_company(&msg.text, company) {
                continue;
            }
            items.push(RawItem {
                source: Source::Channel,
                company: company.to_string(),
                title: String::new(),
                text: clean_text(&msg.text, MAX_ITEM_TEXT_CHARS),
                url: msg.url,
                published_at: Some(date),
                extras: ItemExtras {
                    views: msg.views,
                    community: Some(format!("@{}", handle)),
                    ..ItemExtras::default()
                },
            });
        }
        items
    }
}

#[async_trait::async_trait]
impl SourceFetcher for ChannelFetcher {
    fn source(&self) -> Source {
        Source::Channel
    }

    async fn fetch(
        &self,
        company: &str,
        targets: &[String],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawItem>, FetchError> {
        let _permit = self
            .session
            .acquire()
            .await
            .context("channel session semaphore closed")?;

        if let Err(e) = self.provider.ensure_authorized().await {
            return Err(match e {
                ChannelError::RateLimited(wait) => FetchError::RateLimited {
                    provider: Source::Channel,
                    wait,
                    partial: Vec::new(),
                },
                other => FetchError::Unauthorized {
                    provider: Source::Channel,
                    message: other.to_string(),
                },
            });
        }

        let mut items = Vec::new();
        for target in targets {
            let handle = target.trim().trim_start_matches('@');
            if handle.is_empty() {
                continue;
            }
            match self.provider.recent_messages(handle, self.max_messages).await {
                Ok(messages) => {
                    let fetched = messages.len();
                    let found = self.to_items(company, handle, messages, since);
                    info!(%company, channel = %handle, fetched, relevant = found.len(), "channel: messages scanned");
                    items.extend(found);
                }
                Err(ChannelError::RateLimited(wait)) => {
                    warn!(%company, channel = %handle, ?wait, kept = items.len(), "channel: rate limited, stopping");
                    return Err(FetchError::RateLimited {
                        provider: Source::Channel,
                        wait,
                        partial: items,
                    });
                }
                Err(ChannelError::Unauthorized(message)) => {
                    return Err(FetchError::Unauthorized {
                        provider: Source::Channel,
                        message,
                    });
                }
                Err(ChannelError::Other(e)) => {
                    warn!(%company, channel = %handle, error = %e, "channel: failed to read channel, continuing");
                }
            }
        }
        Ok(items)
    }
}

/// Reads the public web preview of a channel (`{base}/s/{channel}`). Needs no session.
pub struct TelegramPreviewProvider {
    client: Client,
    base_url: String,
}

impl TelegramPreviewProvider {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs, None)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(cfg: &ChannelSourceConfig) -> anyhow::Result<Self> {
        Self::new(
            cfg.base_url.clone().unwrap_or_else(|| "https://t.me".to_string()),
            cfg.fetch_timeout_seconds.unwrap_or(10),
        )
    }

    async fn fetch_page(&self, channel: &str, before: Option<u64>) -> Result<Vec<ChannelMessage>, ChannelError> {
        let mut url = format!("{}/s/{}", self.base_url, channel);
        if let Some(id) = before {
            url.push_str(&format!("?before={}", id));
        }

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to fetch channel preview {}", url))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let wait = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(ChannelError::RateLimited(wait));
        }
        if !status.is_success() {
            return Err(ChannelError::Other(anyhow::anyhow!(
                "channel preview {} returned status {}",
                url,
                status
            )));
        }

        let body = response.text().await.context("failed to read channel preview body")?;
        Ok(parse_preview_page(&body, &self.base_url))
    }
}

#[async_trait::async_trait]
impl ChannelProvider for TelegramPreviewProvider {
    async fn ensure_authorized(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn recent_messages(&self, channel: &str, limit: usize) -> Result<Vec<ChannelMessage>, ChannelError> {
        let mut messages: Vec<ChannelMessage> = Vec::new();
        let mut before = None;

        for _ in 0..MAX_PREVIEW_PAGES {
            let page = self.fetch_page(channel, before).await?;
            let Some(oldest) = page.iter().map(|m| m.id).min() else { break };
            messages.extend(page);
            if messages.len() >= limit || oldest <= 1 {
                break;
            }
            before = Some(oldest);
        }

        messages.sort_by(|a, b| b.id.cmp(&a.id));
        messages.dedup_by_key(|m| m.id);
        messages.truncate(limit);
        debug!(%channel, count = messages.len(), "channel: preview messages read");
        Ok(messages)
    }
}

/// Parses the messages of one channel preview page, in page order (oldest first).
pub fn parse_preview_page(html: &str, base_url: &str) -> Vec<ChannelMessage> {
    let document = Html::parse_document(html);
    let (Some(message_sel), Some(text_sel), Some(fallback_text_sel), Some(time_sel), Some(views_sel)) = (
        selector("div.tgme_widget_message[data-post]"),
        selector(".js-message_text"),
        selector(".tgme_widget_message_text"),
        selector("time[datetime]"),
        selector(".tgme_widget_message_views"),
    ) else {
        return Vec::new();
    };

    document
        .select(&message_sel)
        .filter_map(|message| {
            let post = message.value().attr("data-post")?;
            let id = post.rsplit('/').next()?.parse::<u64>().ok()?;
            let text = message
                .select(&text_sel)
                .next()
                .or_else(|| message.select(&fallback_text_sel).next())
                .map(|el| element_text(&el))
                .unwrap_or_default();
            let date = message
                .select(&time_sel)
                .next()
                .and_then(|t| t.value().attr("datetime"))
                .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                .map(|d| d.with_timezone(&Utc));
            let views = message
                .select(&views_sel)
                .next()
                .and_then(|v| parse_view_count(&element_text(&v)));

            Some(ChannelMessage {
                id,
                text,
                date,
                views,
                url: format!("{}/{}", base_url, post),
            })
        })
        .collect()
}

/// "845", "1.2K", "3M" style counters.
pub fn parse_view_count(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (number, multiplier) = match raw.chars().last()? {
        'K' | 'k' => (&raw[..raw.len() - 1], 1_000.0),
        'M' | 'm' => (&raw[..raw.len() - 1], 1_000_000.0),
        _ => (raw, 1.0),
    };
    let value: f64 = number.trim().parse().ok()?;
    Some((value * multiplier).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relevance_uses_name_and_synonyms() {
        assert!(is_relevant_to_company("Apple unveils new chips", "Apple"));
        assert!(is_relevant_to_company("Tim Cook spoke today", "apple"));
        assert!(is_relevant_to_company("RTX 5090 benchmarks", "Nvidia"));
        assert!(!is_relevant_to_company("Oil prices fall", "Tesla"));
        assert!(!is_relevant_to_company("Windows update", "Google"));
        assert!(!is_relevant_to_company("", "Apple"));
    }

    #[test]
    fn view_counters() {
        assert_eq!(parse_view_count("845"), Some(845));
        assert_eq!(parse_view_count("1.2K"), Some(1200));
        assert_eq!(parse_view_count("3M"), Some(3_000_000));
        assert_eq!(parse_view_count("n/a"), None);
    }

    #[test]
    fn preview_page_parsing() {
        let html = r#"<html><body><section class="tgme_channel_history">
          <div class="tgme_widget_message_wrap">
            <div class="tgme_widget_message js-widget_message" data-post="technews/41">
              <div class="tgme_widget_message_text js-message_text" dir="auto">Apple ships <b>iOS 19</b></div>
              <div class="tgme_widget_message_footer">
                <span class="tgme_widget_message_views">1.2K</span>
                <a class="tgme_widget_message_date" href="https://t.me/technews/41">
                  <time datetime="2026-01-10T09:00:00+00:00" class="time">09:00</time></a>
              </div>
            </div>
          </div>
          <div class="tgme_widget_message_wrap">
            <div class="tgme_widget_message js-widget_message" data-post="technews/42">
              <div class="tgme_widget_message_footer">
                <time datetime="2026-01-10T10:00:00+00:00" class="time">10:00</time>
              </div>
            </div>
          </div>
        </section></body></html>"#;

        let messages = parse_preview_page(html, "https://t.me");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, 41);
        assert_eq!(messages[0].text, "Apple ships iOS 19");
        assert_eq!(messages[0].views, Some(1200));
        assert_eq!(messages[0].url, "https://t.me/technews/41");
        assert_eq!(
            messages[0].date.map(|d| d.to_rfc3339()),
            Some("2026-01-10T09:00:00+00:00".to_string())
        );
        assert_eq!(messages[1].text, "");
    }
}
