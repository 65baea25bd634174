use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::WebSourceConfig;
use feed_rs::model::{Entry, Feed};
use reqwest::Client;
use tracing::{debug, info, warn};

use super::{is_stale, SourceFetcher, MAX_ITEM_TEXT_CHARS};
use crate::dates::extract_date;
use crate::error::FetchError;
use crate::ingestion::{fetch_and_parse_feed, fetch_page, http_client, parse_feed, FetchedPage};
use crate::model::{ItemExtras, RawItem, Source};
use crate::scraping::{clean_text, extract_article, extract_news_links, find_feed_link, html_to_text};

#[derive(Debug, Clone)]
pub struct WebSettings {
    pub timeout_secs: u64,
    pub max_links_per_page: usize,
    pub max_text_chars: usize,
    pub user_agent: Option<String>,
    /// HTTP attempts per document, including the first
    pub http_attempts: u32,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_links_per_page: 10,
            max_text_chars: MAX_ITEM_TEXT_CHARS,
            user_agent: None,
            http_attempts: 3,
        }
    }
}

impl WebSettings {
    pub fn from_config(cfg: &WebSourceConfig) -> Self {
        let d = Self::default();
        Self {
            timeout_secs: cfg.fetch_timeout_seconds.unwrap_or(d.timeout_secs),
            max_links_per_page: cfg.max_links_per_page.unwrap_or(d.max_links_per_page),
            max_text_chars: cfg.max_text_chars.unwrap_or(d.max_text_chars),
            user_agent: cfg.user_agent.clone(),
            http_attempts: d.http_attempts,
        }
    }
}

/// RSS/Atom feeds when a page advertises one, news-listing crawl otherwise.
pub struct WebFetcher {
    client: Client,
    settings: WebSettings,
}

impl WebFetcher {
    pub fn new(settings: WebSettings) -> Result<Self> {
        let client = http_client(settings.timeout_secs, settings.user_agent.as_deref())?;
        Ok(Self { client, settings })
    }

    async fn fetch_target(&self, company: &str, target: &str, since: Option<DateTime<Utc>>) -> Result<Vec<RawItem>> {
        let page = fetch_page(&self.client, target, self.settings.http_attempts)
            .await
            .with_context(|| format!("failed to fetch {}", target))?;

        if page.is_feed() {
            info!(%target, "web: target is a feed, parsing directly");
            let feed = parse_feed(page.body.as_bytes())?;
            return Ok(self.feed_items(company, feed, since));
        }

        if let Some(feed_url) = find_feed_link(&page.body, &page.url) {
            info!(%target, %feed_url, "web: feed advertised, parsing");
            match fetch_and_parse_feed(&self.client, &feed_url, self.settings.http_attempts).await {
                Ok(feed) => return Ok(self.feed_items(company, feed, since)),
                Err(e) => warn!(%feed_url, error = %e, "web: advertised feed unusable, crawling page instead"),
            }
        }

        info!(%target, "web: no feed found, crawling as news page");
        Ok(self.crawl_listing(company, &page, since).await)
    }

    fn feed_items(&self, company: &str, feed: Feed, since: Option<DateTime<Utc>>) -> Vec<RawItem> {
        let total = feed.entries.len();
        let items: Vec<RawItem> = feed
            .entries
            .into_iter()
            .filter_map(|entry| self.entry_to_item(company, entry))
            .filter(|item| {
                let stale = is_stale(item.published_at, since);
                if stale {
                    debug!(url = %item.url, "web: skipping feed entry older than cutoff");
                }
                !stale
            })
            .collect();
        info!(entries = total, kept = items.len(), "web: feed parsed");
        items
    }

    fn entry_to_item(&self, company: &str, entry: Entry) -> Option<RawItem> {
        let title = entry.title.as_ref().map(|t| t.content.trim().to_string()).unwrap_or_default();
        let Some(url) = article_link(&entry) else {
            debug!(%title, "web: skipping feed entry without link");
            return None;
        };

        let mut body = entry.summary.as_ref().map(|s| s.content.clone()).unwrap_or_default();
        if let Some(content) = entry.content.as_ref().and_then(|c| c.body.as_ref()) {
            body.push(' ');
            body.push_str(content);
        }

        Some(RawItem {
            source: Source::Web,
            company: company.to_string(),
            title,
            text: clean_text(&html_to_text(&body), self.settings.max_text_chars),
            url,
            published_at: entry.published.or(entry.updated),
            extras: ItemExtras {
                author: entry.authors.first().map(|a| a.name.clone()),
                ..ItemExtras::default()
            },
        })
    }

    async fn crawl_listing(&self, company: &str, page: &FetchedPage, since: Option<DateTime<Utc>>) -> Vec<RawItem> {
        let links = extract_news_links(&page.body, &page.url, self.settings.max_links_per_page);
        debug!(page = %page.url, links = links.len(), "web: article links found");

        let mut items = Vec::new();
        for link in links {
            match self.fetch_article(company, &link).await {
                Ok(item) if is_stale(item.published_at, since) => {
                    debug!(%link, "web: skipping article older than cutoff");
                }
                Ok(item) => items.push(item),
                Err(e) => warn!(%link, error = %e, "web: failed to extract article"),
            }
        }
        info!(page = %page.url, kept = items.len(), "web: crawl finished");
        items
    }

    async fn fetch_article(&self, company: &str, link: &str) -> Result<RawItem> {
        let page = fetch_page(&self.client, link, self.settings.http_attempts).await?;
        let article = extract_article(&page.body, &page.url)?;
        let published_at = extract_date(&page.body, link);
        if published_at.is_none() {
            debug!(%link, "web: no publication date found");
        }

        Ok(RawItem {
            source: Source::Web,
            company: company.to_string(),
            title: article.title,
            text: clean_text(&article.text, self.settings.max_text_chars),
            url: link.to_string(),
            published_at,
            extras: ItemExtras::default(),
        })
    }
}

#[async_trait::async_trait]
impl SourceFetcher for WebFetcher {
    fn source(&self) -> Source {
        Source::Web
    }

    async fn fetch(
        &self,
        company: &str,
        targets: &[String],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawItem>, FetchError> {
        let mut items = Vec::new();
        for target in targets {
            match self.fetch_target(company, target, since).await {
                Ok(found) => {
                    info!(%company, %target, count = found.len(), "web: target done");
                    items.extend(found);
                }
                Err(e) => warn!(%company, %target, error = %e, "web: target failed, continuing"),
            }
        }
        Ok(items)
    }
}

/// The article link of a feed entry. Atom entries may list `replies`, `self` or `edit`
/// links ahead of the `alternate` one.
fn article_link(entry: &Entry) -> Option<String> {
    let hrefs = || entry.links.iter().filter(|l| !l.href.trim().is_empty());
    hrefs()
        .find(|l| {
            l.rel
                .as_deref()
                .map_or(true, |rel| rel.is_empty() || rel.eq_ignore_ascii_case("alternate"))
        })
        .or_else(|| hrefs().next())
        .map(|l| l.href.trim().to_string())
}
