use anyhow::{Context, Result};
use feed_rs::model::Feed;
use feed_rs::parser;
use reqwest::{Client, Response};
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; newswatch/0.1; +https://github.com/taophp/newswatch)";

/// Builds the shared HTTP client used by the web fetcher.
pub fn http_client(timeout_secs: u64, user_agent: Option<&str>) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
        .build()
        .context("failed to build reqwest client")
}

/// GET with up to `max_attempts` tries. 5xx, 429 and network errors are retried
/// with a 1s, 2s, 4s... backoff; other 4xx responses fail immediately.
pub async fn get_with_retry(client: &Client, url: &str, max_attempts: u32) -> Result<Response> {
    let mut last_error = None;

    for attempt in 1..=max_attempts.max(1) {
        if attempt > 1 {
            let backoff = Duration::from_secs(2u64.pow(attempt - 2));
            tracing::info!(%url, attempt, max_attempts, ?backoff, "ingestion: retrying fetch");
            tokio::time::sleep(backoff).await;
        }

        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                } else if status.is_server_error() {
                    last_error = Some(anyhow::anyhow!("server error: {}", status));
                } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    last_error = Some(anyhow::anyhow!("rate limited: {}", status));
                } else {
                    // Client error (4xx) - likely permanent, don't retry
                    return Err(anyhow::anyhow!("fetch of {} failed with status: {}", url, status));
                }
            }
            Err(e) => {
                last_error = Some(anyhow::Error::new(e).context("network error during fetch"));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown error after retries")))
}

/// A fetched document and the content type the server declared for it
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub url: String,
    pub content_type: String,
    pub body: String,
}

impl FetchedPage {
    /// True when the document is an RSS/Atom feed rather than an HTML page.
    pub fn is_feed(&self) -> bool {
        let ct = self.content_type.to_ascii_lowercase();
        if ct.contains("rss") || ct.contains("atom") {
            return true;
        }
        if ct.contains("html") {
            return false;
        }
        let head: String = self.body.trim_start().chars().take(512).collect();
        ct.contains("xml") || head.starts_with("<?xml") || head.contains("<rss") || head.contains("<feed")
    }
}

pub async fn fetch_page(client: &Client, url: &str, max_attempts: u32) -> Result<FetchedPage> {
    let response = get_with_retry(client, url, max_attempts).await?;
    let final_url = response.url().to_string();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = response.text().await.context("failed to read response body")?;
    Ok(FetchedPage {
        url: final_url,
        content_type,
        body,
    })
}

/// Fetches a feed from the given URL and parses it.
pub async fn fetch_and_parse_feed(client: &Client, url: &str, max_attempts: u32) -> Result<Feed> {
    let response = get_with_retry(client, url, max_attempts).await?;
    let bytes = response.bytes().await.context("failed to read response body")?;
    parse_feed(bytes.as_ref())
}

pub fn parse_feed(bytes: &[u8]) -> Result<Feed> {
    parser::parse(bytes).context("failed to parse feed")
}
