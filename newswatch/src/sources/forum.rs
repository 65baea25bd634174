use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use common::{env_secret, ForumSourceConfig};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{is_stale, SourceFetcher, MAX_ITEM_TEXT_CHARS};
use crate::error::FetchError;
use crate::ingestion::http_client;
use crate::model::{ItemExtras, RawItem, Source};
use crate::scraping::clean_text;

const DEFAULT_USER_AGENT: &str = "newswatch/0.1 (company news monitor)";
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Password-grant credentials for the forum API
#[derive(Debug, Clone)]
pub struct ForumCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ForumSettings {
    pub user_agent: String,
    pub limit_per_community: usize,
    pub time_filter: String,
    pub polite_delay: Duration,
    pub timeout_secs: u64,
    pub public_base_url: String,
    pub oauth_base_url: String,
    pub token_url: String,
    pub credentials: Option<ForumCredentials>,
}

impl Default for ForumSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            limit_per_community: 10,
            time_filter: "week".to_string(),
            polite_delay: Duration::from_secs(1),
            timeout_secs: 10,
            public_base_url: "https://www.reddit.com".to_string(),
            oauth_base_url: "https://oauth.reddit.com".to_string(),
            token_url: "https://www.reddit.com/api/v1/access_token".to_string(),
            credentials: None,
        }
    }
}

impl ForumSettings {
    /// Credentials are read from the environment variables the config names.
    /// All four must be set, otherwise the public endpoints are used.
    pub fn from_config(cfg: &ForumSourceConfig) -> Self {
        let d = Self::default();
        let credentials = match (
            env_secret(cfg.client_id_env.as_deref()),
            env_secret(cfg.client_secret_env.as_deref()),
            env_secret(cfg.username_env.as_deref()),
            env_secret(cfg.password_env.as_deref()),
        ) {
            (Some(client_id), Some(client_secret), Some(username), Some(password)) => Some(ForumCredentials {
                client_id,
                client_secret,
                username,
                password,
            }),
            _ => None,
        };

        Self {
            user_agent: cfg.user_agent.clone().unwrap_or(d.user_agent),
            limit_per_community: cfg.limit_per_community.unwrap_or(d.limit_per_community),
            time_filter: cfg.time_filter.clone().unwrap_or(d.time_filter),
            polite_delay: cfg.polite_delay_ms.map(Duration::from_millis).unwrap_or(d.polite_delay),
            timeout_secs: cfg.fetch_timeout_seconds.unwrap_or(d.timeout_secs),
            public_base_url: cfg.public_base_url.clone().unwrap_or(d.public_base_url),
            oauth_base_url: cfg.oauth_base_url.clone().unwrap_or(d.oauth_base_url),
            token_url: cfg.token_url.clone().unwrap_or(d.token_url),
            credentials,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    permalink: String,
    author: Option<String>,
    #[serde(default)]
    score: i64,
    created_utc: Option<f64>,
    #[serde(default)]
    stickied: bool,
    removed_by_category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

fn default_expiry() -> u64 {
    3600
}

enum CommunityError {
    RateLimited(Duration),
    Unauthorized(String),
    Other(anyhow::Error),
}

impl From<anyhow::Error> for CommunityError {
    fn from(e: anyhow::Error) -> Self {
        CommunityError::Other(e)
    }
}

/// Searches discussion communities for the quoted company name.
pub struct ForumFetcher {
    client: Client,
    settings: ForumSettings,
    token: Mutex<Option<(String, Instant)>>,
}

impl ForumFetcher {
    pub fn new(settings: ForumSettings) -> Result<Self> {
        let client = http_client(settings.timeout_secs, Some(&settings.user_agent))?;
        Ok(Self {
            client,
            settings,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self, creds: &ForumCredentials) -> Result<String, CommunityError> {
        let mut cached = self.token.lock().await;
        if let Some((token, expires)) = cached.as_ref() {
            if Instant::now() < *expires {
                return Ok(token.clone());
            }
        }

        let response = self
            .client
            .post(&self.settings.token_url)
            .basic_auth(&creds.client_id, Some(&creds.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", creds.username.as_str()),
                ("password", creds.password.as_str()),
            ])
            .send()
            .await
            .context("forum token request failed")?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CommunityError::Unauthorized(format!("token endpoint returned {}", status)));
        }
        if !status.is_success() {
            return Err(CommunityError::Other(anyhow::anyhow!("token endpoint returned {}", status)));
        }

        let token: TokenResponse = response.json().await.context("failed to parse forum token response")?;
        // refresh a minute early
        let expires = Instant::now() + Duration::from_secs(token.expires_in.saturating_sub(60));
        *cached = Some((token.access_token.clone(), expires));
        info!("forum: obtained oauth token");
        Ok(token.access_token)
    }

    async fn search_request(&self, community: &str, company: &str) -> Result<RequestBuilder, CommunityError> {
        let limit = self.settings.limit_per_community.to_string();
        let query = format!("\"{}\"", company);
        let mut params = vec![
            ("q", query.as_str()),
            ("sort", "new"),
            ("limit", limit.as_str()),
            ("t", self.settings.time_filter.as_str()),
            ("raw_json", "1"),
        ];
        if !community.eq_ignore_ascii_case("all") {
            params.push(("restrict_sr", "1"));
        }

        let request = match &self.settings.credentials {
            Some(creds) => {
                let token = self.access_token(creds).await?;
                let url = format!("{}/r/{}/search", self.settings.oauth_base_url.trim_end_matches('/'), community);
                self.client.get(url).bearer_auth(token)
            }
            None => {
                let url = format!("{}/r/{}/search.json", self.settings.public_base_url.trim_end_matches('/'), community);
                self.client.get(url)
            }
        };
        Ok(request.query(&params))
    }

    async fn search_community(
        &self,
        community: &str,
        company: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawItem>, CommunityError> {
        let response = self
            .search_request(community, company)
            .await?
            .send()
            .await
            .context("forum search request failed")?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let wait = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(CommunityError::RateLimited(wait));
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(CommunityError::Unauthorized(format!("search returned {}", status)));
        }
        if !status.is_success() {
            return Err(CommunityError::Other(anyhow::anyhow!("search in r/{} returned {}", community, status)));
        }

        let listing: Listing = response.json().await.context("failed to parse forum listing")?;
        let mut items = Vec::new();
        for child in listing.data.children {
            let post = child.data;
            if post.stickied || post.removed_by_category.is_some() {
                continue;
            }
            let published_at = post
                .created_utc
                .and_then(|ts| Utc.timestamp_opt(ts as i64, 0).single());
            if is_stale(published_at, since) {
                debug!(permalink = %post.permalink, "forum: skipping post older than cutoff");
                continue;
            }

            let title = clean_text(&post.title, MAX_ITEM_TEXT_CHARS);
            let body = clean_text(&post.selftext, MAX_ITEM_TEXT_CHARS);
            items.push(RawItem {
                source: Source::Forum,
                company: company.to_string(),
                // link posts carry no body; the title is all there is to summarize
                text: if body.is_empty() { title.clone() } else { body },
                title,
                url: format!("https://reddit.com{}", post.permalink),
                published_at,
                extras: ItemExtras {
                    author: Some(post.author.unwrap_or_else(|| "[deleted]".to_string())),
                    score: Some(post.score),
                    views: None,
                    community: Some(community.to_string()),
                },
            });
        }
        Ok(items)
    }
}

#[async_trait::async_trait]
impl SourceFetcher for ForumFetcher {
    fn source(&self) -> Source {
        Source::Forum
    }

    async fn fetch(
        &self,
        company: &str,
        targets: &[String],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawItem>, FetchError> {
        let mut items = Vec::new();
        for (i, target) in targets.iter().enumerate() {
            let community = target.trim().trim_start_matches("r/");
            if community.is_empty() {
                continue;
            }
            if i > 0 {
                tokio::time::sleep(self.settings.polite_delay).await;
            }

            match self.search_community(community, company, since).await {
                Ok(found) => {
                    info!(%company, %community, count = found.len(), "forum: community searched");
                    items.extend(found);
                }
                Err(CommunityError::RateLimited(wait)) => {
                    warn!(%company, %community, ?wait, kept = items.len(), "forum: rate limited, stopping");
                    return Err(FetchError::RateLimited {
                        provider: Source::Forum,
                        wait,
                        partial: items,
                    });
                }
                Err(CommunityError::Unauthorized(message)) => {
                    return Err(FetchError::Unauthorized {
                        provider: Source::Forum,
                        message,
                    });
                }
                Err(CommunityError::Other(e)) => {
                    warn!(%company, %community, error = %e, "forum: community failed, continuing");
                }
            }
        }
        Ok(items)
    }
}
