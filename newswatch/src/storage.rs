use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};
use url::Url;

use crate::model::{EventType, ItemExtras, NormalizedItem, PersistedRecord, Sentiment, Source};

const TRACKING_PARAMS: [&str; 2] = ["fbclid", "gclid"];

/// Durable record store keyed by canonical URL.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_by_url(&self, url: &str) -> Result<Option<PersistedRecord>>;

    /// Inserts a new record. `None` when another writer already stored this URL.
    async fn insert(&self, canonical_url: &str, item: &NormalizedItem) -> Result<Option<PersistedRecord>>;

    /// Most recent records first, optionally for a single company.
    async fn recent(&self, company: Option<&str>, limit: i64) -> Result<Vec<PersistedRecord>>;

    async fn count(&self) -> Result<i64>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Stored(PersistedRecord),
    /// Carries the canonical URL that was already present
    Duplicate(String),
}

/// Lowercases scheme and host (via URL parsing), drops the fragment and tracking parameters.
/// Strings that do not parse as URLs are only trimmed.
pub fn canonical_url(raw: &str) -> String {
    let raw = raw.trim();
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    url.set_fragment(None);

    let is_tracking = |key: &str| {
        let key = key.to_ascii_lowercase();
        key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
    };
    // untouched queries keep their exact spelling
    if !url.query_pairs().any(|(k, _)| is_tracking(&k)) {
        return url.to_string();
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.to_string()
}

/// Dedup by canonical URL, then an idempotent insert. A lost insert race is a duplicate too.
pub async fn persist(store: &dyn RecordStore, item: &NormalizedItem) -> Result<PersistOutcome> {
    let url = canonical_url(&item.item.url);

    if store.find_by_url(&url).await?.is_some() {
        debug!(%url, "storage: duplicate skipped");
        return Ok(PersistOutcome::Duplicate(url));
    }

    match store.insert(&url, item).await? {
        Some(record) => {
            info!(%url, id = record.id, processed = record.processed, "storage: record stored");
            Ok(PersistOutcome::Stored(record))
        }
        None => {
            debug!(%url, "storage: duplicate skipped after insert conflict");
            Ok(PersistOutcome::Duplicate(url))
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NewsRow {
    id: i64,
    source: String,
    company: String,
    url: String,
    title: Option<String>,
    raw_text: Option<String>,
    summary: Option<String>,
    event_type: Option<String>,
    sentiment: Option<String>,
    published_at: Option<DateTime<Utc>>,
    processed: bool,
    failure_reason: Option<String>,
    author: Option<String>,
    score: Option<i64>,
    views: Option<i64>,
    community: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<NewsRow> for PersistedRecord {
    type Error = anyhow::Error;

    fn try_from(row: NewsRow) -> Result<Self> {
        let source: Source = row
            .source
            .parse()
            .map_err(|e| anyhow::anyhow!("record {} has an invalid source: {}", row.id, e))?;
        Ok(PersistedRecord {
            id: row.id,
            source,
            company: row.company,
            url: row.url,
            title: row.title.unwrap_or_default(),
            raw_text: row.raw_text.unwrap_or_default(),
            summary: row.summary.unwrap_or_default(),
            event_type: EventType::from_label(row.event_type.as_deref().unwrap_or_default()),
            sentiment: Sentiment::from_label(row.sentiment.as_deref().unwrap_or_default()),
            published_at: row.published_at,
            processed: row.processed,
            failure_reason: row.failure_reason,
            extras: ItemExtras {
                author: row.author,
                score: row.score,
                views: row.views,
                community: row.community,
            },
            created_at: row.created_at,
        })
    }
}

/// SQLite-backed record store. The UNIQUE(url) constraint arbitrates concurrent writers.
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RecordStore for SqliteRecordStore {
    async fn find_by_url(&self, url: &str) -> Result<Option<PersistedRecord>> {
        let row = sqlx::query_as::<_, NewsRow>("SELECT * FROM news_items WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .context("failed to check existing record")?;
        row.map(PersistedRecord::try_from).transpose()
    }

    async fn insert(&self, canonical_url: &str, item: &NormalizedItem) -> Result<Option<PersistedRecord>> {
        let raw = &item.item;
        let mut tx = self.pool.begin().await.context("failed to open transaction")?;

        // The insert is the first statement so the transaction takes the write lock
        // without holding an older read snapshot.
        let row = sqlx::query_as::<_, NewsRow>(
            r#"
            INSERT INTO news_items
                (source, company, url, title, raw_text, summary, event_type, sentiment,
                 published_at, processed, failure_reason, author, score, views, community, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(raw.source.as_str())
        .bind(&raw.company)
        .bind(canonical_url)
        .bind(&raw.title)
        .bind(&raw.text)
        .bind(&item.summary)
        .bind(item.event_type.as_str())
        .bind(item.sentiment.as_str())
        .bind(raw.published_at)
        .bind(item.processed)
        .bind(item.failure.as_ref().map(|f| f.to_string()))
        .bind(&raw.extras.author)
        .bind(raw.extras.score)
        .bind(raw.extras.views)
        .bind(&raw.extras.community)
        .bind(Utc::now())
        .fetch_optional(&mut tx)
        .await
        .context("failed to insert record")?;

        tx.commit().await.context("failed to commit record")?;
        row.map(PersistedRecord::try_from).transpose()
    }

    async fn recent(&self, company: Option<&str>, limit: i64) -> Result<Vec<PersistedRecord>> {
        let rows = match company {
            Some(company) => {
                sqlx::query_as::<_, NewsRow>(
                    "SELECT * FROM news_items WHERE company = ? COLLATE NOCASE ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(company)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, NewsRow>("SELECT * FROM news_items ORDER BY created_at DESC, id DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("failed to load recent records")?;

        rows.into_iter().map(PersistedRecord::try_from).collect()
    }

    async fn count(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM news_items")
            .fetch_one(&self.pool)
            .await
            .context("failed to count records")
    }
}
