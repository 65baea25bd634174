//! Source fetchers. Each one turns (company, targets, since) into raw items.
//!
//! A fetcher never fails because one target failed: it logs and moves on. Only
//! whole-source conditions (rate limit, unauthorized session, client setup) surface
//! as a [`FetchError`].

use chrono::{DateTime, Utc};

use crate::error::FetchError;
use crate::model::{RawItem, Source};

pub mod channel;
pub mod forum;
pub mod suggest;
pub mod web;

pub use channel::{ChannelFetcher, ChannelProvider, TelegramPreviewProvider};
pub use forum::ForumFetcher;
pub use suggest::{suggest_sources, SourceSuggestion};
pub use web::WebFetcher;

/// Cap on the text carried by a raw item
pub const MAX_ITEM_TEXT_CHARS: usize = 2000;

#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    fn source(&self) -> Source;

    async fn fetch(
        &self,
        company: &str,
        targets: &[String],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawItem>, FetchError>;
}

/// True when a dated item is older than the cutoff. Undated items are never filtered.
pub fn is_stale(published_at: Option<DateTime<Utc>>, since: Option<DateTime<Utc>>) -> bool {
    matches!((published_at, since), (Some(p), Some(s)) if p < s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn undated_items_are_never_stale() {
        let cutoff = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let old = Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap();
        assert!(is_stale(Some(old), Some(cutoff)));
        assert!(!is_stale(Some(cutoff), Some(cutoff)));
        assert!(!is_stale(None, Some(cutoff)));
        assert!(!is_stale(Some(old), None));
    }
}
