use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::MonitoringError;

/// Where a raw item came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Web,
    Channel,
    Forum,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Web, Source::Channel, Source::Forum];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Web => "web",
            Source::Channel => "channel",
            Source::Forum => "forum",
        }
    }
}

/// Sources enabled when a caller names none: web and channel, plus forum when
/// communities were given.
pub fn default_sources(communities: &[String]) -> Vec<Source> {
    if communities.is_empty() {
        vec![Source::Web, Source::Channel]
    } else {
        Source::ALL.to_vec()
    }
}

/// Parses client-supplied source names, falling back to [`default_sources`] when absent.
pub fn parse_sources(names: Option<&[String]>, communities: &[String]) -> Result<Vec<Source>, MonitoringError> {
    match names {
        Some(names) if !names.is_empty() => names.iter().map(|n| n.parse()).collect(),
        _ => Ok(default_sources(communities)),
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = MonitoringError;

    /// Accepts the canonical names plus the provider names used by older clients.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "web" | "rss" | "html" => Ok(Source::Web),
            "channel" | "telegram" => Ok(Source::Channel),
            "forum" | "reddit" => Ok(Source::Forum),
            other => Err(MonitoringError::InvalidRequest(format!("unknown source '{}'", other))),
        }
    }
}

/// Advisory per-source metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemExtras {
    pub author: Option<String>,
    pub score: Option<i64>,
    pub views: Option<i64>,
    /// Forum community or channel handle the item was found in
    pub community: Option<String>,
}

/// An item as produced by a fetcher, before normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub source: Source,
    pub company: String,
    pub title: String,
    pub text: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extras: ItemExtras,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    News,
    Rumor,
    Review,
    Critique,
    PressRelease,
    NeutralMention,
    Unknown,
}

impl EventType {
    pub const VOCABULARY: [EventType; 6] = [
        EventType::News,
        EventType::Rumor,
        EventType::Review,
        EventType::Critique,
        EventType::PressRelease,
        EventType::NeutralMention,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::News => "news",
            EventType::Rumor => "rumor",
            EventType::Review => "review",
            EventType::Critique => "critique",
            EventType::PressRelease => "press-release",
            EventType::NeutralMention => "neutral-mention",
            EventType::Unknown => "unknown",
        }
    }

    /// Maps a model-produced label onto the vocabulary. Anything unrecognised is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "news" | "новость" => EventType::News,
            "rumor" | "rumour" | "слух" => EventType::Rumor,
            "review" | "обзор" => EventType::Review,
            "critique" | "criticism" | "критика" => EventType::Critique,
            "press-release" | "пресс-релиз" => EventType::PressRelease,
            "neutral-mention" | "mention" | "нейтральное-упоминание" => EventType::NeutralMention,
            _ => EventType::Unknown,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }

    /// Maps a model-produced label onto the vocabulary, defaulting to `Neutral`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "positive" | "позитивная" | "позитивный" | "положительная" => Sentiment::Positive,
            "negative" | "негативная" | "негативный" | "отрицательная" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an item ended up with `processed = false`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum NormalizeFailure {
    #[error("empty_text")]
    EmptyText,
    #[error("invalid_json")]
    InvalidJson,
    #[error("llm_error: {0}")]
    Llm(String),
}

/// A raw item after the normalization worker ran. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub item: RawItem,
    pub summary: String,
    pub event_type: EventType,
    pub sentiment: Sentiment,
    pub processed: bool,
    pub failure: Option<NormalizeFailure>,
}

impl NormalizedItem {
    pub fn processed(item: RawItem, summary: String, event_type: EventType, sentiment: Sentiment) -> Self {
        Self {
            item,
            summary,
            event_type,
            sentiment,
            processed: true,
            failure: None,
        }
    }

    /// Keeps the raw fields so a failed summarization never drops the item.
    pub fn degraded(item: RawItem, failure: NormalizeFailure) -> Self {
        Self {
            item,
            summary: String::new(),
            event_type: EventType::Unknown,
            sentiment: Sentiment::Neutral,
            processed: false,
            failure: Some(failure),
        }
    }
}

/// A stored news record. `url` is the canonical URL and is unique.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedRecord {
    pub id: i64,
    pub source: Source,
    pub company: String,
    pub url: String,
    pub title: String,
    pub raw_text: String,
    pub summary: String,
    pub event_type: EventType,
    pub sentiment: Sentiment,
    pub published_at: Option<DateTime<Utc>>,
    pub processed: bool,
    pub failure_reason: Option<String>,
    pub extras: ItemExtras,
    pub created_at: DateTime<Utc>,
}

/// Input of the orchestrator. Build it with [`MonitoringRequest::new`] and the `with_*`
/// methods, then call [`MonitoringRequest::validate`] once at the edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringRequest {
    pub company: String,
    pub sources: Vec<Source>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub communities: Vec<String>,
    pub since: Option<DateTime<Utc>>,
}

impl MonitoringRequest {
    pub fn new(company: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            sources: Vec::new(),
            urls: Vec::new(),
            channels: Vec::new(),
            communities: Vec::new(),
            since: None,
        }
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = Source>) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn with_urls<S: Into<String>>(mut self, urls: impl IntoIterator<Item = S>) -> Self {
        self.urls.extend(urls.into_iter().map(Into::into));
        self
    }

    pub fn with_channels<S: Into<String>>(mut self, channels: impl IntoIterator<Item = S>) -> Self {
        self.channels.extend(channels.into_iter().map(Into::into));
        self
    }

    pub fn with_communities<S: Into<String>>(mut self, communities: impl IntoIterator<Item = S>) -> Self {
        self.communities.extend(communities.into_iter().map(Into::into));
        self
    }

    pub fn with_since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }

    /// Trims and dedups every list and rejects a blank company name.
    /// Downstream code relies on this having run exactly once.
    pub fn validate(mut self) -> Result<Self, MonitoringError> {
        self.company = self.company.trim().to_string();
        if self.company.is_empty() {
            return Err(MonitoringError::InvalidRequest("company name is empty".to_string()));
        }

        let mut seen = HashSet::new();
        self.sources.retain(|s| seen.insert(*s));
        self.urls = dedup_targets(self.urls);
        self.channels = dedup_targets(self.channels);
        self.communities = dedup_targets(self.communities);
        Ok(self)
    }

    /// Targets for one source. Forum falls back to the global community when none are set.
    pub fn targets_for(&self, source: Source) -> Vec<String> {
        match source {
            Source::Web => self.urls.clone(),
            Source::Channel => self.channels.clone(),
            Source::Forum if self.communities.is_empty() => vec!["all".to_string()],
            Source::Forum => self.communities.clone(),
        }
    }
}

fn dedup_targets(targets: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// A target list as it arrives from clients: sometimes a string, sometimes nested lists.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TargetEntry {
    One(String),
    Many(Vec<TargetEntry>),
}

/// Flattens nested target lists once, at the request boundary.
pub fn flatten_targets(entries: Vec<TargetEntry>) -> Vec<String> {
    let mut out = Vec::new();
    for entry in entries {
        match entry {
            TargetEntry::One(s) => out.push(s),
            TargetEntry::Many(inner) => out.extend(flatten_targets(inner)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_trims_and_dedups_targets() {
        let req = MonitoringRequest::new("  Apple ")
            .with_sources([Source::Web, Source::Web, Source::Channel])
            .with_urls([" https://a.example/news ", "", "https://a.example/news"])
            .with_channels(["@apple", "  "])
            .validate()
            .expect("valid");

        assert_eq!(req.company, "Apple");
        assert_eq!(req.sources, vec![Source::Web, Source::Channel]);
        assert_eq!(req.urls, vec!["https://a.example/news"]);
        assert_eq!(req.channels, vec!["@apple"]);
    }

    #[test]
    fn validate_rejects_blank_company() {
        let err = MonitoringRequest::new("   ").validate().unwrap_err();
        assert!(matches!(err, MonitoringError::InvalidRequest(_)));
    }

    #[test]
    fn forum_targets_fall_back_to_global_community() {
        let req = MonitoringRequest::new("Tesla");
        assert_eq!(req.targets_for(Source::Forum), vec!["all"]);
        let req = req.with_communities(["stocks"]);
        assert_eq!(req.targets_for(Source::Forum), vec!["stocks"]);
    }

    #[test]
    fn nested_target_lists_are_flattened() {
        let entries: Vec<TargetEntry> =
            serde_json::from_str(r#"[["https://a.example"], "https://b.example", [["https://c.example"]]]"#)
                .expect("parse");
        assert_eq!(
            flatten_targets(entries),
            vec!["https://a.example", "https://b.example", "https://c.example"]
        );
    }

    #[test]
    fn labels_map_onto_vocabulary() {
        assert_eq!(EventType::from_label("Press Release"), EventType::PressRelease);
        assert_eq!(EventType::from_label("пресс-релиз"), EventType::PressRelease);
        assert_eq!(EventType::from_label("нейтральное упоминание"), EventType::NeutralMention);
        assert_eq!(EventType::from_label("gossip"), EventType::Unknown);
        assert_eq!(Sentiment::from_label("Негативная"), Sentiment::Negative);
        assert_eq!(Sentiment::from_label("mixed"), Sentiment::Neutral);
    }

    #[test]
    fn source_parses_provider_aliases() {
        assert_eq!("rss".parse::<Source>().unwrap(), Source::Web);
        assert_eq!("telegram".parse::<Source>().unwrap(), Source::Channel);
        assert_eq!("Reddit".parse::<Source>().unwrap(), Source::Forum);
        assert!("fax".parse::<Source>().is_err());
    }
}
