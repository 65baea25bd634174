//! Best-effort publication date recovery for article pages without feed metadata.
//!
//! Tiers are tried in a fixed order and the first one that yields a date wins:
//! a leading "Month D, YYYY" in the page text, structured metadata, free-text
//! candidates near the headline, JSON-LD, the whole page text, and finally a
//! `/YYYY/MM/` segment of the URL. `None` means "unknown", never "now".

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};
use serde_json::Value;
use tracing::debug;

use crate::scraping::{element_text, selector, truncate_chars, visible_text};

const LEADING_TEXT_CHARS: usize = 500;

const CANDIDATE_CLASSES: [&str; 7] = ["date", "pub-date", "updated", "meta", "timestamp", "byline", "header-meta"];
const PARAGRAPH_KEYWORDS: [&str; 4] = ["update", "published", "released", "as of"];

static MONTH_DAY_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},\s+\d{4}\b",
    )
    .expect("valid month-day-year regex")
});

const EN_MONTH: &str = r"(Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|June?|July?|Aug(?:ust)?|Sep(?:t(?:ember)?)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)";

static EN_MONTH_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b{}\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b", EN_MONTH))
        .expect("valid month-first regex")
});

static EN_DAY_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+{}\.?,?\s+(\d{{4}})\b", EN_MONTH))
        .expect("valid day-first regex")
});

static RU_DAY_MONTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d{1,2})\s+(января|февраля|марта|апреля|мая|июня|июля|августа|сентября|октября|ноября|декабря)\s+(\d{4})")
        .expect("valid russian date regex")
});

static ISO_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})")
        .expect("valid iso timestamp regex")
});

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("valid iso date regex"));

static DOTTED_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})\.(\d{1,2})\.(\d{4})\b").expect("valid dotted date regex"));

static URL_YEAR_MONTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(\d{4})/(\d{1,2})/").expect("valid url date regex"));

/// Recovers the publication date of an article page.
pub fn extract_date(html: &str, url: &str) -> Option<DateTime<Utc>> {
    let document = Html::parse_document(html);
    let text = visible_text(&document);

    let found = month_day_year(&truncate_chars(&text, LEADING_TEXT_CHARS))
        .map(|d| ("leading-text", d))
        .or_else(|| structured_metadata(&document).map(|d| ("metadata", d)))
        .or_else(|| free_text_candidates(&document).map(|d| ("candidates", d)))
        .or_else(|| json_ld(&document).map(|d| ("json-ld", d)))
        .or_else(|| month_day_year(&text).map(|d| ("full-text", d)))
        .or_else(|| date_from_url(url).map(|d| ("url", d)));

    match found {
        Some((tier, date)) => {
            debug!(%url, tier, %date, "dates: publication date recovered");
            Some(date)
        }
        None => {
            debug!(%url, "dates: no publication date found");
            None
        }
    }
}

/// `/YYYY/MM/` in the URL path, as the first day of that month.
pub fn date_from_url(url: &str) -> Option<DateTime<Utc>> {
    let path = url::Url::parse(url).map(|u| u.path().to_string()).unwrap_or_else(|_| url.to_string());
    let caps = URL_YEAR_MONTH.captures(&path)?;
    ymd(caps[1].parse().ok()?, caps[2].parse().ok()?, 1)
}

fn month_day_year(text: &str) -> Option<DateTime<Utc>> {
    MONTH_DAY_YEAR.find(text).and_then(|m| parse_loose(m.as_str()))
}

fn structured_metadata(document: &Html) -> Option<DateTime<Utc>> {
    let selectors = [
        r#"meta[property="article:published_time"]"#,
        r#"meta[itemprop="datePublished"]"#,
        "time[datetime]",
        r#"time[itemprop="datePublished"]"#,
    ];
    for css in selectors {
        let Some(sel) = selector(css) else { continue };
        let Some(element) = document.select(&sel).next() else { continue };
        let el = element.value();
        for attr in ["content", "datetime"] {
            if let Some(date) = el.attr(attr).and_then(parse_loose) {
                return Some(date);
            }
        }
        if let Some(date) = parse_loose(&element_text(&element)) {
            return Some(date);
        }
    }
    None
}

fn free_text_candidates(document: &Html) -> Option<DateTime<Utc>> {
    let mut candidates: Vec<String> = Vec::new();

    for class in CANDIDATE_CLASSES {
        let Some(sel) = selector(&format!(".{}", class)) else { continue };
        candidates.extend(document.select(&sel).map(|el| element_text(&el)));
    }

    if let Some(heading) = selector("h1, h2").and_then(|sel| document.select(&sel).next()) {
        candidates.extend(
            heading
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .take(3)
                .map(|el| element_text(&el)),
        );
    }

    if let Some(sel) = selector("p") {
        candidates.extend(
            document
                .select(&sel)
                .take(5)
                .map(|p| element_text(&p))
                .filter(|t| {
                    let lower = t.to_lowercase();
                    PARAGRAPH_KEYWORDS.iter().any(|kw| lower.contains(kw))
                }),
        );
    }

    candidates.iter().filter(|c| !c.is_empty()).find_map(|c| parse_loose(c))
}

fn json_ld(document: &Html) -> Option<DateTime<Utc>> {
    let sel = selector(r#"script[type="application/ld+json"]"#)?;
    document.select(&sel).find_map(|script| {
        let raw: String = script.text().collect();
        let value: Value = serde_json::from_str(raw.trim()).ok()?;
        date_published(&value).and_then(parse_loose)
    })
}

fn date_published(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) => map
            .get("datePublished")
            .and_then(Value::as_str)
            .or_else(|| map.get("@graph").and_then(date_published)),
        Value::Array(items) => items.iter().find_map(date_published),
        _ => None,
    }
}

/// Permissive single-date parser for free text.
pub fn parse_loose(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if let Some(m) = ISO_TIMESTAMP.find(text) {
        if let Ok(dt) = DateTime::parse_from_rfc3339(&m.as_str().replacen(' ', "T", 1)) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    if let Some(caps) = ISO_DATE.captures(text) {
        if let Some(date) = ymd(caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?) {
            return Some(date);
        }
    }
    if let Some(caps) = EN_MONTH_FIRST.captures(text) {
        if let Some(date) = ymd(caps[3].parse().ok()?, english_month(&caps[1])?, caps[2].parse().ok()?) {
            return Some(date);
        }
    }
    if let Some(caps) = EN_DAY_FIRST.captures(text) {
        if let Some(date) = ymd(caps[3].parse().ok()?, english_month(&caps[2])?, caps[1].parse().ok()?) {
            return Some(date);
        }
    }
    if let Some(caps) = RU_DAY_MONTH.captures(text) {
        if let Some(date) = ymd(caps[3].parse().ok()?, russian_month(&caps[2])?, caps[1].parse().ok()?) {
            return Some(date);
        }
    }
    if let Some(caps) = DOTTED_DATE.captures(text) {
        return ymd(caps[3].parse().ok()?, caps[2].parse().ok()?, caps[1].parse().ok()?);
    }
    None
}

fn ymd(year: i32, month: u32, day: u32) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn english_month(name: &str) -> Option<u32> {
    let prefix: String = name.chars().take(3).collect::<String>().to_lowercase();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn russian_month(name: &str) -> Option<u32> {
    let month = match name.to_lowercase().as_str() {
        "января" => 1,
        "февраля" => 2,
        "марта" => 3,
        "апреля" => 4,
        "мая" => 5,
        "июня" => 6,
        "июля" => 7,
        "августа" => 8,
        "сентября" => 9,
        "октября" => 10,
        "ноября" => 11,
        "декабря" => 12,
        _ => return None,
    };
    Some(month)
}
