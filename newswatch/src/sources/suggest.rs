use serde::Serialize;

const TECH_COMPANIES: [&str; 7] = ["apple", "microsoft", "google", "nvidia", "tesla", "meta", "amazon"];
const BUSINESS_CHANNELS: [&str; 3] = ["@cnbc", "@reuters", "@businessinsider"];
const TECH_CHANNELS: [&str; 2] = ["@techcrunch", "@verge"];

/// Candidate targets for a company nobody configured sources for yet
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceSuggestion {
    pub urls: Vec<String>,
    pub channels: Vec<String>,
}

/// Guesses newsroom URLs, aggregator feeds and channels from the company name alone.
pub fn suggest_sources(company: &str) -> SourceSuggestion {
    let clean: String = company
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    if clean.is_empty() {
        return SourceSuggestion::default();
    }

    let mut urls: Vec<String> = ["newsroom", "press", "blog", "news"]
        .iter()
        .map(|section| format!("https://www.{}.com/{}", clean, section))
        .collect();

    let query: String = url::form_urlencoded::byte_serialize(company.trim().as_bytes()).collect();
    urls.push(format!(
        "https://news.google.com/rss/search?q={}&hl=en-US&gl=US&ceid=US:en",
        query
    ));
    urls.push(format!("https://seekingalpha.com/symbol/{}/feed", clean.to_uppercase()));

    let mut channels = vec![format!("@{}", clean)];
    channels.extend(BUSINESS_CHANNELS.iter().map(|c| c.to_string()));
    if TECH_COMPANIES.contains(&clean.as_str()) {
        channels.extend(TECH_CHANNELS.iter().map(|c| c.to_string()));
    }

    SourceSuggestion { urls, channels }
}
