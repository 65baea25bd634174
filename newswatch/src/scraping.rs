use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashSet;
use std::io::Cursor;
use tracing::{debug, info, warn};
use url::Url;

/// Path fragments that mark a link as an individual news article
pub const NEWS_PATH_HINTS: [&str; 5] = ["/news/", "/press/", "/blog/", "/article/", "/release/"];

const HIDDEN_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Title and body text of an article page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Article {
    pub title: String,
    pub text: String,
}

/// Collapse all whitespace runs into single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize whitespace and cap the length (in characters) of text handed to the LLM.
pub fn clean_text(text: &str, max_chars: usize) -> String {
    let collapsed = collapse_whitespace(text);
    truncate_chars(&collapsed, max_chars)
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Convert an HTML fragment to plain text. Falls back to the raw input on conversion errors.
pub fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), 10_000) {
        Ok(text) => text,
        Err(e) => {
            debug!("scraping: html2text failed, keeping raw fragment: {}", e);
            html.to_string()
        }
    }
}

/// Text of every visible text node, separated by spaces, whitespace collapsed.
pub fn visible_text(document: &Html) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in document.root_element().descendants() {
        if let Node::Text(text) = node.value() {
            let hidden = node.ancestors().any(|a| match a.value() {
                Node::Element(el) => HIDDEN_ELEMENTS.contains(&el.name()),
                _ => false,
            });
            if !hidden {
                parts.push(&**text);
            }
        }
    }
    collapse_whitespace(&parts.join(" "))
}

/// Visible text of a single element.
pub fn element_text(element: &ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

pub fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(e) => {
            warn!("scraping: invalid selector '{}': {:?}", css, e);
            None
        }
    }
}

/// Looks for `<link rel="alternate" type="application/rss+xml">` (or Atom) and resolves it
/// against the page URL.
pub fn find_feed_link(html: &str, page_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok()?;
    let sel = selector("link[href]")?;

    document.select(&sel).find_map(|link| {
        let el = link.value();
        let is_alternate = el
            .attr("rel")
            .map(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("alternate")))
            .unwrap_or(false);
        let is_feed = matches!(
            el.attr("type").map(|t| t.trim().to_ascii_lowercase()).as_deref(),
            Some("application/rss+xml") | Some("application/atom+xml")
        );
        if !(is_alternate && is_feed) {
            return None;
        }
        base.join(el.attr("href")?).ok().map(|u| u.to_string())
    })
}

/// Collects same-site article links from a news listing page, in document order,
/// deduplicated and capped at `cap`.
pub fn extract_news_links(html: &str, base_url: &str, cap: usize) -> Vec<String> {
    let Ok(base) = Url::parse(base_url) else {
        warn!("scraping: listing page URL is not absolute: {}", base_url);
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let Some(sel) = selector("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for anchor in document.select(&sel) {
        let Some(href) = anchor.value().attr("href") else { continue };
        let Ok(mut full) = base.join(href) else { continue };
        full.set_fragment(None);
        if full.host_str() != base.host_str() {
            continue;
        }
        let path = full.path().to_lowercase();
        if !NEWS_PATH_HINTS.iter().any(|hint| path.contains(hint)) {
            continue;
        }
        let link = full.to_string();
        if link == base.as_str() || !seen.insert(link.clone()) {
            continue;
        }
        links.push(link);
        if links.len() >= cap {
            break;
        }
    }
    links
}

/// Extracts the title and main text of an article page.
/// Uses readability first, then a selector heuristic when readability finds nothing.
pub fn extract_article(html: &str, url: &str) -> Result<Article> {
    let url_obj = Url::parse(url).context("failed to parse article URL")?;
    let mut reader = Cursor::new(html.as_bytes());

    match readability::extractor::extract(&mut reader, &url_obj) {
        Ok(product) => {
            let text = collapse_whitespace(&html_to_text(&product.content));
            if !text.is_empty() {
                info!("scraping: readability extracted {} chars from {}", text.len(), url);
                return Ok(Article {
                    title: product.title.trim().to_string(),
                    text,
                });
            }
            debug!("scraping: readability returned no text for {}", url);
        }
        Err(e) => {
            warn!("scraping: readability failed for {}: {}", url, e);
        }
    }

    Ok(selector_fallback(html, url))
}

fn selector_fallback(html: &str, url: &str) -> Article {
    let document = Html::parse_document(html);
    let title = selector("title")
        .and_then(|sel| document.select(&sel).next().map(|t| element_text(&t)))
        .unwrap_or_default();

    // Heuristic: <article>, then <main>, then common CMS containers
    for css in ["article", "main", ".post-content", ".entry-content", "#content"] {
        let Some(sel) = selector(css) else { continue };
        if let Some(element) = document.select(&sel).next() {
            let text = collapse_whitespace(&html_to_text(&element.html()));
            if !text.is_empty() {
                info!("scraping: found content using selector '{}' ({} chars) for {}", css, text.len(), url);
                return Article { title, text };
            }
        }
    }

    // Fallback: just get all paragraphs
    let paragraphs = selector("p")
        .map(|sel| {
            document
                .select(&sel)
                .map(|p| element_text(&p))
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    if paragraphs.is_empty() {
        warn!("scraping: could not extract content for {}", url);
    }
    Article {
        title,
        text: paragraphs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_text_skips_scripts_and_separates_nodes() {
        let doc = Html::parse_document(
            "<html><head><title>T</title><script>var x = 1;</script></head>\
             <body>Press Release<br>January 29, 2026<style>p{}</style></body></html>",
        );
        assert_eq!(visible_text(&doc), "T Press Release January 29, 2026");
    }

    #[test]
    fn feed_link_is_resolved_against_page() {
        let html = r#"<html><head>
            <link rel="stylesheet" href="/main.css">
            <link rel="alternate" type="application/rss+xml" href="/feed.xml">
        </head><body></body></html>"#;
        assert_eq!(
            find_feed_link(html, "https://news.example.com/newsroom/").as_deref(),
            Some("https://news.example.com/feed.xml")
        );
        assert_eq!(find_feed_link("<html></html>", "https://news.example.com/"), None);
    }

    #[test]
    fn news_links_are_same_site_deduped_and_capped() {
        let mut html = String::from("<html><body>");
        html.push_str(r#"<a href="https://other.example/news/1">external</a>"#);
        html.push_str(r#"<a href="/about">about</a>"#);
        html.push_str(r#"<a href="/news/a#top">a</a><a href="/news/a">a again</a>"#);
        for i in 0..15 {
            html.push_str(&format!(r#"<a href="/press/{}">p{}</a>"#, i, i));
        }
        html.push_str("</body></html>");

        let links = extract_news_links(&html, "https://corp.example/newsroom", 10);
        assert_eq!(links.len(), 10);
        assert_eq!(links[0], "https://corp.example/news/a");
        assert_eq!(links[1], "https://corp.example/press/0");
        assert!(links.iter().all(|l| l.starts_with("https://corp.example/")));
    }

    #[test]
    fn clean_text_collapses_and_truncates_on_char_boundaries() {
        assert_eq!(clean_text("  a \n\n b\tc ", 100), "a b c");
        assert_eq!(clean_text("привет мир", 6), "привет");
    }
}
