//! Thin web capabilities: search and page fetch. Both return plain
//! text for the operator or the oracle; nothing here feeds back into
//! execution decisions.

use anyhow::{Context, Result};
use scraper::{Html, Selector};
use serde::Serialize;
use std::time::Duration;

const USER_AGENT: &str = "skipper-agent/0.1";
const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
}

fn http_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build http client")
}

/// Query the DuckDuckGo HTML endpoint and scrape result anchors.
pub fn web_search(query: &str, limit: usize) -> Result<Vec<SearchResult>> {
    let client = http_client()?;
    let body = client
        .get("https://duckduckgo.com/html/")
        .query(&[("q", query)])
        .send()
        .context("search request failed")?
        .error_for_status()
        .context("search request rejected")?
        .text()
        .context("search response was not text")?;

    let document = Html::parse_document(&body);
    let selector = Selector::parse("a.result__a").map_err(|e| anyhow::anyhow!("{e}"))?;
    let results = document
        .select(&selector)
        .filter_map(|anchor| {
            let url = anchor.value().attr("href")?.to_string();
            let title = anchor.text().collect::<String>().trim().to_string();
            (!title.is_empty()).then_some(SearchResult { title, url })
        })
        .take(limit)
        .collect();
    Ok(results)
}

/// Fetch a page and strip it to visible text, bounded at `max_chars`.
pub fn fetch_page(url: &str, max_chars: usize) -> Result<String> {
    let client = http_client()?;
    let body = client
        .get(url)
        .send()
        .with_context(|| format!("fetch of '{url}' failed"))?
        .error_for_status()
        .with_context(|| format!("fetch of '{url}' rejected"))?
        .text()
        .context("page body was not text")?;
    Ok(visible_text(&body, max_chars))
}

/// Visible text of an HTML document: body text with whitespace
/// collapsed, bounded at `max_chars`. Non-HTML input passes through
/// collapsed the same way.
fn visible_text(body: &str, max_chars: usize) -> String {
    let document = Html::parse_document(body);
    let text = match Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
    {
        Some(node) => node.text().collect::<Vec<_>>().join(" "),
        None => body.to_string(),
    };
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    skipper_core::truncate_preview(&collapsed, max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_text_strips_markup_and_collapses_whitespace() {
        let html = "<html><head><title>x</title></head>\
                    <body><h1>Greetings</h1>\n\n  <p>from   the <b>page</b></p></body></html>";
        assert_eq!(visible_text(html, 200), "Greetings from the page");
    }

    #[test]
    fn visible_text_is_bounded_with_a_marker() {
        let html = format!("<body><p>{}</p></body>", "word ".repeat(100));
        let text = visible_text(&html, 20);
        assert!(text.chars().count() < 100);
        assert!(text.ends_with("[truncated]"));
    }

    #[test]
    fn fetch_rejects_an_unparseable_url_without_a_request() {
        assert!(fetch_page("not a url", 100).is_err());
    }

    #[test]
    fn search_results_serialize_with_title_and_url() {
        let result = SearchResult {
            title: "Rust".to_string(),
            url: "https://rust-lang.org".to_string(),
        };
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(value["title"], "Rust");
        assert_eq!(value["url"], "https://rust-lang.org");
    }
}
