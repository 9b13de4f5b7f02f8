use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::EncyclopediaConfig;
use crate::error::PipelineError;
use crate::retrieval::chunker::TextSplitter;

/// Keyword search plus full-text fetch against an external encyclopedia.
pub trait Encyclopedia: Send + Sync {
    fn search_titles(&self, keyword: &str, limit: usize) -> Result<Vec<String>>;
    fn fetch_page(&self, title: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncyclopediaPage {
    pub title: String,
    pub text: String,
}

/// MediaWiki action API client (Korean Wikipedia by default).
pub struct MediaWikiClient {
    client: reqwest::blocking::Client,
    api_url: String,
}

impl MediaWikiClient {
    pub fn new(config: &EncyclopediaConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .user_agent(concat!("csat-rag/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to create HTTP client for encyclopedia")?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
        })
    }

    fn get_json(&self, query: &[(&str, &str)]) -> Result<Value> {
        let response = self
            .client
            .get(&self.api_url)
            .query(query)
            .send()
            .map_err(|err| anyhow!(PipelineError::transient("encyclopedia", err.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!(PipelineError::transient(
                "encyclopedia",
                format!("HTTP {status}")
            )));
        }

        response
            .json::<Value>()
            .map_err(|err| anyhow!(PipelineError::transient("encyclopedia", err.to_string())))
    }
}

impl Encyclopedia for MediaWikiClient {
    fn search_titles(&self, keyword: &str, limit: usize) -> Result<Vec<String>> {
        let limit = limit.to_string();
        let body = self.get_json(&[
            ("action", "query"),
            ("list", "search"),
            ("format", "json"),
            ("srsearch", keyword),
            ("srlimit", limit.as_str()),
        ])?;
        Ok(parse_search_titles(&body))
    }

    fn fetch_page(&self, title: &str) -> Result<Option<String>> {
        let body = self.get_json(&[
            ("action", "query"),
            ("prop", "extracts"),
            ("explaintext", "1"),
            ("redirects", "1"),
            ("format", "json"),
            ("titles", title),
        ])?;
        Ok(parse_page_extract(&body))
    }
}

pub(crate) fn parse_search_titles(body: &Value) -> Vec<String> {
    body.pointer("/query/search")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("title").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn parse_page_extract(body: &Value) -> Option<String> {
    body.pointer("/query/pages")
        .and_then(Value::as_object)?
        .values()
        .filter_map(|page| page.get("extract").and_then(Value::as_str))
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

/// Searches every keyword and fetches up to `max_pages` pages each.
///
/// Failed searches and fetches are logged and skipped; a title is fetched at
/// most once across keywords.
pub fn search_and_fetch(
    source: &dyn Encyclopedia,
    keywords: &[String],
    max_pages: usize,
) -> Vec<EncyclopediaPage> {
    let mut seen = HashSet::<String>::new();
    let mut pages = Vec::<EncyclopediaPage>::new();

    for keyword in keywords {
        let titles = match source.search_titles(keyword, max_pages) {
            Ok(titles) => titles,
            Err(err) => {
                warn!(keyword = %keyword, error = %err, "encyclopedia search failed, skipping");
                continue;
            }
        };

        for title in titles.into_iter().take(max_pages) {
            if !seen.insert(title.clone()) {
                continue;
            }
            match source.fetch_page(&title) {
                Ok(Some(text)) => pages.push(EncyclopediaPage { title, text }),
                Ok(None) => debug!(title = %title, "encyclopedia page has no text"),
                Err(err) => warn!(title = %title, error = %err, "encyclopedia fetch failed, skipping"),
            }
        }
    }

    pages
}

pub fn page_chunks(pages: &[EncyclopediaPage], splitter: &TextSplitter, max_chunks: usize) -> Vec<String> {
    pages
        .iter()
        .flat_map(|page| splitter.split(&page.text))
        .take(max_chunks)
        .collect()
}
