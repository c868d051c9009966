//! HTTP-based structured-knowledge source backed by the MediaWiki API

use crate::{EntityDirectory, Evidence, EvidenceSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Characters of page content kept as evidence
const EXTRACT_CHARS: usize = 500;
const SEARCH_LIMIT: usize = 10;

/// Response from `list=search`
#[derive(Debug, Deserialize)]
struct SearchResponse {
    query: SearchQuery,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
}

/// Response from `prop=extracts|info`
#[derive(Debug, Deserialize)]
struct PageResponse {
    query: PageQuery,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    pages: HashMap<String, Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    extract: Option<String>,
    #[serde(default)]
    fullurl: Option<String>,
    #[serde(default)]
    missing: Option<serde_json::Value>,
}

/// Wikipedia search + page extract
pub struct WikipediaSource {
    api_url: String,
    client: reqwest::Client,
}

impl WikipediaSource {
    pub fn new(api_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("entityscope/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build Wikipedia client")?;
        Ok(Self { api_url, client })
    }

    async fn search_titles(&self, query: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}?action=query&list=search&format=json&srlimit={}&srsearch={}",
            self.api_url,
            SEARCH_LIMIT,
            urlencoding::encode(query)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to call Wikipedia search")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Wikipedia search error ({}): {}", status, body);
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .context("Failed to parse Wikipedia search response")?;

        Ok(parsed.query.search.into_iter().map(|h| h.title).collect())
    }

    async fn fetch_page(&self, title: &str) -> Result<Option<Evidence>> {
        let url = format!(
            "{}?action=query&prop=extracts|info&inprop=url&explaintext=1&redirects=1&format=json&titles={}",
            self.api_url,
            urlencoding::encode(title)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to call Wikipedia page API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Wikipedia page error ({}): {}", status, body);
        }

        let parsed: PageResponse = response
            .json()
            .await
            .context("Failed to parse Wikipedia page response")?;

        let page = parsed
            .query
            .pages
            .into_values()
            .find(|p| p.missing.is_none());

        Ok(page.and_then(page_to_evidence))
    }
}

fn page_to_evidence(page: Page) -> Option<Evidence> {
    let extract = page.extract?;
    let text: String = extract.chars().take(EXTRACT_CHARS).collect();
    if text.trim().is_empty() {
        return None;
    }
    let locator = page.fullurl.unwrap_or_default();
    Some(Evidence::new(text, locator))
}

#[async_trait]
impl EvidenceSource for WikipediaSource {
    fn name(&self) -> &'static str {
        "Wikipedia"
    }

    async fn fetch(&self, query: &str) -> Result<Option<Evidence>> {
        let titles = self.search_titles(query).await?;

        // The first hit is taken as the most relevant page
        let Some(top) = titles.first() else {
            tracing::debug!("Wikipedia: no pages for '{}'", query);
            return Ok(None);
        };

        self.fetch_page(top).await
    }
}

#[async_trait]
impl EntityDirectory for WikipediaSource {
    async fn search(&self, name: &str) -> Result<Vec<String>> {
        self.search_titles(name).await
    }
}
