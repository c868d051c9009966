//! HTTP-based web-search source backed by the Tavily search API

use crate::{Evidence, EvidenceSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_RESULTS: usize = 3;

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Tavily web search
pub struct TavilySource {
    api_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl TavilySource {
    pub fn new(api_url: String, api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Tavily client")?;
        Ok(Self {
            api_url,
            api_key,
            client,
        })
    }
}

/// Top result as evidence; blank content counts as empty
fn first_result(response: SearchResponse) -> Option<Evidence> {
    let top = response.results.into_iter().next()?;
    if top.content.trim().is_empty() {
        return None;
    }
    Some(Evidence::new(top.content, top.url))
}

#[async_trait]
impl EvidenceSource for TavilySource {
    fn name(&self) -> &'static str {
        "Tavily"
    }

    async fn fetch(&self, query: &str) -> Result<Option<Evidence>> {
        let req = SearchRequest {
            api_key: &self.api_key,
            query,
            max_results: MAX_RESULTS,
        };

        let response = self
            .client
            .post(&self.api_url)
            .json(&req)
            .send()
            .await
            .context("Failed to call Tavily search")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Tavily search error ({}): {}", status, error_text);
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .context("Failed to parse Tavily response")?;

        tracing::debug!("Tavily: {} results for '{}'", parsed.results.len(), query);

        Ok(first_result(parsed))
    }
}
