//! Evidence sources and the entity directory used for verification

use crate::types::Evidence;
use anyhow::Result;
use async_trait::async_trait;

/// Pluggable provider of raw text for a structured query
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    /// Label used in merged citations
    fn name(&self) -> &'static str;

    /// `Ok(None)` is a genuine empty result; `Err` is a transient failure.
    async fn fetch(&self, query: &str) -> Result<Option<Evidence>>;
}

/// Title search used to verify an extracted entity name
#[async_trait]
pub trait EntityDirectory: Send + Sync {
    /// Candidate titles, best match first
    async fn search(&self, name: &str) -> Result<Vec<String>>;
}

/// In-process source answering from a fixed table (mock mode).
/// Entries are checked in insertion order.
pub struct StaticSource {
    name: &'static str,
    entries: Vec<(String, Evidence)>,
}

impl StaticSource {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    /// Answer any query mentioning `needle` (case-insensitive) with `evidence`
    pub fn with_entry(mut self, needle: &str, evidence: Evidence) -> Self {
        self.entries.push((needle.to_lowercase(), evidence));
        self
    }
}

#[async_trait]
impl EvidenceSource for StaticSource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self, query: &str) -> Result<Option<Evidence>> {
        let query = query.to_lowercase();
        Ok(self
            .entries
            .iter()
            .find(|(needle, _)| query.contains(needle.as_str()))
            .map(|(_, ev)| ev.clone()))
    }
}

/// In-process directory over a fixed list of titles (mock mode)
pub struct StaticDirectory {
    titles: Vec<String>,
}

impl StaticDirectory {
    pub fn new(titles: Vec<String>) -> Self {
        Self { titles }
    }
}

#[async_trait]
impl EntityDirectory for StaticDirectory {
    async fn search(&self, name: &str) -> Result<Vec<String>> {
        let needle = name.to_lowercase();
        Ok(self
            .titles
            .iter()
            .filter(|t| t.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_matches_substring() {
        let source = StaticSource::new("Mock")
            .with_entry("acme", Evidence::new("Acme makes anvils.", "mock://acme"));

        let hit = source.fetch("General information about ACME Inc").await.unwrap();
        assert_eq!(hit.map(|e| e.locator), Some("mock://acme".to_string()));

        let miss = source.fetch("General information about Globex").await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_static_source_first_entry_wins() {
        let source = StaticSource::new("Mock")
            .with_entry("acme", Evidence::new("Acme makes anvils.", "mock://acme"))
            .with_entry("acme ltd", Evidence::new("Acme Ltd sells rockets.", "mock://acme-ltd"));

        for _ in 0..10 {
            let hit = source.fetch("Revenue of Acme Ltd").await.unwrap();
            assert_eq!(hit.map(|e| e.locator), Some("mock://acme".to_string()));
        }
    }

    #[tokio::test]
    async fn test_static_directory_search() {
        let dir = StaticDirectory::new(vec!["Acme Inc".into(), "Acme Ltd".into(), "Globex".into()]);
        let results = dir.search("acme").await.unwrap();
        assert_eq!(results, vec!["Acme Inc".to_string(), "Acme Ltd".to_string()]);
    }
}
