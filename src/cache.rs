//! Key-value cache with a durable HTTP backend and an in-process fallback

use crate::types::AmbiguityResult;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const ANSWER_TTL: Duration = Duration::from_secs(3600);
pub const AMBIGUITY_TTL: Duration = Duration::from_secs(600);
pub const REFINED_TTL: Duration = Duration::from_secs(3600);

const ANSWER_PREFIX: &str = "company_info:";
const AMBIGUITY_PREFIX: &str = "ambiguity:";
const REFINED_PREFIX: &str = "refined_response:";

pub fn answer_key(entity_name: &str, category: &str) -> String {
    format!(
        "{}{}:{}",
        ANSWER_PREFIX,
        entity_name.to_lowercase(),
        category.to_lowercase()
    )
}

pub fn ambiguity_key(raw_query: &str) -> String {
    format!("{}{}", AMBIGUITY_PREFIX, raw_query)
}

pub fn refined_key(category: &str, question: &str) -> String {
    format!("{}{}:{}", REFINED_PREFIX, category, question.to_lowercase())
}

/// Whole-entry key-value store with TTL
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
    /// Drop every entry
    async fn flush(&self) -> Result<()>;
    fn is_available(&self) -> bool;
}

/// Process-local map. TTLs are accepted but not enforced.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn flush(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Stand-in when no durable backend is configured. Reports itself
/// unavailable, so every helper below treats it as a no-op.
pub struct DisabledCacheStore;

#[async_trait]
impl CacheStore for DisabledCacheStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
        Ok(vec![])
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[derive(Debug, Deserialize)]
struct KeysResponse {
    keys: Vec<String>,
}

/// Client for a networked key-value service
pub struct HttpCacheStore {
    base_url: String,
    client: reqwest::Client,
    available: bool,
}

impl HttpCacheStore {
    /// Build the client and probe `/health` once. An unreachable backend
    /// yields a store that reports itself unavailable.
    pub async fn connect(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build cache client")?;

        let url = format!("{}/health", base_url);
        let available = match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("Connected to cache service at {}", base_url);
                true
            }
            Ok(resp) => {
                warn!(
                    "Cache service returned status {}; running without durable cache",
                    resp.status()
                );
                false
            }
            Err(e) => {
                warn!(
                    "Cache service unreachable at {}: {}; running without durable cache",
                    base_url, e
                );
                false
            }
        };

        Ok(Self {
            base_url,
            client,
            available,
        })
    }

    fn kv_url(&self, key: &str) -> String {
        format!("{}/kv/{}", self.base_url, urlencoding::encode(key))
    }
}

#[async_trait]
impl CacheStore for HttpCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let response = self.client.get(self.kv_url(key)).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Cache API error {}: {}", status, body);
        }

        Ok(Some(response.text().await?))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let url = format!("{}?ttl={}", self.kv_url(key), ttl.as_secs());
        let response = self
            .client
            .put(&url)
            .body(value.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Cache API error {}: {}", status, body);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self.client.delete(self.kv_url(key)).send().await?;

        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Cache API error {}: {}", status, body);
        }
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/keys?prefix={}",
            self.base_url,
            urlencoding::encode(prefix)
        );
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Cache API error {}: {}", status, body);
        }

        let parsed: KeysResponse = response.json().await?;
        Ok(parsed.keys)
    }

    async fn flush(&self) -> Result<()> {
        let url = format!("{}/flush", self.base_url);
        let response = self.client.post(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Cache API error {}: {}", status, body);
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

/// Read and decode a JSON entry. Unavailable stores, backend errors and
/// undecodable payloads all read as a miss.
pub async fn load_json<T: DeserializeOwned>(store: &dyn CacheStore, key: &str) -> Option<T> {
    if !store.is_available() {
        return None;
    }

    let raw = match store.get(key).await {
        Ok(raw) => raw?,
        Err(e) => {
            warn!("Cache read failed for {}: {:?}", key, e);
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Discarding undecodable cache entry {}: {}", key, e);
            None
        }
    }
}

/// Encode and write a JSON entry. Failures are logged, never raised.
pub async fn store_json<T: Serialize>(store: &dyn CacheStore, key: &str, value: &T, ttl: Duration) {
    if !store.is_available() {
        return;
    }

    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to encode cache entry {}: {}", key, e);
            return;
        }
    };

    match store.set(key, &raw, ttl).await {
        Ok(()) => debug!("Stored cache entry {}", key),
        Err(e) => warn!("Cache write failed for {}: {:?}", key, e),
    }
}

/// A pending clarification picked by `take_selection`
#[derive(Debug, Clone, PartialEq)]
pub struct PendingClarification {
    pub raw_query: String,
    pub candidates: Vec<String>,
}

/// Pending clarifications keyed by the raw query that produced them.
/// Entries live in the durable store (with TTL) and in an in-process
/// fallback map, which never expires.
pub struct ClarificationRegistry {
    durable: Arc<dyn CacheStore>,
    fallback: MemoryCacheStore,
}

impl ClarificationRegistry {
    pub fn new(durable: Arc<dyn CacheStore>) -> Self {
        Self {
            durable,
            fallback: MemoryCacheStore::new(),
        }
    }

    /// Record candidates for `raw_query` in both stores
    pub async fn register(&self, raw_query: &str, ambiguity: &AmbiguityResult) {
        store_json(
            self.durable.as_ref(),
            &ambiguity_key(raw_query),
            &ambiguity.candidates,
            AMBIGUITY_TTL,
        )
        .await;

        // The in-memory map is infallible
        if let Ok(raw) = serde_json::to_string(&ambiguity.candidates) {
            let _ = self.fallback.set(raw_query, &raw, AMBIGUITY_TTL).await;
        }
    }

    /// Candidates pending for `raw_query`, compared case-insensitively
    #[cfg(test)]
    pub async fn pending(&self, raw_query: &str) -> Option<Vec<String>> {
        let wanted = raw_query.to_lowercase();
        self.scan(|query, _| query.to_lowercase() == wanted)
            .await
            .map(|p| p.candidates)
    }

    /// Find the entry listing `selection` among its candidates and remove it.
    /// The durable store is searched before the fallback.
    pub async fn take_selection(&self, selection: &str) -> Option<PendingClarification> {
        let found = self
            .scan(|_, candidates| candidates.iter().any(|c| c == selection))
            .await?;
        self.remove(&found.raw_query).await;
        Some(found)
    }

    async fn scan<F>(&self, matches: F) -> Option<PendingClarification>
    where
        F: Fn(&str, &[String]) -> bool,
    {
        if self.durable.is_available() {
            match self.durable.keys_with_prefix(AMBIGUITY_PREFIX).await {
                Ok(keys) => {
                    for key in keys {
                        let Some(candidates) =
                            load_json::<Vec<String>>(self.durable.as_ref(), &key).await
                        else {
                            continue;
                        };
                        let raw_query = key.strip_prefix(AMBIGUITY_PREFIX).unwrap_or(&key);
                        if matches(raw_query, &candidates) {
                            return Some(PendingClarification {
                                raw_query: raw_query.to_string(),
                                candidates,
                            });
                        }
                    }
                }
                Err(e) => warn!("Failed to list pending clarifications: {:?}", e),
            }
        }

        let keys = self.fallback.keys_with_prefix("").await.ok()?;
        for raw_query in keys {
            let Some(candidates) = load_json::<Vec<String>>(&self.fallback, &raw_query).await
            else {
                continue;
            };
            if matches(&raw_query, &candidates) {
                return Some(PendingClarification {
                    raw_query,
                    candidates,
                });
            }
        }

        None
    }

    async fn remove(&self, raw_query: &str) {
        if self.durable.is_available() {
            if let Err(e) = self.durable.delete(&ambiguity_key(raw_query)).await {
                warn!("Failed to delete pending clarification '{}': {:?}", raw_query, e);
            }
        }
        let _ = self.fallback.delete(raw_query).await;
    }

    /// Forget everything held in process
    pub async fn clear_local(&self) {
        let _ = self.fallback.flush().await;
    }
}
