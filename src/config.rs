//! Environment-driven configuration

use crate::aggregator::AggregatorSettings;
use anyhow::{anyhow, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub wikipedia_api_url: String,
    pub tavily_api_url: String,
    pub tavily_api_key: Option<String>,
    pub openai_api_url: String,
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    /// Durable cache service; `None` runs without one
    pub cache_service_url: Option<String>,
    pub request_timeout: Duration,
    pub source_backoff: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_u64 = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            port: lookup("ENTITYSCOPE_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8081),
            wikipedia_api_url: lookup("WIKIPEDIA_API_URL")
                .unwrap_or_else(|| "https://en.wikipedia.org/w/api.php".to_string()),
            tavily_api_url: lookup("TAVILY_API_URL")
                .unwrap_or_else(|| "https://api.tavily.com/search".to_string()),
            tavily_api_key: non_empty("TAVILY_API_KEY"),
            openai_api_url: lookup("OPENAI_API_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_model: non_empty("OPENAI_MODEL"),
            cache_service_url: non_empty("CACHE_SERVICE_URL"),
            request_timeout: Duration::from_secs(parse_u64("ENTITYSCOPE_REQUEST_TIMEOUT_SECS", 20)),
            source_backoff: Duration::from_millis(parse_u64("ENTITYSCOPE_SOURCE_BACKOFF_MS", 1000)),
        }
    }

    pub fn aggregator_settings(&self) -> AggregatorSettings {
        AggregatorSettings {
            source_backoff: self.source_backoff,
            attempt_timeout: self.request_timeout,
            ..Default::default()
        }
    }

    pub fn require_tavily_key(&self) -> Result<String> {
        self.tavily_api_key
            .clone()
            .ok_or_else(|| anyhow!("TAVILY_API_KEY environment variable not set"))
    }

    pub fn require_openai_key(&self) -> Result<String> {
        self.openai_api_key
            .clone()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY environment variable not set"))
    }
}
