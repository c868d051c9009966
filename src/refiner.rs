//! Text-generation capability: extraction, entity judgment and answer refinement

use crate::cache::{refined_key, CacheStore, REFINED_TTL};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[async_trait]
pub trait TextRefiner: Send + Sync {
    /// Two-line `Company Name: X` / `Category: Y` text
    async fn extract_company_and_category(&self, query: &str) -> Result<String>;

    /// Concise answer to `question` distilled from `text`
    async fn refine(&self, text: &str, category: &str, question: &str) -> Result<String>;

    /// One of `Verified: <name>`, `Ambiguous: <n1>, <n2>, ...`, `Unknown: <name>`
    async fn judge_entity(&self, name: &str) -> Result<String>;
}

const EXTRACTION_PROMPT: &str = "Extract the company name and classify the query into one of these categories:
- Company Overview (general information about the company)
- Business Model (how the company makes money)
- Location (where the company is headquartered)
- Key People (key executives or founders)
- Products (products or services offered)
- Investments (latest investments)
- Acquisitions (companies acquired)
- Recent News (latest news)
- Customers (main customers)
- Revenue (revenue generated)

Do not treat highly recognizable companies (e.g. Tesla, Google, Microsoft) as ambiguous.
If the company does not exist, answer: Error: Could not find any company with this name.

Respond strictly in this format:
Company Name: [company]
Category: [category]";

const REFINE_RULES: &str = "Extract only the direct answer to the question from the provided text, following the rule for the query type:
- Company Overview: a concise summary of industry, products and key facts in 2-3 sentences.
- Business Model: only the key revenue sources.
- Location: only the city and state (or country if no state is available).
- Key People: only names and roles of key executives.
- Products: only the main products or services.
- Investments: only the most recent investment amount, investors and date.
- Acquisitions: only the most recent acquisitions with company names and dates.
- Recent News: only the latest headline and date.
- Customers: only the types of customers.
- Revenue: only the latest reported revenue amount.
Return only the required information.";

const JUDGE_PROMPT: &str = "You are an expert business analyst. Decide whether the name below refers to a well-known company or is ambiguous.
Respond with exactly one line in one of these formats:
Verified: [company_name]
Ambiguous: [option1], [option2], [option3]
Unknown: [company_name]";

const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Chat-completions client
pub struct OpenAiRefiner {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiRefiner {
    pub fn new(api_url: String, api_key: String, model: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build OpenAI client")?;
        Ok(Self {
            api_url,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            client,
        })
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": 0.0
        });

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("Failed to call OpenAI")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("OpenAI API error {}: {}", status, body));
        }

        #[derive(Deserialize)]
        struct Message {
            content: String,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            choices: Vec<Choice>,
        }

        let api_response: ApiResponse = response.json().await?;
        api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| anyhow!("OpenAI returned no choices"))
    }
}

#[async_trait]
impl TextRefiner for OpenAiRefiner {
    async fn extract_company_and_category(&self, query: &str) -> Result<String> {
        self.complete(EXTRACTION_PROMPT, &format!("Query: {}", query)).await
    }

    async fn refine(&self, text: &str, category: &str, question: &str) -> Result<String> {
        let prompt = format!(
            "Query Type: {}\nQuestion: {}\nText: {}\n\nAnswer:",
            category, question, text
        );
        self.complete(REFINE_RULES, &prompt).await
    }

    async fn judge_entity(&self, name: &str) -> Result<String> {
        self.complete(JUDGE_PROMPT, &format!("Name: {}", name)).await
    }
}

/// Memoizes `refine` in the cache under `refined_response:<category>:<question>`
pub struct CachedRefiner {
    inner: Arc<dyn TextRefiner>,
    cache: Arc<dyn CacheStore>,
}

impl CachedRefiner {
    pub fn new(inner: Arc<dyn TextRefiner>, cache: Arc<dyn CacheStore>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl TextRefiner for CachedRefiner {
    async fn extract_company_and_category(&self, query: &str) -> Result<String> {
        self.inner.extract_company_and_category(query).await
    }

    async fn refine(&self, text: &str, category: &str, question: &str) -> Result<String> {
        let key = refined_key(category, question);

        // Entries hold the refined text itself, not a JSON document
        if self.cache.is_available() {
            match self.cache.get(&key).await {
                Ok(Some(hit)) => {
                    info!("Refined response cache hit for '{}'", question);
                    return Ok(hit);
                }
                Ok(None) => {}
                Err(e) => warn!("Refined response cache read failed for {}: {:?}", key, e),
            }
        }

        let refined = self.inner.refine(text, category, question).await?;
        if self.cache.is_available() {
            if let Err(e) = self.cache.set(&key, &refined, REFINED_TTL).await {
                warn!("Refined response cache write failed for {}: {:?}", key, e);
            }
        }
        Ok(refined)
    }

    async fn judge_entity(&self, name: &str) -> Result<String> {
        self.inner.judge_entity(name).await
    }
}

/// Category keywords for the offline extractor, checked in order
const CATEGORY_KEYWORDS: &[(&str, &str)] = &[
    ("revenue", "Revenue"),
    ("headquarter", "Location"),
    ("located", "Location"),
    ("ceo", "Key People"),
    ("founder", "Key People"),
    ("executive", "Key People"),
    ("product", "Products"),
    ("acquisition", "Acquisitions"),
    ("acquire", "Acquisitions"),
    ("invest", "Investments"),
    ("news", "Recent News"),
    ("customer", "Customers"),
    ("make money", "Business Model"),
    ("business model", "Business Model"),
];

/// Network-free refiner used by the server's mock mode. Knows a fixed set of
/// entity names, classifies by keyword and returns text unrefined.
pub struct OfflineRefiner {
    known_entities: Vec<String>,
}

impl OfflineRefiner {
    pub fn new(known_entities: Vec<String>) -> Self {
        Self { known_entities }
    }
}

#[async_trait]
impl TextRefiner for OfflineRefiner {
    async fn extract_company_and_category(&self, query: &str) -> Result<String> {
        let lowered = query.to_lowercase();

        // Longest name wins so "Acme Ltd" beats "Acme"
        let entity = self
            .known_entities
            .iter()
            .filter(|name| lowered.contains(&name.to_lowercase()))
            .max_by_key(|name| name.len());

        let Some(entity) = entity else {
            return Ok("Error: Could not find any company with this name.".to_string());
        };

        let category = CATEGORY_KEYWORDS
            .iter()
            .find(|(kw, _)| lowered.contains(kw))
            .map(|(_, cat)| *cat)
            .unwrap_or("Company Overview");

        debug!("Offline extraction: '{}' -> {} / {}", query, entity, category);
        Ok(format!("Company Name: {}\nCategory: {}", entity, category))
    }

    async fn refine(&self, text: &str, _category: &str, _question: &str) -> Result<String> {
        Ok(text.to_string())
    }

    async fn judge_entity(&self, name: &str) -> Result<String> {
        Ok(format!("Unknown: {}", name))
    }
}
