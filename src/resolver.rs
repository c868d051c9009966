//! Entity extraction, verification and disambiguation

use crate::cache::ClarificationRegistry;
use crate::error::ResolveError;
use crate::refiner::TextRefiner;
use crate::sources::EntityDirectory;
use crate::types::{AmbiguityResult, CategoryKind, ResolvedQuery};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Most candidates offered back to the user
pub const MAX_CANDIDATES: usize = 5;

const NAME_PREFIX: &str = "Company Name:";
const CATEGORY_PREFIX: &str = "Category:";

/// Non-error outcomes of resolution
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(ResolvedQuery),
    Ambiguous(AmbiguityResult),
}

/// Result of checking one entity name
#[derive(Debug, Clone, PartialEq)]
enum Verification {
    Verified,
    Ambiguous(Vec<String>),
    NotFound,
}

pub struct QueryResolver {
    refiner: Arc<dyn TextRefiner>,
    directory: Arc<dyn EntityDirectory>,
    registry: Arc<ClarificationRegistry>,
}

impl QueryResolver {
    pub fn new(
        refiner: Arc<dyn TextRefiner>,
        directory: Arc<dyn EntityDirectory>,
        registry: Arc<ClarificationRegistry>,
    ) -> Self {
        Self {
            refiner,
            directory,
            registry,
        }
    }

    /// Turn free text into a structured query, or explain why not
    pub async fn resolve(&self, raw_query: &str) -> Result<Resolution, ResolveError> {
        let raw = self
            .refiner
            .extract_company_and_category(raw_query)
            .await
            .map_err(|e| ResolveError::ServiceFailure {
                reason: format!("extraction call failed: {}", e),
            })?;

        let (entity_name, category_label) = parse_extraction(&raw)?;
        debug!("Extracted entity='{}' category='{}'", entity_name, category_label);

        match self.verify(&entity_name).await? {
            Verification::Verified => {
                let resolved = ResolvedQuery::new(entity_name, CategoryKind::parse(&category_label));
                info!(
                    "Resolved '{}' -> {} [{}]",
                    raw_query,
                    resolved.structured_query,
                    resolved.category.label()
                );
                Ok(Resolution::Resolved(resolved))
            }
            Verification::Ambiguous(candidates) => {
                let ambiguity = AmbiguityResult {
                    candidates,
                    message: format!(
                        "Multiple companies found for '{}'. Please clarify.",
                        entity_name
                    ),
                };
                warn!("Query is ambiguous: {:?}", ambiguity.candidates);
                self.registry.register(raw_query, &ambiguity).await;
                Ok(Resolution::Ambiguous(ambiguity))
            }
            Verification::NotFound => Err(ResolveError::EntityNotFound { name: entity_name }),
        }
    }

    async fn verify(&self, name: &str) -> Result<Verification, ResolveError> {
        let results = self
            .directory
            .search(name)
            .await
            .map_err(|e| ResolveError::ServiceFailure {
                reason: format!("entity search failed: {}", e),
            })?;

        let verdict = classify_matches(name, &results);
        if let Some(verdict) = verdict {
            return Ok(verdict);
        }

        // Exactly one non-matching hit: let the model decide
        debug!("Escalating '{}' to entity judgment", name);
        let judgment = self
            .refiner
            .judge_entity(name)
            .await
            .map_err(|e| ResolveError::ServiceFailure {
                reason: format!("entity judgment failed: {}", e),
            })?;

        Ok(parse_judgment(&judgment))
    }
}

/// Parse the two-line extraction structure into (entity, category)
pub fn parse_extraction(raw: &str) -> Result<(String, String), ResolveError> {
    let lines: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    let parsed = match lines.as_slice() {
        [first, second, ..] => first
            .strip_prefix(NAME_PREFIX)
            .zip(second.strip_prefix(CATEGORY_PREFIX))
            .map(|(name, category)| (name.trim().to_string(), category.trim().to_string())),
        _ => None,
    };

    match parsed {
        Some((name, category)) if !name.is_empty() => Ok((name, category)),
        _ => Err(ResolveError::MalformedExtraction { raw_lines: lines }),
    }
}

/// Decide from directory hits alone; `None` means a judgment call is needed
fn classify_matches(name: &str, results: &[String]) -> Option<Verification> {
    let Some(top) = results.first() else {
        return Some(Verification::NotFound);
    };

    let needle = name.to_lowercase();
    if results.iter().any(|r| r.to_lowercase() == needle) || top.to_lowercase().contains(&needle) {
        return Some(Verification::Verified);
    }

    if results.len() > 1 {
        return Some(Verification::Ambiguous(
            results.iter().take(MAX_CANDIDATES).cloned().collect(),
        ));
    }

    None
}

fn parse_judgment(raw: &str) -> Verification {
    let line = raw.trim();

    if line.starts_with("Verified:") {
        return Verification::Verified;
    }

    if let Some(rest) = line.strip_prefix("Ambiguous:") {
        let candidates: Vec<String> = rest
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .take(MAX_CANDIDATES)
            .map(str::to_string)
            .collect();
        if !candidates.is_empty() {
            return Verification::Ambiguous(candidates);
        }
    }

    // "Unknown:" and anything off-grammar
    Verification::NotFound
}
