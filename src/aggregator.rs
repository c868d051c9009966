//! Parallel evidence fan-out, merge and confidence scoring

use crate::refiner::TextRefiner;
use crate::sources::EvidenceSource;
use crate::types::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Appended to the structured query when both sources come back empty
pub const REFINEMENT_SUFFIX: &str = "detailed explanation";

/// Merged text shorter than this is returned without refinement
pub const MIN_REFINE_CHARS: usize = 100;

/// Prefix of source A that must appear in source B to count as corroborated
const CORROBORATION_CHARS: usize = 100;

/// Fallback excerpt length when no web paragraph names the entity
const FALLBACK_EXCERPT_CHARS: usize = 500;

const CONFIDENCE_CORROBORATED: f32 = 0.9;
const CONFIDENCE_BOTH: f32 = 0.8;
const CONFIDENCE_SINGLE: f32 = 0.7;

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    /// Extra attempts per source after the first failure
    pub source_retries: u32,
    pub source_backoff: Duration,
    /// Upper bound on a single source attempt
    pub attempt_timeout: Duration,
    /// Re-runs of the whole fan-out with a refined query
    pub refinement_retries: u32,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            source_retries: 2,
            source_backoff: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(20),
            refinement_retries: 2,
        }
    }
}

/// Evidence merged from one fan-out round, before refinement
#[derive(Debug, Clone, PartialEq)]
struct MergedEvidence {
    text: String,
    confidence: f32,
    citation: String,
}

pub struct EvidenceAggregator {
    /// Structured-knowledge source (A)
    knowledge: Arc<dyn EvidenceSource>,
    /// Web-search source (B)
    web: Arc<dyn EvidenceSource>,
    refiner: Arc<dyn TextRefiner>,
    settings: AggregatorSettings,
}

impl EvidenceAggregator {
    pub fn new(
        knowledge: Arc<dyn EvidenceSource>,
        web: Arc<dyn EvidenceSource>,
        refiner: Arc<dyn TextRefiner>,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            knowledge,
            web,
            refiner,
            settings,
        }
    }

    /// Produce a scored answer for `query`. Never fails: source errors become
    /// sentinels and an exhausted retry budget yields the no-data answer.
    pub async fn aggregate(&self, query: &ResolvedQuery) -> FinalAnswer {
        let start = Instant::now();
        let mut state = RetrievalState::new(query);

        let answer = loop {
            self.fan_out(&mut state).await;

            let merged = match (&state.evidence_a, &state.evidence_b) {
                (Some(a), Some(b)) => merge_evidence(self.knowledge.name(), a, self.web.name(), b),
                _ => None,
            };

            if let Some(merged) = merged {
                break self.finish(merged, query).await;
            }

            if state.retries >= self.settings.refinement_retries {
                warn!(
                    "No evidence for '{}' after {} refinement retries",
                    query.structured_query, state.retries
                );
                break FinalAnswer::no_data();
            }

            state.retries += 1;
            state.structured_query = format!("{} {}", state.structured_query, REFINEMENT_SUFFIX);
            info!(
                "No results found. Refining query and retrying (attempt {}): {}",
                state.retries, state.structured_query
            );
        };

        info!(
            "Aggregation complete in {}ms: confidence={:.1}, retries={}",
            start.elapsed().as_millis(),
            answer.confidence,
            state.retries
        );

        state.final_answer = Some(answer.clone());
        answer
    }

    /// Query both sources concurrently; merge waits for both
    async fn fan_out(&self, state: &mut RetrievalState) {
        let (a, b) = futures::future::join(
            self.query_source(self.knowledge.as_ref(), &state.structured_query),
            self.query_source(self.web.as_ref(), &state.structured_query),
        )
        .await;

        let b = match b {
            SourceOutcome::Found(ev) => SourceOutcome::Found(Evidence {
                text: extract_relevant_paragraph(&ev.text, &state.entity_name),
                locator: ev.locator,
            }),
            other => other,
        };

        debug!("{} -> {:?}", self.knowledge.name(), a.describe());
        debug!("{} -> {:?}", self.web.name(), b.describe());

        state.evidence_a = Some(a);
        state.evidence_b = Some(b);
    }

    /// One source with local retries. Errors and timeouts never escape.
    async fn query_source(&self, source: &dyn EvidenceSource, query: &str) -> SourceOutcome {
        let attempts = self.settings.source_retries + 1;

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.settings.attempt_timeout, source.fetch(query)).await {
                Ok(Ok(Some(ev))) if !ev.text.trim().is_empty() => return SourceOutcome::Found(ev),
                Ok(Ok(_)) => return SourceOutcome::Empty,
                Ok(Err(e)) => {
                    warn!("{} retrieval failed (attempt {}): {:?}", source.name(), attempt, e);
                }
                Err(_) => {
                    warn!(
                        "{} retrieval timed out after {:?} (attempt {})",
                        source.name(),
                        self.settings.attempt_timeout,
                        attempt
                    );
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.settings.source_backoff).await;
            }
        }

        SourceOutcome::Failed
    }

    async fn finish(&self, merged: MergedEvidence, query: &ResolvedQuery) -> FinalAnswer {
        let answer_text = self
            .refine_text(merged.text, query.category.label(), &query.structured_query)
            .await;

        FinalAnswer {
            answer_text,
            confidence: merged.confidence,
            source_citation: merged.citation,
        }
    }

    async fn refine_text(&self, text: String, category: &str, question: &str) -> String {
        if text.chars().count() < MIN_REFINE_CHARS {
            info!("Skipping refinement: merged text is too short");
            return text;
        }

        match self.refiner.refine(&text, category, question).await {
            Ok(refined) if !refined.trim().is_empty() => refined,
            Ok(_) => {
                warn!("Refiner returned nothing; using merged text");
                text
            }
            Err(e) => {
                warn!("Refinement failed, returning merged text: {:?}", e);
                text
            }
        }
    }
}

/// Combine the two outcomes. `None` when neither carries usable evidence.
fn merge_evidence(
    a_name: &str,
    a: &SourceOutcome,
    b_name: &str,
    b: &SourceOutcome,
) -> Option<MergedEvidence> {
    match (a.evidence(), b.evidence()) {
        (None, None) => None,
        (Some(only), None) | (None, Some(only)) => Some(MergedEvidence {
            text: only.text.clone(),
            confidence: CONFIDENCE_SINGLE,
            citation: only.locator.clone(),
        }),
        (Some(ev_a), Some(ev_b)) => {
            let prefix: String = ev_a.text.chars().take(CORROBORATION_CHARS).collect();
            let confidence = if ev_b.text.contains(&prefix) {
                CONFIDENCE_CORROBORATED
            } else {
                CONFIDENCE_BOTH
            };

            Some(MergedEvidence {
                text: format!("{}\n\n{}", ev_a.text, ev_b.text),
                confidence,
                citation: format!("{}: {}\n{}: {}", a_name, ev_a.locator, b_name, ev_b.locator),
            })
        }
    }
}

/// First newline-delimited paragraph mentioning `entity` (case-insensitive),
/// else the first 500 characters of `text`
pub fn extract_relevant_paragraph(text: &str, entity: &str) -> String {
    let needle = entity.to_lowercase();

    text.split('\n')
        .find(|p| p.to_lowercase().contains(&needle))
        .map(str::to_string)
        .unwrap_or_else(|| text.chars().take(FALLBACK_EXCERPT_CHARS).collect())
}
