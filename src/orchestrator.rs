//! Request entry points: cache-first answering and clarification

use crate::aggregator::EvidenceAggregator;
use crate::cache::{answer_key, load_json, store_json, CacheStore, ClarificationRegistry, ANSWER_TTL};
use crate::resolver::{QueryResolver, Resolution};
use crate::types::*;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Process-wide context shared by request handlers
pub struct Orchestrator {
    resolver: QueryResolver,
    aggregator: EvidenceAggregator,
    cache: Arc<dyn CacheStore>,
    registry: Arc<ClarificationRegistry>,
}

pub type SharedOrchestrator = Arc<Orchestrator>;

impl Orchestrator {
    /// The registry must be the one the resolver registers into
    pub fn new(
        resolver: QueryResolver,
        aggregator: EvidenceAggregator,
        cache: Arc<dyn CacheStore>,
        registry: Arc<ClarificationRegistry>,
    ) -> SharedOrchestrator {
        Arc::new(Self {
            resolver,
            aggregator,
            cache,
            registry,
        })
    }

    /// Main entry point: resolve the entity, then answer from cache or sources
    pub async fn resolve_and_answer(&self, raw_query: &str) -> QueryOutcome {
        info!("Received user query: {}", raw_query);

        // Step 1: Resolve (ambiguity short-circuits; the resolver has
        // already registered the pending clarification)
        let resolved = match self.resolver.resolve(raw_query).await {
            Ok(Resolution::Resolved(resolved)) => resolved,
            Ok(Resolution::Ambiguous(ambiguity)) => return QueryOutcome::Ambiguous(ambiguity),
            Err(e) => {
                warn!("Resolution failed for '{}': {}", raw_query, e);
                return QueryOutcome::Error(e.into());
            }
        };

        let category = resolved.category.label().to_string();
        let key = answer_key(&resolved.entity_name, &category);

        // Step 2: Cache check
        if let Some(answer) = load_json::<FinalAnswer>(self.cache.as_ref(), &key).await {
            info!("Cache hit for query: {}", raw_query);
            return QueryOutcome::Answer {
                entity_name: resolved.entity_name,
                category,
                answer,
            };
        }

        info!("Cache miss for query: {}, processing...", raw_query);

        // Step 3: Aggregate and store
        let answer = self.aggregator.aggregate(&resolved).await;
        store_json(self.cache.as_ref(), &key, &answer, ANSWER_TTL).await;

        QueryOutcome::Answer {
            entity_name: resolved.entity_name,
            category,
            answer,
        }
    }

    /// Resolve a pending ambiguity by picking one of its candidates
    pub async fn clarify(&self, selection: &str) -> QueryOutcome {
        let Some(pending) = self.registry.take_selection(selection).await else {
            warn!("Clarification '{}' matches no pending query", selection);
            return QueryOutcome::Error(ErrorResult {
                kind: ErrorKind::InvalidSelection,
                message: "Invalid selection. Please choose from the provided options.".to_string(),
                raw_lines: vec![],
            });
        };

        let refined = format!("{} (referring to {})", pending.raw_query, selection);
        info!("Clarified '{}' -> '{}'", pending.raw_query, refined);
        self.resolve_and_answer(&refined).await
    }

    /// Flush the durable store and the in-process clarifications
    pub async fn clear_all_cache(&self) -> ClearResult {
        self.registry.clear_local().await;

        if !self.cache.is_available() {
            warn!("Cache clear requested but the durable cache is not connected");
            return ClearResult { cleared: false };
        }

        match self.cache.flush().await {
            Ok(()) => {
                info!("Cache cleared");
                ClearResult { cleared: true }
            }
            Err(e) => {
                error!("Cache flush failed: {:?}", e);
                ClearResult { cleared: false }
            }
        }
    }
}
