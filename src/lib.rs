//! entityscope - entity question answering over corroborated evidence
//!
//! Resolves the company a question is about, fans out to a
//! structured-knowledge source and a web-search source in parallel,
//! merges their evidence into one scored answer and caches the result.
//! Ambiguous names are parked as pending clarifications until the
//! caller picks a candidate.

pub mod types;
pub mod error;
pub mod sources;
pub mod wiki_source;
pub mod web_source;
pub mod refiner;
pub mod cache;
pub mod resolver;
pub mod aggregator;
pub mod orchestrator;
pub mod config;
pub mod server;

pub use types::*;
pub use error::ResolveError;
pub use sources::{EntityDirectory, EvidenceSource, StaticDirectory, StaticSource};
pub use wiki_source::WikipediaSource;
pub use web_source::TavilySource;
pub use refiner::{CachedRefiner, OfflineRefiner, OpenAiRefiner, TextRefiner};
pub use cache::{CacheStore, ClarificationRegistry, DisabledCacheStore, HttpCacheStore, MemoryCacheStore};
pub use resolver::{QueryResolver, Resolution};
pub use aggregator::{AggregatorSettings, EvidenceAggregator};
pub use orchestrator::{Orchestrator, SharedOrchestrator};
pub use config::AppConfig;

#[cfg(test)]
mod tests;
