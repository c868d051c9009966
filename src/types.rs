//! Core type definitions for entity resolution and evidence aggregation

use serde::{Deserialize, Serialize};

/// One of the fixed query classifications
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CategoryKind {
    Overview,
    BusinessModel,
    Location,
    KeyPeople,
    Products,
    Investments,
    Acquisitions,
    RecentNews,
    Customers,
    Revenue,
    /// Anything the extractor returned that is not in the table
    Other(String),
}

impl CategoryKind {
    /// Parse an extracted category label. Matching is case-sensitive;
    /// unknown labels are kept verbatim as `Other`.
    pub fn parse(label: &str) -> Self {
        match label {
            "Company Overview" | "Overview" => CategoryKind::Overview,
            "Business Model" => CategoryKind::BusinessModel,
            "Location" => CategoryKind::Location,
            "Key People" => CategoryKind::KeyPeople,
            "Products" => CategoryKind::Products,
            "Investments" => CategoryKind::Investments,
            "Acquisitions" => CategoryKind::Acquisitions,
            "Recent News" => CategoryKind::RecentNews,
            "Customers" => CategoryKind::Customers,
            "Revenue" => CategoryKind::Revenue,
            other => CategoryKind::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            CategoryKind::Overview => "Company Overview",
            CategoryKind::BusinessModel => "Business Model",
            CategoryKind::Location => "Location",
            CategoryKind::KeyPeople => "Key People",
            CategoryKind::Products => "Products",
            CategoryKind::Investments => "Investments",
            CategoryKind::Acquisitions => "Acquisitions",
            CategoryKind::RecentNews => "Recent News",
            CategoryKind::Customers => "Customers",
            CategoryKind::Revenue => "Revenue",
            CategoryKind::Other(label) => label,
        }
    }

    /// Canonical sub-query for this category about `entity`
    pub fn structured_query(&self, entity: &str) -> String {
        match self {
            CategoryKind::Overview => format!("General information about {}", entity),
            CategoryKind::BusinessModel => format!("How does {} make money?", entity),
            CategoryKind::Location => format!("{} headquarters location", entity),
            CategoryKind::KeyPeople => format!("Who are the key executives of {}?", entity),
            CategoryKind::Products => format!("What products or services does {} offer?", entity),
            CategoryKind::Investments => format!("Recent investments by {}", entity),
            CategoryKind::Acquisitions => format!("Recent acquisitions by {}", entity),
            CategoryKind::RecentNews => format!("Latest news about {}", entity),
            CategoryKind::Customers => format!("Who are the customers of {}?", entity),
            CategoryKind::Revenue => format!("What is the revenue of {}?", entity),
            CategoryKind::Other(_) => format!("Information about {}", entity),
        }
    }
}

/// Output of the resolver when the entity was verified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedQuery {
    pub entity_name: String,
    pub category: CategoryKind,
    pub structured_query: String,
}

impl ResolvedQuery {
    pub fn new(entity_name: impl Into<String>, category: CategoryKind) -> Self {
        let entity_name = entity_name.into();
        let structured_query = category.structured_query(&entity_name);
        Self {
            entity_name,
            category,
            structured_query,
        }
    }
}

/// Unresolved entity with several plausible matches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbiguityResult {
    pub candidates: Vec<String>,
    pub message: String,
}

/// Raw text from one evidence source together with where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub text: String,
    pub locator: String,
}

impl Evidence {
    pub fn new(text: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            locator: locator.into(),
        }
    }
}

pub const SENTINEL_FAILURE_TEXT: &str = "source query failed";
pub const SENTINEL_LOCATOR: &str = "no source available";

/// What one source produced for one fan-out round
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Found(Evidence),
    /// The source answered but had nothing
    Empty,
    /// Every attempt raised or timed out
    Failed,
}

impl SourceOutcome {
    /// Usable evidence, if any. Sentinels never count.
    pub fn evidence(&self) -> Option<&Evidence> {
        match self {
            SourceOutcome::Found(ev) => Some(ev),
            SourceOutcome::Empty | SourceOutcome::Failed => None,
        }
    }

    /// Text/locator pair as reported in logs and diagnostics
    pub fn describe(&self) -> (&str, &str) {
        match self {
            SourceOutcome::Found(ev) => (&ev.text, &ev.locator),
            SourceOutcome::Empty => ("", SENTINEL_LOCATOR),
            SourceOutcome::Failed => (SENTINEL_FAILURE_TEXT, SENTINEL_LOCATOR),
        }
    }
}

/// Mutable record owned by a single aggregation run
#[derive(Debug, Clone)]
pub struct RetrievalState {
    pub entity_name: String,
    pub structured_query: String,
    pub category: CategoryKind,
    pub evidence_a: Option<SourceOutcome>,
    pub evidence_b: Option<SourceOutcome>,
    pub retries: u32,
    pub final_answer: Option<FinalAnswer>,
}

impl RetrievalState {
    pub fn new(query: &ResolvedQuery) -> Self {
        Self {
            entity_name: query.entity_name.clone(),
            structured_query: query.structured_query.clone(),
            category: query.category.clone(),
            evidence_a: None,
            evidence_b: None,
            retries: 0,
            final_answer: None,
        }
    }
}

pub const NO_DATA_ANSWER: &str = "no relevant data found";
pub const NO_CITATION: &str = "none";

/// Terminal artifact of an aggregation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub answer_text: String,
    pub confidence: f32,
    pub source_citation: String,
}

impl FinalAnswer {
    pub fn no_data() -> Self {
        Self {
            answer_text: NO_DATA_ANSWER.to_string(),
            confidence: 0.0,
            source_citation: NO_CITATION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedExtraction,
    EntityNotFound,
    ServiceFailure,
    InvalidSelection,
}

/// Error surfaced to the caller as a regular result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResult {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_lines: Vec<String>,
}

/// Everything the orchestrator can hand back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    Answer {
        entity_name: String,
        category: String,
        answer: FinalAnswer,
    },
    Ambiguous(AmbiguityResult),
    Error(ErrorResult),
}

impl QueryOutcome {
    pub fn answer(&self) -> Option<&FinalAnswer> {
        match self {
            QueryOutcome::Answer { answer, .. } => Some(answer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearResult {
    pub cleared: bool,
}
