//! End-to-end tests for the Orchestrator

use crate::*;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::assert_ok;

const ACME_WIKI: &str = "Acme Inc is an American manufacturer of anvils, rockets and assorted gadgets, founded in 1949 in Arizona by a coyote.";
const ACME_WEB_UNRELATED: &str = "Acme Inc reported revenue of $2B in fiscal 2023, up from $1.7B, driven by strong demand for rocket-powered skates.";

/// Scripted behaviour of one source call
#[derive(Clone)]
enum Step {
    Hit(Evidence),
    Empty,
    Fail,
    Hang,
}

fn hit(text: &str, locator: &str) -> Step {
    Step::Hit(Evidence::new(text, locator))
}

struct StubSource {
    name: &'static str,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl StubSource {
    fn new(name: &'static str, fallback: Step) -> Arc<Self> {
        Self::scripted(name, vec![], fallback)
    }

    fn scripted(name: &'static str, script: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            name,
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(vec![]),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl EvidenceSource for StubSource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self, query: &str) -> Result<Option<Evidence>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Hit(ev) => Ok(Some(ev)),
            Step::Empty => Ok(None),
            Step::Fail => anyhow::bail!("{} unavailable", self.name),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(None)
            }
        }
    }
}

struct StubRefiner {
    /// (needle, response): first needle contained in the query wins
    extractions: Vec<(String, String)>,
    judgment: String,
    refine_fails: bool,
    refine_calls: AtomicUsize,
}

impl StubRefiner {
    fn new(extractions: &[(&str, &str)]) -> Self {
        Self {
            extractions: extractions
                .iter()
                .map(|(n, r)| (n.to_lowercase(), r.to_string()))
                .collect(),
            judgment: "Unknown: ?".to_string(),
            refine_fails: false,
            refine_calls: AtomicUsize::new(0),
        }
    }

    fn refine_calls(&self) -> usize {
        self.refine_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextRefiner for StubRefiner {
    async fn extract_company_and_category(&self, query: &str) -> Result<String> {
        let lowered = query.to_lowercase();
        Ok(self
            .extractions
            .iter()
            .find(|(needle, _)| lowered.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_default())
    }

    async fn refine(&self, _text: &str, category: &str, _question: &str) -> Result<String> {
        self.refine_calls.fetch_add(1, Ordering::SeqCst);
        if self.refine_fails {
            anyhow::bail!("refiner unavailable");
        }
        Ok(format!("Refined {} answer", category))
    }

    async fn judge_entity(&self, _name: &str) -> Result<String> {
        Ok(self.judgment.clone())
    }
}

struct StubDirectory {
    results: HashMap<String, Vec<String>>,
}

impl StubDirectory {
    fn new(entries: Vec<(&str, Vec<&str>)>) -> Self {
        Self {
            results: entries
                .into_iter()
                .map(|(name, titles)| {
                    (
                        name.to_lowercase(),
                        titles.iter().map(|t| t.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }
}

#[async_trait]
impl EntityDirectory for StubDirectory {
    async fn search(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.results.get(&name.to_lowercase()).cloned().unwrap_or_default())
    }
}

/// Memory-backed cache that can be switched off or made to fail on writes
#[derive(Default)]
struct StubCache {
    inner: MemoryCacheStore,
    unavailable: bool,
    fail_writes: bool,
    /// (key, ttl seconds) of every accepted write
    writes: Mutex<Vec<(String, u64)>>,
}

impl StubCache {
    fn ttl_of(&self, key: &str) -> Option<u64> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, ttl)| *ttl)
    }
}

#[async_trait]
impl CacheStore for StubCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        if self.fail_writes {
            anyhow::bail!("transient write error");
        }
        self.writes
            .lock()
            .unwrap()
            .push((key.to_string(), ttl.as_secs()));
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.keys_with_prefix(prefix).await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }

    fn is_available(&self) -> bool {
        !self.unavailable
    }
}

struct Fixture {
    knowledge: Arc<StubSource>,
    web: Arc<StubSource>,
    refiner: Arc<StubRefiner>,
    directory: Arc<StubDirectory>,
    cache: Arc<StubCache>,
    settings: AggregatorSettings,
}

impl Fixture {
    /// Acme Inc resolves cleanly; "acme" alone is ambiguous between Inc and Ltd
    fn new() -> Self {
        Self {
            knowledge: StubSource::new("Wikipedia", hit(ACME_WIKI, "https://wiki.example/Acme_Inc")),
            web: StubSource::new("Tavily", hit(ACME_WEB_UNRELATED, "https://news.example/acme")),
            refiner: Arc::new(StubRefiner::new(&[
                ("referring to acme ltd", "Company Name: Acme Ltd\nCategory: Revenue"),
                ("acme inc", "Company Name: Acme Inc\nCategory: Revenue"),
                ("acme", "Company Name: Acme Co\nCategory: Revenue"),
                ("globex", "Company Name: Globex\nCategory: Location"),
                ("gibberish", "I could not parse that"),
            ])),
            directory: Arc::new(StubDirectory::new(vec![
                ("Acme Inc", vec!["Acme Inc", "Acme Ltd"]),
                ("Acme Ltd", vec!["Acme Ltd"]),
                ("Acme Co", vec!["Acme Inc", "Acme Ltd"]),
            ])),
            cache: Arc::new(StubCache::default()),
            settings: AggregatorSettings {
                source_backoff: Duration::ZERO,
                attempt_timeout: Duration::from_secs(2),
                ..Default::default()
            },
        }
    }

    fn orchestrator(&self) -> SharedOrchestrator {
        let cache: Arc<dyn CacheStore> = self.cache.clone();
        let registry = Arc::new(ClarificationRegistry::new(cache.clone()));
        let resolver = QueryResolver::new(self.refiner.clone(), self.directory.clone(), registry.clone());
        let aggregator = EvidenceAggregator::new(
            self.knowledge.clone(),
            self.web.clone(),
            self.refiner.clone(),
            self.settings.clone(),
        );
        Orchestrator::new(resolver, aggregator, cache, registry)
    }
}

/// Default fixture wired into an orchestrator
pub(crate) fn mock_orchestrator() -> SharedOrchestrator {
    Fixture::new().orchestrator()
}

fn expect_answer(outcome: &QueryOutcome) -> &FinalAnswer {
    outcome
        .answer()
        .unwrap_or_else(|| panic!("expected an answer, got {:?}", outcome))
}

fn expect_error(outcome: &QueryOutcome) -> ErrorKind {
    match outcome {
        QueryOutcome::Error(err) => err.kind,
        other => panic!("expected an error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_repeated_query_served_from_cache() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();

    let first = orchestrator.resolve_and_answer("What is Acme Inc revenue?").await;
    let second = orchestrator.resolve_and_answer("What is Acme Inc revenue?").await;

    assert_eq!(
        assert_ok!(serde_json::to_vec(expect_answer(&first))),
        assert_ok!(serde_json::to_vec(expect_answer(&second)))
    );
    assert_eq!(fx.knowledge.calls(), 1);
    assert_eq!(fx.web.calls(), 1);
    assert_eq!(fx.refiner.refine_calls(), 1);

    let stored = fx.cache.get("company_info:acme inc:revenue").await.unwrap();
    assert!(stored.is_some());
    assert_eq!(fx.cache.ttl_of("company_info:acme inc:revenue"), Some(3600));
}

#[tokio::test]
async fn test_answer_envelope_and_citation() {
    let fx = Fixture::new();
    let outcome = fx.orchestrator().resolve_and_answer("acme inc revenue").await;

    match outcome {
        QueryOutcome::Answer {
            entity_name,
            category,
            answer,
        } => {
            assert_eq!(entity_name, "Acme Inc");
            assert_eq!(category, "Revenue");
            assert_eq!(answer.answer_text, "Refined Revenue answer");
            assert_eq!(answer.confidence, 0.8);
            assert_eq!(
                answer.source_citation,
                "Wikipedia: https://wiki.example/Acme_Inc\nTavily: https://news.example/acme"
            );
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert_eq!(fx.knowledge.queries(), vec!["What is the revenue of Acme Inc?".to_string()]);
}

#[tokio::test]
async fn test_confidence_is_monotonic_in_evidence() {
    let corroborating = format!("Headlines\n{} Revenue grew in 2023.\nFooter", ACME_WIKI);

    let mut fx = Fixture::new();
    fx.web = StubSource::new("Tavily", hit(&corroborating, "https://news.example/acme"));
    let both_agree = fx.orchestrator().resolve_and_answer("acme inc revenue").await;

    let fx = Fixture::new();
    let both = fx.orchestrator().resolve_and_answer("acme inc revenue").await;

    let mut fx = Fixture::new();
    fx.knowledge = StubSource::new("Wikipedia", Step::Fail);
    let single = fx.orchestrator().resolve_and_answer("acme inc revenue").await;

    let mut fx = Fixture::new();
    fx.knowledge = StubSource::new("Wikipedia", Step::Empty);
    fx.web = StubSource::new("Tavily", Step::Fail);
    let none = fx.orchestrator().resolve_and_answer("acme inc revenue").await;

    assert_eq!(expect_answer(&both_agree).confidence, 0.9);
    assert_eq!(expect_answer(&both).confidence, 0.8);
    assert_eq!(expect_answer(&single).confidence, 0.7);
    assert_eq!(expect_answer(&none).confidence, 0.0);
    assert_eq!(expect_answer(&single).source_citation, "https://news.example/acme");
}

#[tokio::test]
async fn test_exhausted_retries_yield_no_data() {
    let mut fx = Fixture::new();
    fx.knowledge = StubSource::new("Wikipedia", Step::Empty);
    fx.web = StubSource::new("Tavily", Step::Empty);

    let outcome = fx.orchestrator().resolve_and_answer("acme inc revenue").await;
    let answer = expect_answer(&outcome);

    assert_eq!(answer, &FinalAnswer::no_data());
    assert_eq!(answer.answer_text, "no relevant data found");
    assert_eq!(fx.refiner.refine_calls(), 0);

    // One initial fan-out plus two refinements
    assert_eq!(
        fx.knowledge.queries(),
        vec![
            "What is the revenue of Acme Inc?".to_string(),
            "What is the revenue of Acme Inc? detailed explanation".to_string(),
            "What is the revenue of Acme Inc? detailed explanation detailed explanation".to_string(),
        ]
    );
    assert_eq!(fx.web.calls(), 3);
}

#[tokio::test]
async fn test_refinement_retry_recovers() {
    let mut fx = Fixture::new();
    fx.knowledge = StubSource::scripted("Wikipedia", vec![Step::Empty], hit(ACME_WIKI, "https://wiki.example/Acme_Inc"));
    fx.web = StubSource::new("Tavily", Step::Empty);

    let outcome = fx.orchestrator().resolve_and_answer("acme inc revenue").await;

    assert_eq!(expect_answer(&outcome).confidence, 0.7);
    assert_eq!(fx.knowledge.calls(), 2);
}

#[tokio::test]
async fn test_source_failure_retried_locally() {
    let mut fx = Fixture::new();
    fx.knowledge = StubSource::scripted(
        "Wikipedia",
        vec![Step::Fail, Step::Fail],
        hit(ACME_WIKI, "https://wiki.example/Acme_Inc"),
    );

    let outcome = fx.orchestrator().resolve_and_answer("acme inc revenue").await;

    assert_eq!(expect_answer(&outcome).confidence, 0.8);
    assert_eq!(fx.knowledge.calls(), 3);
    assert_eq!(fx.web.calls(), 1);
}

#[tokio::test]
async fn test_failed_source_does_not_block_other() {
    let mut fx = Fixture::new();
    fx.knowledge = StubSource::new("Wikipedia", Step::Fail);

    let outcome = fx.orchestrator().resolve_and_answer("acme inc revenue").await;

    // 1 attempt + 2 local retries, no refinement round since web had evidence
    assert_eq!(fx.knowledge.calls(), 3);
    assert_eq!(fx.web.calls(), 1);
    assert_eq!(expect_answer(&outcome).source_citation, "https://news.example/acme");
}

#[tokio::test]
async fn test_hanging_source_times_out() {
    let mut fx = Fixture::new();
    fx.knowledge = StubSource::new("Wikipedia", Step::Hang);
    fx.settings.attempt_timeout = Duration::from_millis(20);

    let outcome = fx.orchestrator().resolve_and_answer("acme inc revenue").await;

    assert_eq!(expect_answer(&outcome).confidence, 0.7);
    assert_eq!(fx.knowledge.calls(), 3);
}

#[tokio::test]
async fn test_web_evidence_filtered_to_entity_paragraph() {
    let mut fx = Fixture::new();
    fx.knowledge = StubSource::new("Wikipedia", Step::Empty);
    fx.web = StubSource::new(
        "Tavily",
        hit("Intro\nAcme Inc was founded in 1949.\nOther", "https://news.example/acme"),
    );

    let outcome = fx.orchestrator().resolve_and_answer("acme inc revenue").await;
    let answer = expect_answer(&outcome);

    assert_eq!(answer.answer_text, "Acme Inc was founded in 1949.");
    // Short text skips refinement
    assert_eq!(fx.refiner.refine_calls(), 0);
}

#[tokio::test]
async fn test_refiner_failure_returns_merged_text() {
    let mut fx = Fixture::new();
    fx.refiner = Arc::new(StubRefiner {
        refine_fails: true,
        ..StubRefiner::new(&[("acme inc", "Company Name: Acme Inc\nCategory: Revenue")])
    });

    let outcome = fx.orchestrator().resolve_and_answer("acme inc revenue").await;

    assert_eq!(
        expect_answer(&outcome).answer_text,
        format!("{}\n\n{}", ACME_WIKI, ACME_WEB_UNRELATED)
    );
    assert_eq!(fx.refiner.refine_calls(), 1);
}

#[tokio::test]
async fn test_clarification_round_trip() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();

    let outcome = orchestrator.resolve_and_answer("acme").await;
    match &outcome {
        QueryOutcome::Ambiguous(amb) => {
            assert_eq!(amb.candidates, vec!["Acme Inc".to_string(), "Acme Ltd".to_string()]);
        }
        other => panic!("expected ambiguity, got {:?}", other),
    }
    assert_eq!(fx.knowledge.calls(), 0);
    assert!(fx.cache.get("ambiguity:acme").await.unwrap().is_some());
    assert_eq!(fx.cache.ttl_of("ambiguity:acme"), Some(600));
    assert!(fx.cache.get("company_info:acme co:revenue").await.unwrap().is_none());

    let clarified = orchestrator.clarify("Acme Ltd").await;
    assert_eq!(expect_answer(&clarified).confidence, 0.8);
    assert_eq!(
        fx.knowledge.queries(),
        vec!["What is the revenue of Acme Ltd?".to_string()]
    );
    assert!(fx.cache.get("ambiguity:acme").await.unwrap().is_none());

    // The pending entry was consumed
    let again = orchestrator.clarify("Acme Ltd").await;
    assert_eq!(expect_error(&again), ErrorKind::InvalidSelection);
}

#[tokio::test]
async fn test_clarify_unregistered_selection_is_client_error() {
    let orchestrator = mock_orchestrator();
    let outcome = orchestrator.clarify("Nobody Ltd").await;
    assert_eq!(expect_error(&outcome), ErrorKind::InvalidSelection);
}

#[tokio::test]
async fn test_clarify_uses_registered_candidates() {
    let fx = Fixture::new();
    let cache: Arc<dyn CacheStore> = fx.cache.clone();
    let registry = ClarificationRegistry::new(cache);
    registry
        .register(
            "acme",
            &AmbiguityResult {
                candidates: vec!["Acme Inc".into(), "Acme Ltd".into()],
                message: "Please clarify.".into(),
            },
        )
        .await;

    // A second registry over the same store sees the durable entry
    let outcome = fx.orchestrator().clarify("Acme Ltd").await;
    assert!(outcome.answer().is_some());
    assert!(fx.cache.keys_with_prefix("ambiguity:").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unavailable_cache_degrades_to_misses() {
    let mut fx = Fixture::new();
    fx.cache = Arc::new(StubCache {
        unavailable: true,
        ..Default::default()
    });
    let orchestrator = fx.orchestrator();

    let first = orchestrator.resolve_and_answer("acme inc revenue").await;
    let second = orchestrator.resolve_and_answer("acme inc revenue").await;

    assert_eq!(expect_answer(&first), expect_answer(&second));
    assert_eq!(fx.knowledge.calls(), 2);
    assert!(fx.cache.inner.keys_with_prefix("").await.unwrap().is_empty());

    // Pending clarifications fall back to the in-process registry
    assert!(matches!(
        orchestrator.resolve_and_answer("acme").await,
        QueryOutcome::Ambiguous(_)
    ));
    assert!(orchestrator.clarify("Acme Inc").await.answer().is_some());

    assert_eq!(orchestrator.clear_all_cache().await, ClearResult { cleared: false });
}

#[tokio::test]
async fn test_cache_write_failure_is_swallowed() {
    let mut fx = Fixture::new();
    fx.cache = Arc::new(StubCache {
        fail_writes: true,
        ..Default::default()
    });
    let orchestrator = fx.orchestrator();

    let outcome = orchestrator.resolve_and_answer("acme inc revenue").await;
    assert_eq!(expect_answer(&outcome).confidence, 0.8);

    // Ambiguity still clarifiable through the in-process fallback
    assert!(matches!(
        orchestrator.resolve_and_answer("acme").await,
        QueryOutcome::Ambiguous(_)
    ));
    assert!(orchestrator.clarify("Acme Ltd").await.answer().is_some());
}

#[tokio::test]
async fn test_unknown_entity_and_bad_extraction() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();

    let not_found = orchestrator.resolve_and_answer("Where is Globex?").await;
    assert_eq!(expect_error(&not_found), ErrorKind::EntityNotFound);

    let malformed = orchestrator.resolve_and_answer("gibberish").await;
    match malformed {
        QueryOutcome::Error(err) => {
            assert_eq!(err.kind, ErrorKind::MalformedExtraction);
            assert_eq!(err.raw_lines, vec!["I could not parse that".to_string()]);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert_eq!(fx.knowledge.calls(), 0);
}

#[tokio::test]
async fn test_judgment_escalation() {
    let mut fx = Fixture::new();
    fx.directory = Arc::new(StubDirectory::new(vec![("Globex", vec!["Initech"])]));
    fx.refiner = Arc::new(StubRefiner {
        judgment: "Ambiguous: Globex Corp, Globex Ltd".to_string(),
        ..StubRefiner::new(&[("globex", "Company Name: Globex\nCategory: Location")])
    });

    let outcome = fx.orchestrator().resolve_and_answer("Where is Globex?").await;
    match outcome {
        QueryOutcome::Ambiguous(amb) => {
            assert_eq!(amb.candidates, vec!["Globex Corp".to_string(), "Globex Ltd".to_string()]);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_unrecognized_category_uses_generic_query() {
    let mut fx = Fixture::new();
    fx.refiner = Arc::new(StubRefiner::new(&[(
        "acme inc",
        "Company Name: Acme Inc\nCategory: revenue",
    )]));

    let outcome = fx.orchestrator().resolve_and_answer("acme inc").await;

    assert!(outcome.answer().is_some());
    assert_eq!(fx.knowledge.queries(), vec!["Information about Acme Inc".to_string()]);
}

#[tokio::test]
async fn test_clear_all_cache() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();

    orchestrator.resolve_and_answer("acme inc revenue").await;
    assert_eq!(orchestrator.clear_all_cache().await, ClearResult { cleared: true });

    orchestrator.resolve_and_answer("acme inc revenue").await;
    assert_eq!(fx.knowledge.calls(), 2);
}

#[tokio::test]
async fn test_refined_responses_cached_as_plain_text() {
    let fx = Fixture::new();
    let cache: Arc<dyn CacheStore> = fx.cache.clone();
    let refiner = CachedRefiner::new(fx.refiner.clone(), cache);

    let first = assert_ok!(refiner.refine(ACME_WIKI, "Revenue", "What is the revenue of Acme Inc?").await);
    let second = assert_ok!(refiner.refine(ACME_WIKI, "Revenue", "What is the revenue of Acme Inc?").await);

    assert_eq!(first, second);
    assert_eq!(fx.refiner.refine_calls(), 1);

    let key = "refined_response:Revenue:what is the revenue of acme inc?";
    assert_eq!(fx.cache.get(key).await.unwrap(), Some(first));
    assert_eq!(fx.cache.ttl_of(key), Some(3600));
}
