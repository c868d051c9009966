//! entityscope HTTP server binary

use entityscope::{
    server, AppConfig, CacheStore, CachedRefiner, ClarificationRegistry, EntityDirectory,
    DisabledCacheStore, Evidence, EvidenceAggregator, EvidenceSource, HttpCacheStore,
    OfflineRefiner, OpenAiRefiner, Orchestrator, QueryResolver, StaticDirectory, StaticSource,
    TavilySource, TextRefiner, WikipediaSource,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let config = AppConfig::from_env();
    info!("entityscope {}", env!("CARGO_PKG_VERSION"));

    let use_mock = std::env::args().any(|arg| arg == "--mock");

    let cache: Arc<dyn CacheStore> = match &config.cache_service_url {
        Some(url) => Arc::new(HttpCacheStore::connect(url.clone(), config.request_timeout).await?),
        None => {
            warn!("CACHE_SERVICE_URL not set; answers will not be cached");
            Arc::new(DisabledCacheStore)
        }
    };

    let (knowledge, web, directory, refiner): (
        Arc<dyn EvidenceSource>,
        Arc<dyn EvidenceSource>,
        Arc<dyn EntityDirectory>,
        Arc<dyn TextRefiner>,
    ) = if use_mock {
        info!("Mode: MOCK sources (no network)");
        mock_collaborators()
    } else {
        info!("Mode: REAL sources");
        info!("Wikipedia API: {}", config.wikipedia_api_url);
        info!("Tavily API: {}", config.tavily_api_url);

        // Wikipedia serves both as evidence source and entity directory
        let wiki = Arc::new(WikipediaSource::new(
            config.wikipedia_api_url.clone(),
            config.request_timeout,
        )?);
        let tavily: Arc<dyn EvidenceSource> = Arc::new(TavilySource::new(
            config.tavily_api_url.clone(),
            config.require_tavily_key()?,
            config.request_timeout,
        )?);
        let openai: Arc<dyn TextRefiner> = Arc::new(OpenAiRefiner::new(
            config.openai_api_url.clone(),
            config.require_openai_key()?,
            config.openai_model.clone(),
            config.request_timeout,
        )?);

        let knowledge: Arc<dyn EvidenceSource> = wiki.clone();
        let directory: Arc<dyn EntityDirectory> = wiki;
        (knowledge, tavily, directory, openai)
    };

    let refiner: Arc<dyn TextRefiner> = Arc::new(CachedRefiner::new(refiner, cache.clone()));
    let registry = Arc::new(ClarificationRegistry::new(cache.clone()));

    let resolver = QueryResolver::new(refiner.clone(), directory, registry.clone());
    let aggregator = EvidenceAggregator::new(knowledge, web, refiner, config.aggregator_settings());
    let orchestrator = Orchestrator::new(resolver, aggregator, cache, registry);

    server::run_server(orchestrator, config.port).await?;

    Ok(())
}

/// Canned companies for demos without API keys
fn mock_collaborators() -> (
    Arc<dyn EvidenceSource>,
    Arc<dyn EvidenceSource>,
    Arc<dyn EntityDirectory>,
    Arc<dyn TextRefiner>,
) {
    let knowledge = StaticSource::new("Wikipedia")
        .with_entry(
            "acme",
            Evidence::new(
                "Acme Corporation is a fictional conglomerate that manufactures anvils, rocket skates and other outlandish products, headquartered in the American Southwest.",
                "https://en.wikipedia.org/wiki/Acme_Corporation",
            ),
        )
        .with_entry(
            "globex",
            Evidence::new(
                "Globex Corporation is a fictional multinational led by Hank Scorpio, headquartered in Cypress Creek.",
                "https://en.wikipedia.org/wiki/Globex",
            ),
        );

    let web = StaticSource::new("Tavily").with_entry(
        "acme",
        Evidence::new(
            "Company profile\nAcme Corporation reported record anvil sales this quarter.\nMore stories",
            "https://news.example.com/acme",
        ),
    );

    let directory = StaticDirectory::new(vec![
        "Acme Corporation".to_string(),
        "Globex Corporation".to_string(),
        "Initech".to_string(),
    ]);

    let refiner = OfflineRefiner::new(vec![
        "Acme Corporation".to_string(),
        "Acme".to_string(),
        "Globex".to_string(),
        "Initech".to_string(),
    ]);

    let knowledge: Arc<dyn EvidenceSource> = Arc::new(knowledge);
    let web: Arc<dyn EvidenceSource> = Arc::new(web);
    let directory: Arc<dyn EntityDirectory> = Arc::new(directory);
    let refiner: Arc<dyn TextRefiner> = Arc::new(refiner);
    (knowledge, web, directory, refiner)
}
