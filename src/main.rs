//! `discover`: CLI wrapper around the discovery pipeline.
//!
//! Runs one session and emits its progress events as newline-delimited
//! JSON on stdout. Exit codes: 0 on success, 1 on validation error, 2 on
//! fatal pipeline error.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use music_discovery_backend::config::AppConfig;
use music_discovery_backend::error::DiscoveryError;
use music_discovery_backend::models::{ProgressEvent, SearchFilters, SessionRequest};
use music_discovery_backend::ports::{HttpFetcher, SystemClock, ThreadRandom};
use music_discovery_backend::services::enrichment::spotify::SpotifyApiClient;
use music_discovery_backend::services::{
    DefaultSearchUrlComposer, EnrichmentCoordinator, Harvester, InstagramEnricher, QuotaLimiter,
    ResponseCache, RetryPolicy, SessionOrchestrator, SpotifyEnricher, StrategyFetcher,
    TiktokEnricher, YoutubeChannelEnricher,
};
use music_discovery_backend::store::{InMemoryStore, PostgresStore};
use music_discovery_backend::Store;

#[derive(Parser, Debug)]
#[command(
    name = "discover",
    version,
    about = "Discover emerging music artists from recent music videos"
)]
struct Cli {
    /// Search query to harvest candidates from.
    #[arg(long)]
    query: String,

    /// Number of artists to discover before stopping.
    #[arg(long, default_value_t = 50)]
    target: u32,

    /// Search filter as KEY=VALUE (upload_date, duration, sort,
    /// quality_hint); repeatable.
    #[arg(long = "filter", value_name = "KEY=VALUE")]
    filters: Vec<String>,

    /// Session cost ceiling in budget units.
    #[arg(long)]
    max_cost: Option<u64>,

    /// Keep results in memory instead of the configured store.
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn to_request(&self) -> Result<SessionRequest, DiscoveryError> {
        let mut filters = SearchFilters::default();
        for raw in &self.filters {
            let (key, value) = raw.split_once('=').ok_or_else(|| {
                DiscoveryError::InvalidRequest(format!("filter {raw:?} is not KEY=VALUE"))
            })?;
            filters.apply(key, value)?;
        }
        let mut request = SessionRequest::new(self.query.clone())
            .with_target(self.target)
            .with_filters(filters);
        if let Some(units) = self.max_cost {
            request = request.with_max_cost(units);
        }
        Ok(request)
    }
}

fn emit(event: &ProgressEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!(error = %e, "event serialization failed"),
    }
}

async fn run(cli: Cli) -> Result<ExitCode, DiscoveryError> {
    let config = AppConfig::from_env()
        .map_err(|e| DiscoveryError::InvalidRequest(e.to_string()))?;
    let request = cli.to_request()?;

    let clock = Arc::new(SystemClock);
    let rng = Arc::new(ThreadRandom);
    let cache = Arc::new(ResponseCache::new());
    let quota = QuotaLimiter::new(config.quota.daily_cost_budget, clock.clone());
    let fetcher = Arc::new(HttpFetcher::new()?);
    let strategy_fetcher = Arc::new(StrategyFetcher::new(
        fetcher.clone(),
        cache.clone(),
        rng.clone(),
        &config.fetch,
    ));

    let harvester = Arc::new(Harvester::new(
        fetcher,
        Arc::new(DefaultSearchUrlComposer::default()),
        config.discovery.clone(),
    ));

    let mut coordinator = EnrichmentCoordinator::new(RetryPolicy::new(rng))
        .with_source(Arc::new(InstagramEnricher::new(
            strategy_fetcher.clone(),
            cache.clone(),
            quota.clone(),
        )))
        .with_source(Arc::new(TiktokEnricher::new(
            strategy_fetcher.clone(),
            cache.clone(),
            quota.clone(),
        )))
        .with_source(Arc::new(YoutubeChannelEnricher::new(
            strategy_fetcher.clone(),
            cache.clone(),
            quota.clone(),
        )));
    if let Some(spotify) = &config.spotify {
        coordinator = coordinator.with_source(Arc::new(SpotifyEnricher::new(
            SpotifyApiClient::new(spotify.clone()),
            strategy_fetcher.clone(),
            cache.clone(),
            quota.clone(),
        )));
    }
    // The lyrics worker needs an analyzer implementation; without a
    // configured analyzer endpoint the source stays disabled.

    let store: Arc<dyn Store> = match (&config.store_url, cli.dry_run) {
        (Some(url), false) => Arc::new(PostgresStore::connect(url).await?),
        _ => Arc::new(InMemoryStore::new()),
    };

    let orchestrator = SessionOrchestrator::new(
        config.discovery.clone(),
        harvester,
        Arc::new(coordinator),
        store,
        quota,
        clock,
    );

    let (session_id, mut events) = orchestrator.start_subscribed(request)?;
    tracing::info!(session_id = %session_id, "session launched");

    let mut exit = ExitCode::SUCCESS;
    while let Some(event) = events.next().await {
        emit(&event);
        if let ProgressEvent::SessionFailed { .. } = &event {
            exit = ExitCode::from(2);
        }
    }
    Ok(exit)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(exit) => exit,
        Err(e) => {
            tracing::error!(error = %e, "discovery failed");
            match e {
                DiscoveryError::InvalidRequest(_) | DiscoveryError::Busy { .. } => {
                    ExitCode::from(1)
                }
                _ => ExitCode::from(2),
            }
        }
    }
}
