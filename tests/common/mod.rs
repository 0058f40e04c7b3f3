//! Shared fakes and builders for the pipeline scenario tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use music_discovery_backend::config::DiscoverySettings;
use music_discovery_backend::error::{DiscoveryError, Result};
use music_discovery_backend::models::{ArtistProfile, LyricAnalysis};
use music_discovery_backend::ports::{
    Analyzer, Fetcher, PageSession, PlainResponse, RenderOptions, RenderedPage, SystemClock,
};
use music_discovery_backend::services::enrichment::{EnrichmentSource, SourceOutcome};
use music_discovery_backend::services::{
    DefaultSearchUrlComposer, EnrichmentCoordinator, Harvester, QuotaLimiter, RetryPolicy,
    SessionOrchestrator,
};
use music_discovery_backend::store::InMemoryStore;
use music_discovery_backend::Store;

/// Scripted page server behind the Fetcher port. Routes match by
/// substring so tests can register pages without composing exact URLs.
pub struct FakeFetcher {
    routes: Mutex<Vec<(String, String)>>,
    statuses: Mutex<Vec<(String, u16)>>,
    /// Artificial latency injected into every call.
    pub delay: Duration,
    pub plain_calls: AtomicU32,
    pub rendered_calls: AtomicU32,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            plain_calls: AtomicU32::new(0),
            rendered_calls: AtomicU32::new(0),
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    /// Serve `html` for any URL containing `fragment`.
    pub fn add_page(&self, fragment: impl Into<String>, html: impl Into<String>) {
        self.routes.lock().unwrap().push((fragment.into(), html.into()));
    }

    /// Serve an HTTP error status for any URL containing `fragment`.
    pub fn add_status(&self, fragment: impl Into<String>, status: u16) {
        self.statuses.lock().unwrap().push((fragment.into(), status));
    }

    fn lookup(&self, url: &str) -> Result<String> {
        if let Some((_, status)) = self
            .statuses
            .lock()
            .unwrap()
            .iter()
            .find(|(fragment, _)| url.contains(fragment))
        {
            return Err(DiscoveryError::from_status(*status, url));
        }
        self.routes
            .lock()
            .unwrap()
            .iter()
            .find(|(fragment, _)| url.contains(fragment))
            .map(|(_, html)| html.clone())
            .ok_or_else(|| DiscoveryError::NotFound {
                resource: url.to_string(),
            })
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch_plain(&self, url: &str, _deadline: Duration) -> Result<PlainResponse> {
        self.plain_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let body = self.lookup(url)?;
        Ok(PlainResponse {
            status: 200,
            headers: HashMap::new(),
            body,
        })
    }

    async fn fetch_rendered(
        &self,
        url: &str,
        _options: &RenderOptions,
        _deadline: Duration,
    ) -> Result<RenderedPage> {
        self.rendered_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let html = self.lookup(url)?;
        Ok(RenderedPage {
            final_url: url.to_string(),
            html,
            network_log: Vec::new(),
        })
    }

    async fn open_session(&self, _options: &RenderOptions) -> Result<Box<dyn PageSession>> {
        Ok(Box::new(FakePageSession {
            routes: self.routes.lock().unwrap().clone(),
            delay: self.delay,
            current: None,
        }))
    }
}

pub struct FakePageSession {
    routes: Vec<(String, String)>,
    delay: Duration,
    current: Option<String>,
}

#[async_trait]
impl PageSession for FakePageSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        let html = self
            .routes
            .iter()
            .find(|(fragment, _)| url.contains(fragment))
            .map(|(_, html)| html.clone())
            .ok_or_else(|| DiscoveryError::NotFound {
                resource: url.to_string(),
            })?;
        self.current = Some(html);
        Ok(())
    }

    async fn scroll_once(&mut self, _settle: Duration) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn html(&mut self) -> Result<String> {
        self.current
            .clone()
            .ok_or_else(|| DiscoveryError::transient("no page loaded"))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Scripted enrichment source: per-artist canned outcomes, with a
/// fallthrough default.
pub struct CannedSource {
    name: &'static str,
    by_artist: HashMap<String, std::result::Result<SourceOutcome, ScriptedFailure>>,
    default: Option<std::result::Result<SourceOutcome, ScriptedFailure>>,
    pub calls: AtomicU32,
}

#[derive(Clone)]
pub enum ScriptedFailure {
    Blocked,
    Transient,
    NotFound,
}

impl ScriptedFailure {
    fn to_error(&self, source: &str) -> DiscoveryError {
        match self {
            ScriptedFailure::Blocked => DiscoveryError::Blocked {
                url: format!("https://{source}.example.com"),
            },
            ScriptedFailure::Transient => DiscoveryError::transient("scripted outage"),
            ScriptedFailure::NotFound => DiscoveryError::NotFound {
                resource: format!("{source} profile"),
            },
        }
    }
}

impl CannedSource {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            by_artist: HashMap::new(),
            default: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn returns(mut self, artist: &str, outcome: SourceOutcome) -> Self {
        self.by_artist.insert(artist.to_string(), Ok(outcome));
        self
    }

    pub fn fails(mut self, artist: &str, failure: ScriptedFailure) -> Self {
        self.by_artist.insert(artist.to_string(), Err(failure));
        self
    }

    pub fn default_failure(mut self, failure: ScriptedFailure) -> Self {
        self.default = Some(Err(failure));
        self
    }

    pub fn default_outcome(mut self, outcome: SourceOutcome) -> Self {
        self.default = Some(Ok(outcome));
        self
    }
}

#[async_trait]
impl EnrichmentSource for CannedSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(20)
    }

    async fn enrich(
        &self,
        profile: &ArtistProfile,
        _cancel: &CancellationToken,
    ) -> Result<SourceOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .by_artist
            .get(&profile.name)
            .or(self.default.as_ref())
            .cloned()
            .unwrap_or(Err(ScriptedFailure::NotFound));
        match script {
            Ok(outcome) => Ok(outcome),
            Err(failure) => Err(failure.to_error(self.name)),
        }
    }
}

impl Clone for CannedSource {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            by_artist: self.by_artist.clone(),
            default: self.default.clone(),
            calls: AtomicU32::new(0),
        }
    }
}

/// Deterministic analyzer: themes derived from word frequency.
pub struct FakeAnalyzer;

#[async_trait]
impl Analyzer for FakeAnalyzer {
    async fn analyze_lyrics(
        &self,
        text: &str,
        language_hint: Option<&str>,
    ) -> Result<LyricAnalysis> {
        let mut words: Vec<&str> = text
            .split_whitespace()
            .filter(|word| word.len() > 4)
            .collect();
        words.sort_unstable();
        words.dedup();
        Ok(LyricAnalysis {
            themes: words.into_iter().take(3).map(str::to_string).collect(),
            sentiment: 0.0,
            language: language_hint.unwrap_or("en").to_string(),
        })
    }
}

/// One renderer entry on a fake search page.
pub struct PageEntry {
    pub video_id: &'static str,
    pub title: &'static str,
    pub channel_id: Option<&'static str>,
    pub snippet: Option<&'static str>,
}

impl PageEntry {
    pub fn new(video_id: &'static str, title: &'static str) -> Self {
        Self {
            video_id,
            title,
            channel_id: None,
            snippet: None,
        }
    }

    pub fn channel(mut self, channel_id: &'static str) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    pub fn snippet(mut self, snippet: &'static str) -> Self {
        self.snippet = Some(snippet);
        self
    }
}

/// Render a search-results page the harvester can parse.
pub fn search_page(entries: &[PageEntry]) -> String {
    let mut html = String::from("<html><body>");
    for entry in entries {
        html.push_str("<div class=\"video-renderer\">");
        html.push_str(&format!(
            "<a href=\"/watch?v={}\" title=\"{}\">{}</a>",
            entry.video_id, entry.title, entry.title
        ));
        if let Some(channel) = entry.channel_id {
            html.push_str(&format!("<a href=\"/channel/{channel}\">channel</a>"));
        }
        if let Some(snippet) = entry.snippet {
            html.push_str(&format!(
                "<div class=\"metadata-snippet-text\">{snippet}</div>"
            ));
        }
        html.push_str("</div>");
    }
    html.push_str("</body></html>");
    html
}

/// Settings tuned for fast, deterministic tests: one enrichment worker
/// so artists resolve in arrival order.
pub fn test_settings() -> DiscoverySettings {
    DiscoverySettings {
        enrichment_workers: 1,
        harvest_settle: Duration::from_millis(1),
        ..DiscoverySettings::default()
    }
}

pub struct TestPipeline {
    pub orchestrator: SessionOrchestrator,
    pub store: Arc<InMemoryStore>,
    pub quota: QuotaLimiter,
}

/// Wire an orchestrator over fakes.
pub fn pipeline(
    fetcher: Arc<FakeFetcher>,
    sources: Vec<Arc<dyn EnrichmentSource>>,
    settings: DiscoverySettings,
) -> TestPipeline {
    let store = Arc::new(InMemoryStore::new());
    pipeline_with_store(fetcher, sources, settings, store)
}

pub fn pipeline_with_store(
    fetcher: Arc<FakeFetcher>,
    sources: Vec<Arc<dyn EnrichmentSource>>,
    settings: DiscoverySettings,
    store: Arc<InMemoryStore>,
) -> TestPipeline {
    let clock = Arc::new(SystemClock);
    let quota = QuotaLimiter::new(10_000, clock.clone());

    let harvester = Arc::new(Harvester::new(
        fetcher,
        Arc::new(DefaultSearchUrlComposer::default()),
        settings.clone(),
    ));

    let retry = RetryPolicy::new(Arc::new(music_discovery_backend::ports::ThreadRandom))
        .with_base_delay(Duration::from_millis(2));
    let mut coordinator = EnrichmentCoordinator::new(retry);
    for source in sources {
        coordinator = coordinator.with_source(source);
    }

    let orchestrator = SessionOrchestrator::new(
        settings,
        harvester,
        Arc::new(coordinator),
        store.clone() as Arc<dyn Store>,
        quota.clone(),
        clock,
    );

    TestPipeline {
        orchestrator,
        store,
        quota,
    }
}
