//! Cascading fetch strategies.
//!
//! A fetch tries strategies in a fixed order, fastest first, each under
//! its own timeout, until one produces a document. Headless strategies
//! share a small process-wide concurrency window to bound browser memory;
//! plain HTTP shares a larger one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::FetchSettings;
use crate::error::{DiscoveryError, ErrorKind, Result};
use crate::ports::{Fetcher, RandomSource, RenderOptions};
use crate::services::response_cache::ResponseCache;

/// User agents rotated by the stealth strategy.
const STEALTH_USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

const STEALTH_VIEWPORTS: [(u32, u32); 3] = [(1280, 720), (1440, 900), (1920, 1080)];

/// One fallback mode. The cascade order is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    PlainHttp,
    HeadlessDefault,
    HeadlessScroll,
    HeadlessStealth,
}

impl FetchStrategy {
    pub const CASCADE: [FetchStrategy; 4] = [
        FetchStrategy::PlainHttp,
        FetchStrategy::HeadlessDefault,
        FetchStrategy::HeadlessScroll,
        FetchStrategy::HeadlessStealth,
    ];

    pub fn timeout(&self) -> Duration {
        match self {
            FetchStrategy::PlainHttp => Duration::from_secs(5),
            FetchStrategy::HeadlessDefault => Duration::from_secs(10),
            FetchStrategy::HeadlessScroll => Duration::from_secs(15),
            FetchStrategy::HeadlessStealth => Duration::from_secs(20),
        }
    }

    pub fn is_headless(&self) -> bool {
        !matches!(self, FetchStrategy::PlainHttp)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FetchStrategy::PlainHttp => "plain_http",
            FetchStrategy::HeadlessDefault => "headless_default",
            FetchStrategy::HeadlessScroll => "headless_scroll",
            FetchStrategy::HeadlessStealth => "headless_stealth",
        }
    }
}

/// Caller hints for a fetch.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchHints {
    /// Skip the script-less strategy for sites that never serve useful
    /// HTML without JavaScript.
    pub needs_javascript: bool,
}

/// A successfully fetched document.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub final_url: String,
    pub html: String,
    pub metadata: HashMap<String, String>,
}

/// Cascading fetcher over the [`Fetcher`] port.
pub struct StrategyFetcher {
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<ResponseCache>,
    rng: Arc<dyn RandomSource>,
    headless_permits: Arc<Semaphore>,
    plain_permits: Arc<Semaphore>,
    cooldown: Duration,
    /// Transient attempts re-run before escalating, shared across the
    /// whole cascade of one call.
    max_transient_retries: u32,
}

impl StrategyFetcher {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<ResponseCache>,
        rng: Arc<dyn RandomSource>,
        settings: &FetchSettings,
    ) -> Self {
        Self {
            fetcher,
            cache,
            rng,
            headless_permits: Arc::new(Semaphore::new(settings.headless_concurrency)),
            plain_permits: Arc::new(Semaphore::new(settings.plain_concurrency)),
            cooldown: settings.strategy_cooldown,
            max_transient_retries: 2,
        }
    }

    /// Fetch and render a URL, cascading through the strategies.
    pub async fn fetch(
        &self,
        url: &str,
        hints: FetchHints,
        cancel: &CancellationToken,
    ) -> Result<FetchedDocument> {
        if let Some(html) = self.cache.get("fetch.page", url).await {
            let mut metadata = HashMap::new();
            metadata.insert("strategy".to_string(), "cache".to_string());
            return Ok(FetchedDocument {
                final_url: url.to_string(),
                html,
                metadata,
            });
        }

        let mut failures: Vec<(FetchStrategy, DiscoveryError)> = Vec::new();
        let mut retries_left = self.max_transient_retries;
        let mut first = true;

        for strategy in FetchStrategy::CASCADE {
            if hints.needs_javascript && !strategy.is_headless() {
                continue;
            }
            if !first {
                tokio::time::sleep(self.cooldown).await;
            }
            first = false;

            loop {
                if cancel.is_cancelled() {
                    return Err(DiscoveryError::Cancelled);
                }
                match self.attempt(url, strategy, cancel).await {
                    Ok(document) => {
                        self.cache
                            .insert("fetch.page", url, document.html.clone())
                            .await;
                        return Ok(document);
                    }
                    Err(DiscoveryError::Cancelled) => return Err(DiscoveryError::Cancelled),
                    Err(err) => {
                        tracing::debug!(
                            url,
                            strategy = strategy.name(),
                            kind = %err.kind(),
                            error = %err,
                            "fetch strategy failed"
                        );
                        let retry_here = err.kind() == ErrorKind::Transient && retries_left > 0;
                        failures.push((strategy, err));
                        if retry_here {
                            retries_left -= 1;
                            tokio::time::sleep(self.cooldown).await;
                            continue;
                        }
                        break;
                    }
                }
            }
        }

        Err(Self::summarize(url, &failures))
    }

    async fn attempt(
        &self,
        url: &str,
        strategy: FetchStrategy,
        cancel: &CancellationToken,
    ) -> Result<FetchedDocument> {
        let permits = if strategy.is_headless() {
            &self.headless_permits
        } else {
            &self.plain_permits
        };
        let _permit = permits
            .acquire()
            .await
            .map_err(|_| DiscoveryError::fatal("fetch permit pool closed"))?;

        let deadline = strategy.timeout();
        let work = self.execute(url, strategy, deadline);
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
            outcome = tokio::time::timeout(deadline, work) => outcome,
        };

        match result {
            Ok(inner) => inner,
            Err(_) => Err(DiscoveryError::transient(format!(
                "{} timed out after {:?}",
                strategy.name(),
                deadline
            ))),
        }
    }

    async fn execute(
        &self,
        url: &str,
        strategy: FetchStrategy,
        deadline: Duration,
    ) -> Result<FetchedDocument> {
        let mut metadata = HashMap::new();
        metadata.insert("strategy".to_string(), strategy.name().to_string());

        match strategy {
            FetchStrategy::PlainHttp => {
                let response = self.fetcher.fetch_plain(url, deadline).await?;
                metadata.insert("status".to_string(), response.status.to_string());
                if response.status >= 400 {
                    return Err(DiscoveryError::from_status(response.status, url));
                }
                Ok(FetchedDocument {
                    final_url: url.to_string(),
                    html: response.body,
                    metadata,
                })
            }
            _ => {
                let options = self.render_options(strategy);
                let page = self.fetcher.fetch_rendered(url, &options, deadline).await?;
                Ok(FetchedDocument {
                    final_url: page.final_url,
                    html: page.html,
                    metadata,
                })
            }
        }
    }

    fn render_options(&self, strategy: FetchStrategy) -> RenderOptions {
        match strategy {
            FetchStrategy::PlainHttp => RenderOptions {
                javascript_enabled: false,
                ..RenderOptions::default()
            },
            FetchStrategy::HeadlessDefault => RenderOptions::default(),
            FetchStrategy::HeadlessScroll => RenderOptions {
                scroll_steps: 3,
                ..RenderOptions::default()
            },
            FetchStrategy::HeadlessStealth => {
                let agent_idx =
                    (self.rng.unit() * STEALTH_USER_AGENTS.len() as f64) as usize;
                let viewport_idx =
                    (self.rng.unit() * STEALTH_VIEWPORTS.len() as f64) as usize;
                RenderOptions {
                    scroll_steps: 2,
                    user_agent: Some(
                        STEALTH_USER_AGENTS[agent_idx.min(STEALTH_USER_AGENTS.len() - 1)]
                            .to_string(),
                    ),
                    viewport: STEALTH_VIEWPORTS[viewport_idx.min(STEALTH_VIEWPORTS.len() - 1)],
                    ..RenderOptions::default()
                }
            }
        }
    }

    /// Terminal classification once every strategy has failed.
    fn summarize(url: &str, failures: &[(FetchStrategy, DiscoveryError)]) -> DiscoveryError {
        if failures.is_empty() {
            return DiscoveryError::transient(format!("no strategy applicable for {url}"));
        }
        let kinds: Vec<ErrorKind> = failures.iter().map(|(_, e)| e.kind()).collect();

        if kinds.iter().all(|k| *k == ErrorKind::Blocked || *k == ErrorKind::RateLimited) {
            return DiscoveryError::Blocked {
                url: url.to_string(),
            };
        }
        let plain_not_found = failures.iter().any(|(s, e)| {
            *s == FetchStrategy::PlainHttp && e.kind() == ErrorKind::NotFound
        });
        if plain_not_found {
            return DiscoveryError::NotFound {
                resource: url.to_string(),
            };
        }
        // Timeouts and everything else surface as a transient upstream
        // failure for the caller's retry policy to judge.
        let detail = failures
            .iter()
            .map(|(s, e)| format!("{}={}", s.name(), e.kind()))
            .collect::<Vec<_>>()
            .join(", ");
        DiscoveryError::transient(format!("all strategies failed for {url}: {detail}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{PageSession, PlainResponse, RenderedPage, ThreadRandom};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted fetcher: plain requests observe `plain_status`, rendered
    /// requests succeed after `rendered_failures` failures.
    struct ScriptedFetcher {
        plain_status: u16,
        rendered_failures: AtomicU32,
        plain_calls: AtomicU32,
        rendered_calls: AtomicU32,
    }

    impl ScriptedFetcher {
        fn new(plain_status: u16, rendered_failures: u32) -> Self {
            Self {
                plain_status,
                rendered_failures: AtomicU32::new(rendered_failures),
                plain_calls: AtomicU32::new(0),
                rendered_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch_plain(&self, url: &str, _deadline: Duration) -> Result<PlainResponse> {
            self.plain_calls.fetch_add(1, Ordering::SeqCst);
            if self.plain_status >= 400 {
                return Err(DiscoveryError::from_status(self.plain_status, url));
            }
            Ok(PlainResponse {
                status: self.plain_status,
                headers: HashMap::new(),
                body: "<html>plain</html>".to_string(),
            })
        }

        async fn fetch_rendered(
            &self,
            url: &str,
            _options: &RenderOptions,
            _deadline: Duration,
        ) -> Result<RenderedPage> {
            self.rendered_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.rendered_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.rendered_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(DiscoveryError::Blocked {
                    url: url.to_string(),
                });
            }
            Ok(RenderedPage {
                final_url: url.to_string(),
                html: "<html>rendered</html>".to_string(),
                network_log: Vec::new(),
            })
        }

        async fn open_session(&self, _options: &RenderOptions) -> Result<Box<dyn PageSession>> {
            Err(DiscoveryError::transient("not scripted"))
        }
    }

    fn fetcher_over(scripted: ScriptedFetcher) -> StrategyFetcher {
        let settings = FetchSettings {
            strategy_cooldown: Duration::from_millis(1),
            ..FetchSettings::default()
        };
        StrategyFetcher::new(
            Arc::new(scripted),
            Arc::new(ResponseCache::new()),
            Arc::new(ThreadRandom),
            &settings,
        )
    }

    #[tokio::test]
    async fn plain_success_short_circuits() {
        let fetcher = fetcher_over(ScriptedFetcher::new(200, 0));
        let doc = fetcher
            .fetch("https://site/page", FetchHints::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(doc.html, "<html>plain</html>");
        assert_eq!(doc.metadata["strategy"], "plain_http");
    }

    #[tokio::test]
    async fn blocked_plain_escalates_to_headless() {
        let fetcher = fetcher_over(ScriptedFetcher::new(403, 0));
        let doc = fetcher
            .fetch("https://site/page", FetchHints::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(doc.html, "<html>rendered</html>");
        assert_eq!(doc.metadata["strategy"], "headless_default");
    }

    #[tokio::test]
    async fn all_blocked_classifies_as_blocked() {
        let fetcher = fetcher_over(ScriptedFetcher::new(403, 10));
        let err = fetcher
            .fetch("https://site/page", FetchHints::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Blocked);
    }

    #[tokio::test]
    async fn plain_404_without_headless_success_is_not_found() {
        let fetcher = fetcher_over(ScriptedFetcher::new(404, 10));
        let err = fetcher
            .fetch("https://site/page", FetchHints::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn javascript_hint_skips_plain() {
        let scripted = ScriptedFetcher::new(200, 0);
        let fetcher = fetcher_over(scripted);
        let doc = fetcher
            .fetch(
                "https://site/page",
                FetchHints {
                    needs_javascript: true,
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(doc.metadata["strategy"], "headless_default");
    }

    #[tokio::test]
    async fn second_fetch_is_served_from_cache() {
        let fetcher = fetcher_over(ScriptedFetcher::new(200, 0));
        let cancel = CancellationToken::new();
        fetcher
            .fetch("https://site/page", FetchHints::default(), &cancel)
            .await
            .unwrap();
        let doc = fetcher
            .fetch("https://site/page", FetchHints::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(doc.metadata["strategy"], "cache");
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_cascade() {
        let fetcher = fetcher_over(ScriptedFetcher::new(403, 10));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetcher
            .fetch("https://site/page", FetchHints::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
