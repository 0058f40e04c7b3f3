//! Fetcher port: plain HTTP and rendered (browser-like) page retrieval.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{DiscoveryError, Result};

/// Response from a no-JavaScript fetch.
#[derive(Debug, Clone)]
pub struct PlainResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Rendering options for headless fetches and harvest sessions.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub scroll_steps: u32,
    pub settle: Duration,
    pub user_agent: Option<String>,
    pub viewport: (u32, u32),
    pub javascript_enabled: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            scroll_steps: 0,
            settle: Duration::from_millis(500),
            user_agent: None,
            viewport: (1280, 720),
            javascript_enabled: true,
        }
    }
}

/// Result of a rendered fetch.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub final_url: String,
    pub html: String,
    pub network_log: Vec<String>,
}

/// Outbound page retrieval. Implementations must observe the deadline on
/// every call; exceeding it is a `Transient` failure.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_plain(&self, url: &str, deadline: Duration) -> Result<PlainResponse>;

    async fn fetch_rendered(
        &self,
        url: &str,
        options: &RenderOptions,
        deadline: Duration,
    ) -> Result<RenderedPage>;

    /// Open a reusable browser-like session for scroll harvesting.
    async fn open_session(&self, options: &RenderOptions) -> Result<Box<dyn PageSession>>;
}

/// One browser context reused across scroll steps of a harvest.
#[async_trait]
pub trait PageSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Scroll one viewport and wait for the page to settle.
    async fn scroll_once(&mut self, settle: Duration) -> Result<()>;

    /// Currently rendered document.
    async fn html(&mut self) -> Result<String>;

    async fn close(&mut self) -> Result<()>;
}

/// reqwest-backed fetcher. Serves the plain-HTTP strategy for real; the
/// rendered calls degrade to script-less GETs, which is enough for the
/// CLI against sites that serve meaningful HTML without JavaScript. A
/// real headless backend plugs in behind the same trait.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .map_err(|e| DiscoveryError::fatal(format!("http client init failed: {e}")))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str, deadline: Duration, user_agent: Option<&str>) -> Result<PlainResponse> {
        let mut request = self.client.get(url).timeout(deadline);
        if let Some(agent) = user_agent {
            request = request.header(reqwest::header::USER_AGENT, agent);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;
        Ok(PlainResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_plain(&self, url: &str, deadline: Duration) -> Result<PlainResponse> {
        self.get(url, deadline, None).await
    }

    async fn fetch_rendered(
        &self,
        url: &str,
        options: &RenderOptions,
        deadline: Duration,
    ) -> Result<RenderedPage> {
        let response = self
            .get(url, deadline, options.user_agent.as_deref())
            .await?;
        if response.status >= 400 {
            return Err(DiscoveryError::from_status(response.status, url));
        }
        Ok(RenderedPage {
            final_url: url.to_string(),
            html: response.body,
            network_log: Vec::new(),
        })
    }

    async fn open_session(&self, options: &RenderOptions) -> Result<Box<dyn PageSession>> {
        Ok(Box::new(HttpPageSession {
            fetcher: HttpFetcher {
                client: self.client.clone(),
            },
            options: options.clone(),
            current_html: None,
        }))
    }
}

/// Script-less page session: navigation refetches, scrolling is a no-op
/// settle. Lazily loaded content is out of reach, which the harvester's
/// no-progress window handles.
struct HttpPageSession {
    fetcher: HttpFetcher,
    options: RenderOptions,
    current_html: Option<String>,
}

#[async_trait]
impl PageSession for HttpPageSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let page = self
            .fetcher
            .fetch_rendered(url, &self.options, Duration::from_secs(10))
            .await?;
        self.current_html = Some(page.html);
        Ok(())
    }

    async fn scroll_once(&mut self, settle: Duration) -> Result<()> {
        tokio::time::sleep(settle).await;
        Ok(())
    }

    async fn html(&mut self) -> Result<String> {
        self.current_html
            .clone()
            .ok_or_else(|| DiscoveryError::transient("no page loaded"))
    }

    async fn close(&mut self) -> Result<()> {
        self.current_html = None;
        Ok(())
    }
}
