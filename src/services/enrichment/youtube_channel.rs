//! YouTube channel enrichment worker: subscriber count, social links and
//! contact address from the channel About page.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::error::{DiscoveryError, Result};
use crate::models::ArtistProfile;
use crate::services::enrichment::{
    parse_abbreviated_count, EnrichmentSource, SourceOutcome, YoutubeChannelData,
};
use crate::services::extractor::ArtistExtractor;
use crate::services::quota::QuotaLimiter;
use crate::services::response_cache::ResponseCache;
use crate::services::strategy_fetcher::{FetchHints, StrategyFetcher};

static SUBSCRIBERS_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([\d.,]+[KMB]?)\s*subscribers").expect("subscribers pattern")
});
static CHANNEL_ID_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""channelId":"(UC[A-Za-z0-9_-]+)""#).expect("channel id pattern"));
static DESCRIPTION_META: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<meta\s+(?:name|property)="(?:og:)?description"\s+content="([^"]*)""#)
        .expect("description meta pattern")
});

pub(crate) fn parse_about_page(html: &str, extractor: &ArtistExtractor) -> YoutubeChannelData {
    YoutubeChannelData {
        channel_id: CHANNEL_ID_JSON
            .captures(html)
            .map(|caps| caps[1].to_string()),
        subscribers: SUBSCRIBERS_TEXT
            .captures(html)
            .and_then(|caps| parse_abbreviated_count(&caps[1])),
        social_links: extractor.social_links(html),
        email: extractor.email(html),
        description: DESCRIPTION_META
            .captures(html)
            .map(|caps| caps[1].to_string())
            .filter(|d| !d.trim().is_empty()),
    }
}

/// YouTube channel source worker.
pub struct YoutubeChannelEnricher {
    fetcher: Arc<StrategyFetcher>,
    cache: Arc<ResponseCache>,
    quota: QuotaLimiter,
    extractor: ArtistExtractor,
}

impl YoutubeChannelEnricher {
    pub fn new(
        fetcher: Arc<StrategyFetcher>,
        cache: Arc<ResponseCache>,
        quota: QuotaLimiter,
    ) -> Self {
        Self {
            fetcher,
            cache,
            quota,
            extractor: ArtistExtractor::new(),
        }
    }

    fn about_url(profile: &ArtistProfile) -> Option<String> {
        let base = profile
            .youtube_channel_url
            .clone()
            .or_else(|| {
                profile
                    .youtube_channel_id
                    .as_ref()
                    .map(|id| format!("https://www.youtube.com/channel/{id}"))
            })?;
        Some(format!("{}/about", base.trim_end_matches('/')))
    }
}

#[async_trait]
impl EnrichmentSource for YoutubeChannelEnricher {
    fn name(&self) -> &'static str {
        "youtube_channel"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(15)
    }

    async fn enrich(
        &self,
        profile: &ArtistProfile,
        cancel: &CancellationToken,
    ) -> Result<SourceOutcome> {
        let url = Self::about_url(profile).ok_or(DiscoveryError::NotFound {
            resource: format!("youtube channel for {:?}", profile.name),
        })?;

        if let Some(cached) = self.cache.get("youtube.channel", &url).await {
            if let Ok(data) = serde_json::from_str::<YoutubeChannelData>(&cached) {
                return Ok(SourceOutcome::YoutubeChannel(data));
            }
        }

        let reservation = self
            .quota
            .reserve("youtube.videos", 1)
            .ok_or(DiscoveryError::RateLimited { retry_after: None })?;

        let document = match self.fetcher.fetch(&url, FetchHints::default(), cancel).await {
            Ok(document) => document,
            Err(e) => {
                reservation.refund();
                return Err(e);
            }
        };
        reservation.commit();

        let data = parse_about_page(&document.html, &self.extractor);
        if let Ok(serialized) = serde_json::to_string(&data) {
            self.cache.insert("youtube.channel", &url, serialized).await;
        }
        Ok(SourceOutcome::YoutubeChannel(data))
    }
}
