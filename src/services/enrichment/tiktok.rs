//! TikTok enrichment worker: follower and total-likes counts from the
//! public profile page.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::error::{DiscoveryError, Result};
use crate::models::{ArtistProfile, SocialPlatform};
use crate::services::enrichment::{
    parse_abbreviated_count, EnrichmentSource, SourceOutcome, TiktokData,
};
use crate::services::extractor::ArtistExtractor;
use crate::services::quota::QuotaLimiter;
use crate::services::response_cache::ResponseCache;
use crate::services::strategy_fetcher::{FetchHints, StrategyFetcher};

const PROFILE_BASE: &str = "https://www.tiktok.com";

static FOLLOWERS_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""followerCount":(\d+)"#).expect("follower json pattern"));
static LIKES_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""heartCount":(\d+)"#).expect("heart json pattern"));
static FOLLOWERS_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([\d.,]+[KMB]?)\s*followers").expect("follower text pattern")
});
static LIKES_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([\d.,]+[KMB]?)\s*likes").expect("likes text pattern"));

pub(crate) fn parse_profile(html: &str, handle: &str) -> TiktokData {
    let followers = FOLLOWERS_JSON
        .captures(html)
        .and_then(|caps| caps[1].parse::<u64>().ok())
        .or_else(|| {
            FOLLOWERS_TEXT
                .captures(html)
                .and_then(|caps| parse_abbreviated_count(&caps[1]))
        });
    let likes = LIKES_JSON
        .captures(html)
        .and_then(|caps| caps[1].parse::<u64>().ok())
        .or_else(|| {
            LIKES_TEXT
                .captures(html)
                .and_then(|caps| parse_abbreviated_count(&caps[1]))
        });
    TiktokData {
        handle: Some(handle.to_string()),
        followers,
        likes,
    }
}

/// TikTok source worker.
pub struct TiktokEnricher {
    fetcher: Arc<StrategyFetcher>,
    cache: Arc<ResponseCache>,
    quota: QuotaLimiter,
    extractor: ArtistExtractor,
    profile_base: String,
}

impl TiktokEnricher {
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
            profile_base: PROFILE_BASE.to_string(),
        }
    }

    fn handle_for(&self, profile: &ArtistProfile) -> Option<String> {
        if let Some(handle) = &profile.tiktok_handle {
            return Some(handle.clone());
        }
        profile
            .social_links
            .tiktok
            .as_deref()
            .and_then(|url| self.extractor.handle_from_url(SocialPlatform::Tiktok, url))
    }
}

#[async_trait]
impl EnrichmentSource for TiktokEnricher {
    fn name(&self) -> &'static str {
        "tiktok"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(15)
    }

    async fn enrich(
        &self,
        profile: &ArtistProfile,
        cancel: &CancellationToken,
    ) -> Result<SourceOutcome> {
        let handle = self.handle_for(profile).ok_or(DiscoveryError::NotFound {
            resource: format!("tiktok handle for {:?}", profile.name),
        })?;
        let handle = handle.to_lowercase();

        if let Some(cached) = self.cache.get("tiktok.profile", &handle).await {
            if let Ok(data) = serde_json::from_str::<TiktokData>(&cached) {
                return Ok(SourceOutcome::Tiktok(data));
            }
        }

        let reservation = self
            .quota
            .reserve("tiktok.profile", 1)
            .ok_or(DiscoveryError::RateLimited { retry_after: None })?;

        let url = format!("{}/@{handle}", self.profile_base);
        let document = match self.fetcher.fetch(&url, FetchHints::default(), cancel).await {
            Ok(document) => document,
            Err(e) => {
                reservation.refund();
                return Err(e);
            }
        };
        reservation.commit();

        let data = parse_profile(&document.html, &handle);
        if let Ok(serialized) = serde_json::to_string(&data) {
            self.cache
                .insert("tiktok.profile", &handle, serialized)
                .await;
        }
        Ok(SourceOutcome::Tiktok(data))
    }
}
