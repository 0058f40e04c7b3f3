//! Instagram enrichment worker: profile-page scrape for follower count,
//! post count and the bio link.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::error::{DiscoveryError, Result};
use crate::models::{ArtistProfile, SocialPlatform};
use crate::services::enrichment::{
    parse_abbreviated_count, EnrichmentSource, InstagramData, SourceOutcome,
};
use crate::services::extractor::ArtistExtractor;
use crate::services::quota::QuotaLimiter;
use crate::services::response_cache::ResponseCache;
use crate::services::strategy_fetcher::{FetchHints, StrategyFetcher};

const PROFILE_BASE: &str = "https://www.instagram.com";

static FOLLOWERS_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""edge_followed_by":\{"count":(\d+)\}"#).expect("followers json pattern")
});
static FOLLOWERS_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([\d.,]+[KMB]?)\s*followers").expect("followers text pattern")
});
static POSTS_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""edge_owner_to_timeline_media":\{"count":(\d+)\}"#).expect("posts json pattern")
});
static POSTS_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([\d.,]+[KMB]?)\s*posts").expect("posts text pattern"));
static EXTERNAL_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""external_url":"([^"]+)""#).expect("external url pattern"));
static BIOGRAPHY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""biography":"([^"]*)""#).expect("biography pattern"));

/// Parse the profile fields out of a rendered profile page.
pub(crate) fn parse_profile(html: &str, handle: &str) -> InstagramData {
    let followers = FOLLOWERS_JSON
        .captures(html)
        .and_then(|caps| caps[1].parse::<u64>().ok())
        .or_else(|| {
            FOLLOWERS_TEXT
                .captures(html)
                .and_then(|caps| parse_abbreviated_count(&caps[1]))
        });
    let posts = POSTS_JSON
        .captures(html)
        .and_then(|caps| caps[1].parse::<u64>().ok())
        .or_else(|| {
            POSTS_TEXT
                .captures(html)
                .and_then(|caps| parse_abbreviated_count(&caps[1]))
        });
    let bio_url = EXTERNAL_URL
        .captures(html)
        .map(|caps| caps[1].replace("\\/", "/"));
    let bio = BIOGRAPHY
        .captures(html)
        .map(|caps| caps[1].replace("\\n", "\n"))
        .filter(|bio| !bio.trim().is_empty());

    InstagramData {
        handle: Some(handle.to_string()),
        followers,
        posts,
        bio_url,
        bio,
    }
}

/// Instagram source worker.
pub struct InstagramEnricher {
    fetcher: Arc<StrategyFetcher>,
    cache: Arc<ResponseCache>,
    quota: QuotaLimiter,
    extractor: ArtistExtractor,
    profile_base: String,
}

impl InstagramEnricher {
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
        if let Some(handle) = &profile.instagram_handle {
            return Some(handle.clone());
        }
        profile
            .social_links
            .instagram
            .as_deref()
            .and_then(|url| self.extractor.handle_from_url(SocialPlatform::Instagram, url))
    }
}

#[async_trait]
impl EnrichmentSource for InstagramEnricher {
    fn name(&self) -> &'static str {
        "instagram"
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
            resource: format!("instagram handle for {:?}", profile.name),
        })?;
        let handle = handle.to_lowercase();

        if let Some(cached) = self.cache.get("instagram.profile", &handle).await {
            if let Ok(data) = serde_json::from_str::<InstagramData>(&cached) {
                return Ok(SourceOutcome::Instagram(data));
            }
        }

        let reservation = self
            .quota
            .reserve("instagram.profile", 1)
            .ok_or(DiscoveryError::RateLimited { retry_after: None })?;

        let url = format!("{}/{handle}/", self.profile_base);
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
                .insert("instagram.profile", &handle, serialized)
                .await;
        }
        Ok(SourceOutcome::Instagram(data))
    }
}
