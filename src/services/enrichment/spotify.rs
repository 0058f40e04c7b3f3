//! Spotify enrichment worker.
//!
//! Two-step enrichment: the Web API (client-credentials flow) resolves
//! the artist and supplies genres, followers and an avatar; a scrape of
//! the public artist page recovers monthly listeners, top city and bio,
//! which the API does not expose.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::SpotifySettings;
use crate::error::{DiscoveryError, Result};
use crate::models::{normalize_name, ArtistProfile};
use crate::services::enrichment::{EnrichmentSource, SourceOutcome, SpotifyData};
use crate::services::quota::QuotaLimiter;
use crate::services::response_cache::ResponseCache;
use crate::services::strategy_fetcher::{FetchHints, StrategyFetcher};

const API_BASE: &str = "https://api.spotify.com/v1";
const AUTH_URL: &str = "https://accounts.spotify.com/api/token";
const ARTIST_PAGE_BASE: &str = "https://open.spotify.com/artist";

static MONTHLY_LISTENERS_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([\d,.]+)\s*monthly\s*listeners?").expect("monthly listeners pattern")
});
static MONTHLY_LISTENERS_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""monthlyListeners":(\d+)"#).expect("monthly listeners json"));
static TOP_CITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""city":"([^"]+)""#).expect("top city pattern"));
static PAGE_BIO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<meta\s+(?:name|property)="og:description"\s+content="([^"]+)""#)
        .expect("bio meta pattern")
});

/// Minimal client for the pieces of the Web API this worker needs.
/// Base URLs are injectable so tests can point at a local mock.
pub struct SpotifyApiClient {
    client: reqwest::Client,
    settings: SpotifySettings,
    token: RwLock<Option<String>>,
    api_base: String,
    auth_url: String,
}

impl SpotifyApiClient {
    pub fn new(settings: SpotifySettings) -> Self {
        Self::with_endpoints(settings, API_BASE, AUTH_URL)
    }

    pub fn with_endpoints(
        settings: SpotifySettings,
        api_base: impl Into<String>,
        auth_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
            token: RwLock::new(None),
            api_base: api_base.into(),
            auth_url: auth_url.into(),
        }
    }

    async fn ensure_token(&self) -> Result<String> {
        {
            let token = self.token.read().await;
            if let Some(token) = token.as_ref() {
                return Ok(token.clone());
            }
        }
        let fresh = self.refresh_token().await?;
        *self.token.write().await = Some(fresh.clone());
        Ok(fresh)
    }

    async fn refresh_token(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let response = self
            .client
            .post(&self.auth_url)
            .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DiscoveryError::from_status(
                response.status().as_u16(),
                &self.auth_url,
            ));
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    async fn api_get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let token = self.ensure_token().await?;
        let url = format!("{}{}", self.api_base, path);
        let response = self.client.get(&url).bearer_auth(&token).send().await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            // Token expired mid-flight; refresh once and retry.
            *self.token.write().await = None;
            let token = self.ensure_token().await?;
            let retried = self.client.get(&url).bearer_auth(&token).send().await?;
            if !retried.status().is_success() {
                return Err(DiscoveryError::from_status(retried.status().as_u16(), &url));
            }
            return Ok(retried.json().await?);
        }
        if !response.status().is_success() {
            return Err(DiscoveryError::from_status(response.status().as_u16(), &url));
        }
        Ok(response.json().await?)
    }

    /// Best search hit for an artist name, if any.
    pub async fn search_artist(&self, name: &str) -> Result<Option<ApiArtist>> {
        let path = format!(
            "/search?type=artist&limit=5&q={}",
            urlencoding::encode(name)
        );
        let response: SearchResponse = self.api_get(&path).await?;
        let normalized = normalize_name(name);
        let best = response
            .artists
            .items
            .into_iter()
            .find(|artist| normalize_name(&artist.name) == normalized);
        Ok(best)
    }

    /// Titles of an artist's top tracks.
    pub async fn top_tracks(&self, artist_id: &str) -> Result<Vec<String>> {
        let path = format!("/artists/{artist_id}/top-tracks?market=US");
        let response: TopTracksResponse = self.api_get(&path).await?;
        Ok(response.tracks.into_iter().map(|t| t.name).collect())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    artists: ArtistPage,
}

#[derive(Debug, Deserialize)]
struct ArtistPage {
    items: Vec<ApiArtist>,
}

#[derive(Debug, Deserialize)]
pub struct ApiArtist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub images: Vec<ApiImage>,
    pub followers: Option<ApiFollowers>,
}

#[derive(Debug, Deserialize)]
pub struct ApiImage {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiFollowers {
    pub total: u64,
}

#[derive(Debug, Deserialize)]
struct TopTracksResponse {
    tracks: Vec<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    name: String,
}

/// Spotify source worker.
pub struct SpotifyEnricher {
    api: SpotifyApiClient,
    fetcher: Arc<StrategyFetcher>,
    cache: Arc<ResponseCache>,
    quota: QuotaLimiter,
    page_base: String,
}

impl SpotifyEnricher {
    pub fn new(
        api: SpotifyApiClient,
        fetcher: Arc<StrategyFetcher>,
        cache: Arc<ResponseCache>,
        quota: QuotaLimiter,
    ) -> Self {
        Self {
            api,
            fetcher,
            cache,
            quota,
            page_base: ARTIST_PAGE_BASE.to_string(),
        }
    }

    /// Scrape page-only fields into the data set; failures here degrade
    /// the result instead of failing the source.
    async fn scrape_artist_page(
        &self,
        data: &mut SpotifyData,
        artist_id: &str,
        cancel: &CancellationToken,
    ) {
        let url = format!("{}/{artist_id}", self.page_base);
        match self.fetcher.fetch(&url, FetchHints::default(), cancel).await {
            Ok(document) => {
                data.monthly_listeners = MONTHLY_LISTENERS_JSON
                    .captures(&document.html)
                    .and_then(|caps| caps[1].parse::<u64>().ok())
                    .or_else(|| {
                        MONTHLY_LISTENERS_TEXT
                            .captures(&document.html)
                            .and_then(|caps| caps[1].replace([',', '.'], "").parse::<u64>().ok())
                    });
                data.top_city = TOP_CITY
                    .captures(&document.html)
                    .map(|caps| caps[1].to_string());
                if data.bio.is_none() {
                    data.bio = PAGE_BIO
                        .captures(&document.html)
                        .map(|caps| caps[1].to_string());
                }
            }
            Err(e) => {
                tracing::debug!(artist_id, error = %e, "artist page scrape failed");
            }
        }
    }
}

#[async_trait]
impl EnrichmentSource for SpotifyEnricher {
    fn name(&self) -> &'static str {
        "spotify"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(20)
    }

    async fn enrich(
        &self,
        profile: &ArtistProfile,
        cancel: &CancellationToken,
    ) -> Result<SourceOutcome> {
        let cache_key = normalize_name(&profile.name);
        if let Some(cached) = self.cache.get("spotify.search", &cache_key).await {
            if let Ok(data) = serde_json::from_str::<SpotifyData>(&cached) {
                return Ok(SourceOutcome::Spotify(data));
            }
        }

        let reservation = self
            .quota
            .reserve("spotify.search", 1)
            .ok_or(DiscoveryError::RateLimited { retry_after: None })?;

        let artist = match self.api.search_artist(&profile.name).await {
            Ok(Some(artist)) => artist,
            Ok(None) => {
                reservation.commit();
                return Err(DiscoveryError::NotFound {
                    resource: format!("spotify artist {:?}", profile.name),
                });
            }
            Err(e) => {
                reservation.refund();
                return Err(e);
            }
        };
        reservation.commit();

        let mut data = SpotifyData {
            spotify_id: Some(artist.id.clone()),
            genres: artist.genres,
            followers: artist.followers.map(|f| f.total),
            avatar_url: artist.images.first().map(|image| image.url.clone()),
            ..SpotifyData::default()
        };

        if self.quota.try_acquire("spotify.artist", 1) {
            match self.api.top_tracks(&artist.id).await {
                Ok(tracks) => data.top_tracks = tracks.into_iter().take(3).collect(),
                Err(e) => tracing::debug!(error = %e, "top tracks lookup failed"),
            }
        }

        self.scrape_artist_page(&mut data, &artist.id, cancel).await;

        if let Ok(serialized) = serde_json::to_string(&data) {
            self.cache
                .insert("spotify.search", &cache_key, serialized)
                .await;
        }
        Ok(SourceOutcome::Spotify(data))
    }
}
