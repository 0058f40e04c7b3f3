//! Multi-source artist enrichment.
//!
//! Each artist fans out across per-source workers (Spotify, Instagram,
//! TikTok, YouTube channel, lyrics) with per-source timeouts, quota
//! admission and a bounded retry policy. Source failures are isolated:
//! one source failing never cancels its peers. Successful outcomes merge
//! into a fresh copy of the profile deterministically.

pub mod instagram;
pub mod lyrics;
pub mod spotify;
pub mod tiktok;
pub mod youtube_channel;

pub use instagram::InstagramEnricher;
pub use lyrics::LyricsEnricher;
pub use spotify::SpotifyEnricher;
pub use tiktok::TiktokEnricher;
pub use youtube_channel::YoutubeChannelEnricher;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{DiscoveryError, ErrorKind, Result};
use crate::models::{ArtistProfile, FollowerCounts, LyricAnalysis, SocialLinks, SocialPlatform};
use crate::ports::RandomSource;

/// Parse follower-style counts with `K`/`M`/`B` suffixes: `1.2K` → 1200,
/// `3.4M` → 3_400_000. Plain numbers may carry thousands separators.
pub fn parse_abbreviated_count(raw: &str) -> Option<u64> {
    let cleaned = raw.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    let (digits, multiplier) = match cleaned.chars().last()? {
        'k' | 'K' => (&cleaned[..cleaned.len() - 1], 1_000_f64),
        'm' | 'M' => (&cleaned[..cleaned.len() - 1], 1_000_000_f64),
        'b' | 'B' => (&cleaned[..cleaned.len() - 1], 1_000_000_000_f64),
        _ => (cleaned.as_str(), 1_f64),
    };
    let value: f64 = digits.parse().ok()?;
    if value < 0.0 || !value.is_finite() {
        return None;
    }
    Some((value * multiplier).round() as u64)
}

/// Spotify search + artist-page scrape result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpotifyData {
    pub spotify_id: Option<String>,
    pub genres: Vec<String>,
    pub followers: Option<u64>,
    pub monthly_listeners: Option<u64>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub top_city: Option<String>,
    pub top_tracks: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstagramData {
    pub handle: Option<String>,
    pub followers: Option<u64>,
    pub posts: Option<u64>,
    pub bio_url: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TiktokData {
    pub handle: Option<String>,
    pub followers: Option<u64>,
    pub likes: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct YoutubeChannelData {
    pub channel_id: Option<String>,
    pub subscribers: Option<u64>,
    pub social_links: SocialLinks,
    pub email: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LyricsData {
    pub analyses: Vec<LyricAnalysis>,
}

/// Closed sum of everything a source can contribute.
#[derive(Debug, Clone)]
pub enum SourceOutcome {
    Spotify(SpotifyData),
    Instagram(InstagramData),
    Tiktok(TiktokData),
    YoutubeChannel(YoutubeChannelData),
    Lyrics(LyricsData),
}

impl SourceOutcome {
    pub fn source_name(&self) -> &'static str {
        match self {
            SourceOutcome::Spotify(_) => "spotify",
            SourceOutcome::Instagram(_) => "instagram",
            SourceOutcome::Tiktok(_) => "tiktok",
            SourceOutcome::YoutubeChannel(_) => "youtube_channel",
            SourceOutcome::Lyrics(_) => "lyrics",
        }
    }
}

fn fill_text(slot: &mut Option<String>, value: &Option<String>) {
    if slot.is_none() {
        if let Some(text) = value {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                *slot = Some(trimmed.to_string());
            }
        }
    }
}

/// Deterministic merge of one outcome into a profile (§ merge rules:
/// identifiers and text fill only when empty, counts grow monotonically,
/// set fields union under their caps).
pub fn apply_outcome(profile: &mut ArtistProfile, outcome: &SourceOutcome) {
    match outcome {
        SourceOutcome::Spotify(data) => {
            fill_text(&mut profile.spotify_id, &data.spotify_id);
            if let Some(id) = &profile.spotify_id {
                profile.social_links.fill(
                    SocialPlatform::Spotify,
                    format!("https://open.spotify.com/artist/{id}"),
                );
            }
            profile.extend_genres(data.genres.iter().cloned());
            profile.follower_counts.merge_max(&FollowerCounts {
                spotify_followers: data.followers,
                spotify_monthly_listeners: data.monthly_listeners,
                ..FollowerCounts::default()
            });
            fill_text(&mut profile.avatar_url, &data.avatar_url);
            fill_text(&mut profile.bio, &data.bio);
            fill_text(&mut profile.location, &data.top_city);
        }
        SourceOutcome::Instagram(data) => {
            fill_text(&mut profile.instagram_handle, &data.handle);
            profile.follower_counts.merge_max(&FollowerCounts {
                instagram_followers: data.followers,
                ..FollowerCounts::default()
            });
            if let Some(url) = &data.bio_url {
                profile.social_links.fill(SocialPlatform::Website, url);
            }
            fill_text(&mut profile.bio, &data.bio);
        }
        SourceOutcome::Tiktok(data) => {
            fill_text(&mut profile.tiktok_handle, &data.handle);
            profile.follower_counts.merge_max(&FollowerCounts {
                tiktok_followers: data.followers,
                tiktok_likes: data.likes,
                ..FollowerCounts::default()
            });
        }
        SourceOutcome::YoutubeChannel(data) => {
            fill_text(&mut profile.youtube_channel_id, &data.channel_id);
            profile.follower_counts.merge_max(&FollowerCounts {
                youtube_subscribers: data.subscribers,
                ..FollowerCounts::default()
            });
            profile.social_links.merge_missing(&data.social_links);
            fill_text(&mut profile.email, &data.email);
            fill_text(&mut profile.bio, &data.description);
        }
        SourceOutcome::Lyrics(data) => {
            for analysis in &data.analyses {
                profile.extend_lyric_themes(analysis.themes.iter().cloned());
            }
        }
    }
}

/// One enrichment worker.
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Budget for the whole source run, retries included.
    fn timeout(&self) -> Duration;

    async fn enrich(
        &self,
        profile: &ArtistProfile,
        cancel: &CancellationToken,
    ) -> Result<SourceOutcome>;
}

/// Retry policy for `Transient` and `RateLimited` source failures:
/// exponential backoff on a 1 s base with ±25% jitter, honoring
/// `Retry-After` when the upstream provided one.
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub jitter: f64,
    rng: Arc<dyn RandomSource>,
}

impl RetryPolicy {
    pub fn new(rng: Arc<dyn RandomSource>) -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            jitter: 0.25,
            rng,
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Backoff before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * 2_f64.powi(attempt.min(16) as i32);
        let offset = (self.rng.unit() * 2.0 - 1.0) * base * self.jitter;
        Duration::from_secs_f64((base + offset).max(0.0))
    }

    fn delay_after(&self, error: &DiscoveryError, attempt: u32) -> Duration {
        match error {
            DiscoveryError::RateLimited {
                retry_after: Some(after),
            } => *after,
            _ => self.delay_for(attempt),
        }
    }
}

/// What happened to one source during an enrichment run.
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source: &'static str,
    pub attempts: u32,
    pub outcome: std::result::Result<(), ErrorKind>,
}

impl SourceReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Fan-out coordinator. Sources run concurrently; the lyrics worker runs
/// afterwards because it feeds on the Spotify result's track titles.
pub struct EnrichmentCoordinator {
    sources: Vec<Arc<dyn EnrichmentSource>>,
    lyrics: Option<Arc<LyricsEnricher>>,
    retry: RetryPolicy,
    overall_deadline: Duration,
}

impl EnrichmentCoordinator {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            sources: Vec::new(),
            lyrics: None,
            retry,
            overall_deadline: Duration::from_secs(90),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn EnrichmentSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_lyrics(mut self, lyrics: Arc<LyricsEnricher>) -> Self {
        self.lyrics = Some(lyrics);
        self
    }

    pub fn with_overall_deadline(mut self, deadline: Duration) -> Self {
        self.overall_deadline = deadline;
        self
    }

    pub fn source_count(&self) -> usize {
        self.sources.len() + usize::from(self.lyrics.is_some())
    }

    /// Enrich a profile. Returns the merged copy and a per-source report;
    /// the input is never mutated.
    pub async fn enrich(
        &self,
        profile: &ArtistProfile,
        cancel: &CancellationToken,
    ) -> (ArtistProfile, Vec<SourceReport>) {
        let mut enriched = profile.clone();
        let mut reports = Vec::with_capacity(self.source_count());
        let mut outcomes: Vec<Option<SourceOutcome>> = Vec::new();

        let wave = futures::future::join_all(
            self.sources
                .iter()
                .map(|source| self.run_source(source.as_ref(), profile, cancel)),
        );
        let wave = match tokio::time::timeout(self.overall_deadline, wave).await {
            Ok(results) => results,
            Err(_) => {
                tracing::warn!(artist = %profile.name, "enrichment deadline fired");
                self.sources
                    .iter()
                    .map(|source| {
                        (
                            SourceReport {
                                source: source.name(),
                                attempts: 0,
                                outcome: Err(ErrorKind::Transient),
                            },
                            None,
                        )
                    })
                    .collect()
            }
        };

        for (report, outcome) in wave {
            reports.push(report);
            outcomes.push(outcome);
        }

        // Lyrics feed on the Spotify track list, so they run as a second
        // wave when that produced anything.
        if let Some(lyrics) = &self.lyrics {
            let titles: Vec<String> = outcomes
                .iter()
                .flatten()
                .find_map(|outcome| match outcome {
                    SourceOutcome::Spotify(data) => Some(data.top_tracks.clone()),
                    _ => None,
                })
                .unwrap_or_default();

            if !titles.is_empty() {
                let (report, outcome) = self
                    .run_lyrics(lyrics.as_ref(), profile, titles, cancel)
                    .await;
                reports.push(report);
                outcomes.push(outcome);
            }
        }

        // Fixed application order keeps the merge deterministic.
        for outcome in outcomes.iter().flatten() {
            apply_outcome(&mut enriched, outcome);
        }

        for report in &reports {
            if let Err(kind) = &report.outcome {
                tracing::warn!(
                    artist = %profile.name,
                    source = report.source,
                    attempts = report.attempts,
                    kind = %kind,
                    "enrichment source failed"
                );
            }
        }

        (enriched, reports)
    }

    async fn run_source(
        &self,
        source: &dyn EnrichmentSource,
        profile: &ArtistProfile,
        cancel: &CancellationToken,
    ) -> (SourceReport, Option<SourceOutcome>) {
        let name = source.name();
        let work = self.retry_loop(name, profile, cancel, |profile, cancel| {
            source.enrich(profile, cancel)
        });
        let (attempts, result) = match tokio::time::timeout(source.timeout(), work).await {
            Ok(done) => done,
            Err(_) => (
                0,
                Err(DiscoveryError::transient(format!("{name} timed out"))),
            ),
        };
        Self::report(name, attempts, result)
    }

    async fn run_lyrics(
        &self,
        lyrics: &LyricsEnricher,
        profile: &ArtistProfile,
        titles: Vec<String>,
        cancel: &CancellationToken,
    ) -> (SourceReport, Option<SourceOutcome>) {
        let name = lyrics.name();
        let titles = &titles;
        let work = self.retry_loop(name, profile, cancel, move |profile, cancel| {
            lyrics.enrich_songs(&profile.name, titles, cancel)
        });
        let (attempts, result) = match tokio::time::timeout(lyrics.timeout(), work).await {
            Ok(done) => done,
            Err(_) => (
                0,
                Err(DiscoveryError::transient(format!("{name} timed out"))),
            ),
        };
        Self::report(name, attempts, result)
    }

    async fn retry_loop<'a, F, Fut>(
        &'a self,
        name: &'static str,
        profile: &'a ArtistProfile,
        cancel: &'a CancellationToken,
        mut call: F,
    ) -> (u32, Result<SourceOutcome>)
    where
        F: FnMut(&'a ArtistProfile, &'a CancellationToken) -> Fut,
        Fut: std::future::Future<Output = Result<SourceOutcome>> + 'a,
    {
        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return (attempts, Err(DiscoveryError::Cancelled));
            }
            attempts += 1;
            match call(profile, cancel).await {
                Ok(outcome) => return (attempts, Ok(outcome)),
                Err(err) if err.is_retryable() && attempts <= self.retry.max_retries => {
                    let delay = self.retry.delay_after(&err, attempts - 1);
                    tracing::debug!(
                        source = name,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "retrying source after failure"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return (attempts, Err(DiscoveryError::Cancelled)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return (attempts, Err(err)),
            }
        }
    }

    fn report(
        name: &'static str,
        attempts: u32,
        result: Result<SourceOutcome>,
    ) -> (SourceReport, Option<SourceOutcome>) {
        match result {
            Ok(outcome) => (
                SourceReport {
                    source: name,
                    attempts,
                    outcome: Ok(()),
                },
                Some(outcome),
            ),
            Err(err) => (
                SourceReport {
                    source: name,
                    attempts,
                    outcome: Err(err.kind()),
                },
                None,
            ),
        }
    }
}
