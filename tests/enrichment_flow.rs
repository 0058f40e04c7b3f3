//! Enrichment coordinator flows that need real fetch plumbing: the
//! lyrics wave feeding on Spotify track titles, quota-denied admission,
//! and response caching across calls.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{CannedSource, FakeAnalyzer, FakeFetcher};
use tokio_util::sync::CancellationToken;

use music_discovery_backend::config::FetchSettings;
use music_discovery_backend::error::ErrorKind;
use music_discovery_backend::models::ArtistProfile;
use music_discovery_backend::ports::{SystemClock, ThreadRandom};
use music_discovery_backend::services::enrichment::{
    EnrichmentSource, LyricsEnricher, SourceOutcome, SpotifyData,
};
use music_discovery_backend::services::{
    EnrichmentCoordinator, QuotaLimiter, ResponseCache, RetryPolicy, StrategyFetcher,
};

fn strategy_fetcher(fetcher: Arc<FakeFetcher>, cache: Arc<ResponseCache>) -> Arc<StrategyFetcher> {
    Arc::new(StrategyFetcher::new(
        fetcher,
        cache,
        Arc::new(ThreadRandom),
        &FetchSettings {
            strategy_cooldown: Duration::from_millis(1),
            ..FetchSettings::default()
        },
    ))
}

fn retry() -> RetryPolicy {
    RetryPolicy::new(Arc::new(ThreadRandom)).with_base_delay(Duration::from_millis(2))
}

fn spotify_with_tracks(tracks: &[&str]) -> SourceOutcome {
    SourceOutcome::Spotify(SpotifyData {
        spotify_id: Some("sp-1".to_string()),
        top_tracks: tracks.iter().map(|t| t.to_string()).collect(),
        ..SpotifyData::default()
    })
}

#[tokio::test]
async fn lyrics_wave_feeds_on_spotify_tracks() {
    let fetcher = Arc::new(FakeFetcher::new());
    // Lyrics pages for two of the three tracks; the third is missing and
    // must be skipped without failing the source.
    let page = concat!(
        "<html><body><div data-lyrics-container=\"true\">",
        "wandering through midnight cities looking for another honest heart",
        "</div></body></html>"
    );
    fetcher.add_page("artistx-first-song-lyrics", page);
    fetcher.add_page("artistx-second-song-lyrics", page);

    let cache = Arc::new(ResponseCache::new());
    let quota = QuotaLimiter::new(10_000, Arc::new(SystemClock));
    let lyrics = LyricsEnricher::with_site(
        strategy_fetcher(fetcher, cache),
        Arc::new(FakeAnalyzer),
        quota,
        "https://lyrics.example.com",
    );

    let spotify = Arc::new(
        CannedSource::new("spotify")
            .default_outcome(spotify_with_tracks(&["First Song", "Second Song", "Lost Song"])),
    );
    let coordinator = EnrichmentCoordinator::new(retry())
        .with_source(spotify as Arc<dyn EnrichmentSource>)
        .with_lyrics(Arc::new(lyrics));

    let profile = ArtistProfile::new("ArtistX");
    let (enriched, reports) = coordinator
        .enrich(&profile, &CancellationToken::new())
        .await;

    assert!(reports.iter().any(|r| r.source == "lyrics" && r.succeeded()));
    assert!(!enriched.lyric_themes.is_empty());
    // The input profile is never mutated.
    assert!(profile.lyric_themes.is_empty());
}

#[tokio::test]
async fn lyrics_skipped_without_spotify_tracks() {
    let fetcher = Arc::new(FakeFetcher::new());
    let cache = Arc::new(ResponseCache::new());
    let quota = QuotaLimiter::new(10_000, Arc::new(SystemClock));
    let lyrics = LyricsEnricher::with_site(
        strategy_fetcher(fetcher, cache),
        Arc::new(FakeAnalyzer),
        quota,
        "https://lyrics.example.com",
    );

    let coordinator = EnrichmentCoordinator::new(retry()).with_lyrics(Arc::new(lyrics));
    let (enriched, reports) = coordinator
        .enrich(&ArtistProfile::new("Unknown"), &CancellationToken::new())
        .await;

    assert!(reports.iter().all(|r| r.source != "lyrics"));
    assert!(enriched.lyric_themes.is_empty());
}

#[tokio::test]
async fn exhausted_quota_surfaces_as_rate_limited() {
    use music_discovery_backend::services::InstagramEnricher;

    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.add_page("instagram.com/artistx", "<html>1.2K Followers</html>");

    let cache = Arc::new(ResponseCache::new());
    // A zero budget denies every costed operation.
    let quota = QuotaLimiter::new(0, Arc::new(SystemClock));
    let instagram = InstagramEnricher::new(
        strategy_fetcher(fetcher, cache.clone()),
        cache,
        quota,
    );

    let mut profile = ArtistProfile::new("ArtistX");
    profile.instagram_handle = Some("artistx".to_string());

    let err = instagram
        .enrich(&profile, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimited);
}

#[tokio::test]
async fn profile_cache_skips_refetch_and_budget() {
    use music_discovery_backend::services::InstagramEnricher;

    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.add_page("instagram.com/artistx", "<html>12,345 Followers</html>");

    let cache = Arc::new(ResponseCache::new());
    // Budget for exactly one profile fetch.
    let quota = QuotaLimiter::new(1, Arc::new(SystemClock));
    let instagram = InstagramEnricher::new(
        strategy_fetcher(fetcher.clone(), cache.clone()),
        cache,
        quota.clone(),
    );

    let mut profile = ArtistProfile::new("ArtistX");
    profile.instagram_handle = Some("artistx".to_string());
    let cancel = CancellationToken::new();

    let first = instagram.enrich(&profile, &cancel).await.unwrap();
    let SourceOutcome::Instagram(data) = first else {
        panic!("wrong outcome variant");
    };
    assert_eq!(data.followers, Some(12_345));
    assert_eq!(quota.remaining(), 0);

    // Second enrichment hits the instagram.profile cache: no budget, no
    // fetch needed.
    let second = instagram.enrich(&profile, &cancel).await.unwrap();
    assert!(matches!(second, SourceOutcome::Instagram(_)));
}
