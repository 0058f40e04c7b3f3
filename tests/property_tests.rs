//! Property tests for the pipeline's core invariants.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;

use music_discovery_backend::models::{ArtistProfile, FollowerCounts};
use music_discovery_backend::services::enrichment::{
    apply_outcome, InstagramData, SourceOutcome, TiktokData,
};
use music_discovery_backend::services::extractor::ArtistExtractor;
use music_discovery_backend::services::title_filter::TitleFilter;
use music_discovery_backend::services::{scorer, DedupOutcome, Deduplicator};
use music_discovery_backend::store::InMemoryStore;

fn artist_name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9]{0,8}( [A-Za-z0-9]{1,8}){0,2}"
}

/// Single-token artist names free of featured-artist separators and
/// blocklist words, for the title round-trip property.
fn clean_artist_name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9]{0,10}".prop_filter("reserved word", |name| {
        let folded = name.to_lowercase();
        !["vevo", "topic", "and", "x", "with", "feat", "ft"].contains(&folded.as_str())
    })
}

fn song_title() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 ]{0,14}"
}

prop_compose! {
    fn optional_id(prefix: &'static str)(present in any::<bool>(), id in "[a-z0-9]{4,10}") -> Option<String> {
        present.then(|| format!("{prefix}{id}"))
    }
}

prop_compose! {
    fn arb_profile()(
        name in artist_name(),
        youtube in optional_id("UC"),
        spotify in optional_id("sp"),
        instagram in optional_id("ig"),
        tiktok in optional_id("tt"),
        genres in proptest::collection::vec("[a-z]{3,8}", 0..4),
        bio in proptest::option::of("[a-z ]{10,80}"),
        email in proptest::option::of("[a-z]{3,8}@[a-z]{3,8}\\.com"),
        ig_followers in proptest::option::of(0u64..5_000_000),
        sp_followers in proptest::option::of(0u64..5_000_000),
    ) -> ArtistProfile {
        let mut profile = ArtistProfile::new(name);
        profile.youtube_channel_id = youtube;
        profile.spotify_id = spotify;
        profile.instagram_handle = instagram;
        profile.tiktok_handle = tiktok;
        profile.extend_genres(genres);
        profile.bio = bio;
        profile.email = email;
        profile.follower_counts.instagram_followers = ig_followers;
        profile.follower_counts.spotify_followers = sp_followers;
        profile
    }
}

prop_compose! {
    fn arb_counts()(
        youtube in proptest::option::of(0u64..10_000_000),
        spotify in proptest::option::of(0u64..10_000_000),
        monthly in proptest::option::of(0u64..10_000_000),
        instagram in proptest::option::of(0u64..10_000_000),
        tiktok in proptest::option::of(0u64..10_000_000),
        likes in proptest::option::of(0u64..10_000_000),
    ) -> FollowerCounts {
        FollowerCounts {
            youtube_subscribers: youtube,
            spotify_followers: spotify,
            spotify_monthly_listeners: monthly,
            instagram_followers: instagram,
            tiktok_followers: tiktok,
            tiktok_likes: likes,
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Deduplication soundness: profiles registered Fresh have pairwise
    /// distinct fingerprints.
    #[test]
    fn dedup_soundness(profiles in proptest::collection::vec(arb_profile(), 1..20)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let dedup = Deduplicator::new(Arc::new(InMemoryStore::new()));
            let mut fresh_fingerprints = HashSet::new();
            for profile in &profiles {
                if let DedupOutcome::Fresh = dedup.check_and_register(profile).await.unwrap() {
                    let fingerprint = profile.fingerprint().to_string();
                    prop_assert!(
                        fresh_fingerprints.insert(fingerprint.clone()),
                        "duplicate fingerprint registered as fresh: {fingerprint}"
                    );
                }
            }
            Ok(())
        })?;
    }

    /// Merge monotonicity: applying two enrichment results in either
    /// order yields the element-wise max of all counts.
    #[test]
    fn merge_monotonicity(base in arb_counts(), a in arb_counts(), b in arb_counts()) {
        let outcome_a = SourceOutcome::Instagram(InstagramData {
            followers: a.instagram_followers,
            ..InstagramData::default()
        });
        let outcome_b = SourceOutcome::Tiktok(TiktokData {
            followers: b.tiktok_followers,
            likes: b.tiktok_likes,
            ..TiktokData::default()
        });

        let mut left = ArtistProfile::new("x");
        left.follower_counts = base;
        let mut right = left.clone();

        apply_outcome(&mut left, &outcome_a);
        apply_outcome(&mut left, &outcome_b);
        apply_outcome(&mut right, &outcome_b);
        apply_outcome(&mut right, &outcome_a);

        prop_assert_eq!(left.follower_counts, right.follower_counts);

        let max = |x: Option<u64>, y: Option<u64>| match (x, y) {
            (Some(x), Some(y)) => Some(x.max(y)),
            (x, y) => x.or(y),
        };
        prop_assert_eq!(
            left.follower_counts.instagram_followers,
            max(base.instagram_followers, a.instagram_followers)
        );
        prop_assert_eq!(
            left.follower_counts.tiktok_followers,
            max(base.tiktok_followers, b.tiktok_followers)
        );
        prop_assert_eq!(
            left.follower_counts.tiktok_likes,
            max(base.tiktok_likes, b.tiktok_likes)
        );
    }

    /// Store-level merge is monotone as well.
    #[test]
    fn store_merge_monotonicity(base in arb_counts(), incoming in arb_counts()) {
        let mut target = ArtistProfile::new("x");
        target.follower_counts = base;
        let mut other = ArtistProfile::new("x");
        other.follower_counts = incoming;

        target.merge_from(&other);

        for (merged, (lhs, rhs)) in [
            (target.follower_counts.youtube_subscribers, (base.youtube_subscribers, incoming.youtube_subscribers)),
            (target.follower_counts.spotify_followers, (base.spotify_followers, incoming.spotify_followers)),
            (target.follower_counts.instagram_followers, (base.instagram_followers, incoming.instagram_followers)),
        ] {
            let expected = match (lhs, rhs) {
                (Some(x), Some(y)) => Some(x.max(y)),
                (x, y) => x.or(y),
            };
            prop_assert_eq!(merged, expected);
        }
    }

    /// Score bounds and determinism.
    #[test]
    fn score_bounds_and_determinism(profile in arb_profile()) {
        let first = scorer::score(&profile);
        prop_assert!((0.0..=1.0).contains(&first), "score {first} out of bounds");
        prop_assert_eq!(first, scorer::score(&profile));
    }

    /// Every title the gate accepts yields an extractable artist name.
    #[test]
    fn accepted_titles_are_extractable(
        artist in clean_artist_name(),
        song in song_title(),
        separator in prop::sample::select(vec![" - ", " | ", " : "]),
        marker in prop::sample::select(vec![
            "(Official Music Video)",
            "(Official Video)",
            "[Official MV]",
            "(Official Audio)",
            "official music video",
        ]),
        featured in proptest::option::of("[A-Za-z]{3,8}"),
    ) {
        let left = match &featured {
            Some(guest) => format!("{artist} ft. {guest}"),
            None => artist.clone(),
        };
        let title = format!("{left}{separator}{song} {marker}");

        let filter = TitleFilter::new();
        let extractor = ArtistExtractor::new();
        if filter.accepts(&title) {
            let extracted = extractor.artist_name(&title);
            prop_assert!(extracted.is_some(), "no artist from accepted title {title:?}");
            prop_assert_eq!(extracted.unwrap(), artist);
        }
    }

    /// Redirect decoding round-trip: links mined from the enveloped URL
    /// contain everything mined from the bare URL.
    #[test]
    fn redirect_round_trip(
        handle in "[a-z0-9_]{3,12}",
        host in prop::sample::select(vec![
            "https://www.instagram.com",
            "https://tiktok.com/@",
            "https://twitter.com",
            "https://open.spotify.com/artist",
        ]),
    ) {
        let url = if host.ends_with('@') {
            format!("{host}{handle}")
        } else {
            format!("{host}/{handle}")
        };
        let envelope = format!(
            "https://www.youtube.com/redirect?event=video_description&q={}",
            urlencoding::encode(&url)
        );

        let extractor = ArtistExtractor::new();
        let direct = extractor.social_links(&url);
        let via_redirect = extractor.social_links(&envelope);

        for platform in music_discovery_backend::models::SocialPlatform::ALL {
            if let Some(link) = direct.get(platform) {
                prop_assert_eq!(
                    via_redirect.get(platform),
                    Some(link),
                    "platform {:?} lost through the redirect envelope",
                    platform
                );
            }
        }
    }

    /// Harvester page parsing never yields the same video id twice once
    /// the per-harvest dedup is applied, and always terminates.
    #[test]
    fn harvest_emits_unique_ids(
        ids in proptest::collection::vec("[A-Za-z0-9_-]{11}", 1..15),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            use common::{pipeline, search_page, test_settings, FakeFetcher, PageEntry};
            use music_discovery_backend::models::SessionRequest;

            let leaked: Vec<&'static str> = ids
                .iter()
                .map(|id| Box::leak(id.clone().into_boxed_str()) as &'static str)
                .collect();
            let entries: Vec<PageEntry> = leaked
                .iter()
                .copied()
                .map(|id| {
                    PageEntry::new(
                        id,
                        Box::leak(
                            format!("Artist{id} - Song (Official Music Video)").into_boxed_str(),
                        ),
                    )
                })
                .collect();

            let fetcher = Arc::new(FakeFetcher::new());
            fetcher.add_page("/results?search_query=", search_page(&entries));

            let test = pipeline(fetcher, vec![], test_settings());
            let (_, events) = test
                .orchestrator
                .start_subscribed(SessionRequest::new("q").with_target(100))
                .unwrap();
            let events = events.collect().await;

            let mut seen = HashSet::new();
            for event in &events {
                if let music_discovery_backend::models::ProgressEvent::CandidateFound {
                    video_id,
                    ..
                } = event
                {
                    prop_assert!(
                        seen.insert(video_id.clone()),
                        "video id {video_id} emitted twice"
                    );
                }
            }
            Ok(())
        })?;
    }
}
