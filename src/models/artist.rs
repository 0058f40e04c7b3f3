//! Artist profiles, social identities and fingerprints.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caps applied when merging enrichment results.
pub const MAX_GENRES: usize = 10;
pub const MAX_LYRIC_THEMES: usize = 8;

/// Social platforms a discovered link can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialPlatform {
    Spotify,
    Instagram,
    Tiktok,
    Twitter,
    Facebook,
    Youtube,
    Website,
}

impl SocialPlatform {
    pub const ALL: [SocialPlatform; 7] = [
        SocialPlatform::Spotify,
        SocialPlatform::Instagram,
        SocialPlatform::Tiktok,
        SocialPlatform::Twitter,
        SocialPlatform::Facebook,
        SocialPlatform::Youtube,
        SocialPlatform::Website,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SocialPlatform::Spotify => "spotify",
            SocialPlatform::Instagram => "instagram",
            SocialPlatform::Tiktok => "tiktok",
            SocialPlatform::Twitter => "twitter",
            SocialPlatform::Facebook => "facebook",
            SocialPlatform::Youtube => "youtube",
            SocialPlatform::Website => "website",
        }
    }
}

/// Per-platform profile URLs mined from descriptions and about pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialLinks {
    pub spotify: Option<String>,
    pub instagram: Option<String>,
    pub tiktok: Option<String>,
    pub twitter: Option<String>,
    pub facebook: Option<String>,
    pub youtube: Option<String>,
    pub website: Option<String>,
}

impl SocialLinks {
    pub fn get(&self, platform: SocialPlatform) -> Option<&str> {
        match platform {
            SocialPlatform::Spotify => self.spotify.as_deref(),
            SocialPlatform::Instagram => self.instagram.as_deref(),
            SocialPlatform::Tiktok => self.tiktok.as_deref(),
            SocialPlatform::Twitter => self.twitter.as_deref(),
            SocialPlatform::Facebook => self.facebook.as_deref(),
            SocialPlatform::Youtube => self.youtube.as_deref(),
            SocialPlatform::Website => self.website.as_deref(),
        }
    }

    /// Set a link only when the slot is currently empty.
    pub fn fill(&mut self, platform: SocialPlatform, url: impl Into<String>) {
        let slot = match platform {
            SocialPlatform::Spotify => &mut self.spotify,
            SocialPlatform::Instagram => &mut self.instagram,
            SocialPlatform::Tiktok => &mut self.tiktok,
            SocialPlatform::Twitter => &mut self.twitter,
            SocialPlatform::Facebook => &mut self.facebook,
            SocialPlatform::Youtube => &mut self.youtube,
            SocialPlatform::Website => &mut self.website,
        };
        if slot.is_none() {
            *slot = Some(url.into());
        }
    }

    /// Absorb every link the other set carries, keeping existing entries.
    pub fn merge_missing(&mut self, other: &SocialLinks) {
        for platform in SocialPlatform::ALL {
            if let Some(url) = other.get(platform) {
                self.fill(platform, url);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        SocialPlatform::ALL.iter().all(|p| self.get(*p).is_none())
    }
}

/// Follower/listener counts per platform. Counts only ever grow during a
/// merge (monotonic growth model).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowerCounts {
    pub youtube_subscribers: Option<u64>,
    pub spotify_followers: Option<u64>,
    pub spotify_monthly_listeners: Option<u64>,
    pub instagram_followers: Option<u64>,
    pub tiktok_followers: Option<u64>,
    pub tiktok_likes: Option<u64>,
}

impl FollowerCounts {
    /// Element-wise maximum; a present value always beats an absent one.
    pub fn merge_max(&mut self, other: &FollowerCounts) {
        fn pick(current: &mut Option<u64>, incoming: Option<u64>) {
            if let Some(new) = incoming {
                match current {
                    Some(old) if *old >= new => {}
                    _ => *current = Some(new),
                }
            }
        }
        pick(&mut self.youtube_subscribers, other.youtube_subscribers);
        pick(&mut self.spotify_followers, other.spotify_followers);
        pick(
            &mut self.spotify_monthly_listeners,
            other.spotify_monthly_listeners,
        );
        pick(&mut self.instagram_followers, other.instagram_followers);
        pick(&mut self.tiktok_followers, other.tiktok_followers);
        pick(&mut self.tiktok_likes, other.tiktok_likes);
    }
}

/// Canonical normalization used for name-based identity: case-fold, strip
/// non-alphanumeric, collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
}

/// Deterministic identity string for an artist.
///
/// Strong identifiers are joined in priority order; a profile with no
/// strong identifier falls back to its normalized name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The individual identity keys this fingerprint is built from.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.split('|')
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A mutable artist profile moving through the pipeline. Created at
/// extraction, mutated only by enrichment merges, frozen before scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtistProfile {
    pub id: Uuid,
    /// Canonicalized name with featured artists stripped.
    pub name: String,
    pub youtube_channel_id: Option<String>,
    pub youtube_channel_url: Option<String>,
    pub spotify_id: Option<String>,
    pub instagram_handle: Option<String>,
    pub tiktok_handle: Option<String>,
    pub social_links: SocialLinks,
    /// First-seen order preserved, capped at [`MAX_GENRES`].
    pub genres: Vec<String>,
    pub bio: Option<String>,
    pub follower_counts: FollowerCounts,
    pub location: Option<String>,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
    /// Capped at [`MAX_LYRIC_THEMES`].
    pub lyric_themes: Vec<String>,
    /// Pure function of the frozen profile, in [0, 1].
    pub enrichment_score: f64,
    /// The candidate video this profile was extracted from.
    pub source_video_id: Option<String>,
}

impl ArtistProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            youtube_channel_id: None,
            youtube_channel_url: None,
            spotify_id: None,
            instagram_handle: None,
            tiktok_handle: None,
            social_links: SocialLinks::default(),
            genres: Vec::new(),
            bio: None,
            follower_counts: FollowerCounts::default(),
            location: None,
            avatar_url: None,
            email: None,
            lyric_themes: Vec::new(),
            enrichment_score: 0.0,
            source_video_id: None,
        }
    }

    /// The identity keys this profile exposes, strongest first.
    pub fn identity_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if let Some(id) = &self.youtube_channel_id {
            keys.push(format!("yt:{id}"));
        }
        if let Some(id) = &self.spotify_id {
            keys.push(format!("sp:{id}"));
        }
        if let Some(handle) = &self.instagram_handle {
            keys.push(format!("ig:{}", handle.to_lowercase()));
        }
        if let Some(handle) = &self.tiktok_handle {
            keys.push(format!("tt:{}", handle.to_lowercase()));
        }
        keys
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let keys = self.identity_keys();
        if keys.is_empty() {
            Fingerprint(format!("name:{}", normalize_name(&self.name)))
        } else {
            Fingerprint(keys.join("|"))
        }
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// Append genres in first-seen order up to the cap, skipping repeats.
    pub fn extend_genres<I: IntoIterator<Item = String>>(&mut self, genres: I) {
        for genre in genres {
            if self.genres.len() >= MAX_GENRES {
                break;
            }
            let genre = genre.trim().to_lowercase();
            if !genre.is_empty() && !self.genres.contains(&genre) {
                self.genres.push(genre);
            }
        }
    }

    /// Insert-or-merge semantics used by stores: identifiers and text
    /// fill only when empty, counts and score grow monotonically, set
    /// fields union under their caps.
    pub fn merge_from(&mut self, other: &ArtistProfile) {
        fn fill(slot: &mut Option<String>, value: &Option<String>) {
            if slot.is_none() {
                if let Some(v) = value {
                    if !v.trim().is_empty() {
                        *slot = Some(v.clone());
                    }
                }
            }
        }
        fill(&mut self.youtube_channel_id, &other.youtube_channel_id);
        fill(&mut self.youtube_channel_url, &other.youtube_channel_url);
        fill(&mut self.spotify_id, &other.spotify_id);
        fill(&mut self.instagram_handle, &other.instagram_handle);
        fill(&mut self.tiktok_handle, &other.tiktok_handle);
        fill(&mut self.bio, &other.bio);
        fill(&mut self.location, &other.location);
        fill(&mut self.avatar_url, &other.avatar_url);
        fill(&mut self.email, &other.email);
        self.social_links.merge_missing(&other.social_links);
        self.follower_counts.merge_max(&other.follower_counts);
        self.extend_genres(other.genres.iter().cloned());
        self.extend_lyric_themes(other.lyric_themes.iter().cloned());
        if other.enrichment_score > self.enrichment_score {
            self.enrichment_score = other.enrichment_score;
        }
    }

    /// Append lyric themes in first-seen order up to the cap.
    pub fn extend_lyric_themes<I: IntoIterator<Item = String>>(&mut self, themes: I) {
        for theme in themes {
            if self.lyric_themes.len() >= MAX_LYRIC_THEMES {
                break;
            }
            let theme = theme.trim().to_string();
            if !theme.is_empty() && !self.lyric_themes.contains(&theme) {
                self.lyric_themes.push(theme);
            }
        }
    }
}
