//! Deterministic enrichment scoring.
//!
//! `score` is a pure function of a frozen profile: the same profile
//! always produces the same value, and the result stays inside [0, 1].

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::models::ArtistProfile;

static EMAIL_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email shape"));

/// Minimum bio length (after trimming) that counts as a real bio.
const BIO_MIN_CHARS: usize = 50;
/// Follower threshold for the presence bonuses.
const FOLLOWER_BONUS_THRESHOLD: u64 = 1000;

/// Component weights. They sum to 1; bonuses ride on top, capped.
const WEIGHT_YOUTUBE_ID: f64 = 0.10;
const WEIGHT_INSTAGRAM_HANDLE: f64 = 0.15;
const WEIGHT_SPOTIFY_ID: f64 = 0.15;
const WEIGHT_EMAIL: f64 = 0.20;
const WEIGHT_WEBSITE: f64 = 0.10;
const WEIGHT_GENRES: f64 = 0.10;
const WEIGHT_BIO: f64 = 0.10;
const WEIGHT_AVATAR: f64 = 0.05;
const WEIGHT_LYRIC_THEMES: f64 = 0.05;
const BONUS_FOLLOWERS: f64 = 0.05;

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn is_wellformed_email(value: &Option<String>) -> bool {
    value
        .as_deref()
        .is_some_and(|v| EMAIL_SHAPE.is_match(v.trim()))
}

fn is_absolute_url(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        Url::parse(v)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false)
    })
}

/// Score a frozen profile into [0, 1].
pub fn score(profile: &ArtistProfile) -> f64 {
    let mut total = 0.0;

    if has_text(&profile.youtube_channel_id) {
        total += WEIGHT_YOUTUBE_ID;
    }
    if has_text(&profile.instagram_handle) {
        total += WEIGHT_INSTAGRAM_HANDLE;
    }
    if has_text(&profile.spotify_id) {
        total += WEIGHT_SPOTIFY_ID;
    }
    if is_wellformed_email(&profile.email) {
        total += WEIGHT_EMAIL;
    }
    if is_absolute_url(profile.social_links.website.as_deref()) {
        total += WEIGHT_WEBSITE;
    }
    if !profile.genres.is_empty() {
        total += WEIGHT_GENRES;
    }
    if profile
        .bio
        .as_deref()
        .is_some_and(|bio| bio.trim().chars().count() > BIO_MIN_CHARS)
    {
        total += WEIGHT_BIO;
    }
    if has_text(&profile.avatar_url) {
        total += WEIGHT_AVATAR;
    }
    if !profile.lyric_themes.is_empty() {
        total += WEIGHT_LYRIC_THEMES;
    }

    if profile
        .follower_counts
        .instagram_followers
        .is_some_and(|count| count > FOLLOWER_BONUS_THRESHOLD)
    {
        total += BONUS_FOLLOWERS;
    }
    if profile
        .follower_counts
        .spotify_followers
        .is_some_and(|count| count > FOLLOWER_BONUS_THRESHOLD)
    {
        total += BONUS_FOLLOWERS;
    }

    total.min(1.0)
}
