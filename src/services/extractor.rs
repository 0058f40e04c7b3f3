//! Artist identity extraction: canonical names from titles, social links
//! and contact addresses from descriptions and about pages.
//!
//! Everything here is deterministic regex work; no language model sits in
//! this path.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::models::{SocialLinks, SocialPlatform};
use crate::services::title_filter::split_artist_song;

/// Separators that introduce featured artists. Applied left-to-right; the
/// leftmost token group survives.
static FEATURE_SPLIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s+(?:feat\.|featuring|ft\.|&|\+|and|x|vs\.?|with|w/)\s+|\s*,\s*",
    )
    .expect("feature split pattern")
});

/// Bare URLs inside free text or HTML attributes.
static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^\s"'<>\\)\]]+"#).expect("url pattern")
});

/// Redirect envelopes wrapping outbound links on the search surface.
static REDIRECT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^\s"'<>]*/redirect\?[^\s"'<>]+"#).expect("redirect pattern")
});

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email pattern")
});

/// Names that are search-surface furniture, not artists.
const NAME_BLOCKLIST: [&str; 3] = ["various artists", "vevo", "topic"];

/// Path segments that mark a platform URL as generic rather than a
/// profile.
const GENERIC_PATH_SEGMENTS: [&str; 16] = [
    "home", "explore", "login", "signup", "about", "legal", "privacy", "terms", "search",
    "share", "directory", "discover", "redirect", "watch", "results", "feed",
];

/// Deterministic identity extraction.
#[derive(Debug, Clone, Default)]
pub struct ArtistExtractor;

impl ArtistExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Canonical artist name from an accepted title, or `None` when the
    /// left side is unusable.
    pub fn artist_name(&self, title: &str) -> Option<String> {
        let raw = match split_artist_song(title) {
            Some((left, _)) => left,
            // Titles like `A (Official …)` carry the artist before the
            // bracket.
            None => title
                .split(['(', '['])
                .next()
                .unwrap_or(title)
                .trim(),
        };

        let unquoted = raw
            .trim()
            .trim_matches(|c| c == '"' || c == '\'' || c == '\u{201c}' || c == '\u{201d}')
            .trim();

        let leftmost = FEATURE_SPLIT
            .split(unquoted)
            .next()
            .unwrap_or(unquoted)
            .trim()
            .to_string();

        if leftmost.is_empty() || !leftmost.chars().any(|c| c.is_alphanumeric()) {
            return None;
        }
        let folded = leftmost.to_lowercase();
        if NAME_BLOCKLIST.iter().any(|blocked| folded == *blocked) {
            return None;
        }
        Some(leftmost)
    }

    /// Decode a redirect envelope into the wrapped target URL.
    pub fn decode_redirect(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        if !parsed.path().ends_with("/redirect") {
            return None;
        }
        parsed
            .query_pairs()
            .find(|(key, _)| key == "q")
            .map(|(_, value)| value.into_owned())
    }

    /// Mine social links from description or about-page HTML: decode
    /// redirect envelopes, collect bare URLs, bucket by platform.
    pub fn social_links(&self, text: &str) -> SocialLinks {
        let mut pool: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for envelope in REDIRECT_PATTERN.find_iter(text) {
            if let Some(target) = self.decode_redirect(envelope.as_str()) {
                if seen.insert(target.clone()) {
                    pool.push(target);
                }
            }
        }
        for bare in URL_PATTERN.find_iter(text) {
            let url = bare.as_str().trim_end_matches(['.', ',', ';']).to_string();
            if seen.insert(url.clone()) {
                pool.push(url);
            }
        }

        let mut links = SocialLinks::default();
        for url in &pool {
            if let Some((platform, canonical)) = self.bucket(url) {
                links.fill(platform, canonical);
            }
        }
        links
    }

    /// Mine the first email address out of free text.
    pub fn email(&self, text: &str) -> Option<String> {
        EMAIL_PATTERN
            .find(text)
            .map(|m| m.as_str().to_lowercase())
    }

    /// Extract the handle a platform profile URL points at.
    pub fn handle_from_url(&self, platform: SocialPlatform, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
        let first = segments.next()?;
        let handle = match platform {
            SocialPlatform::Tiktok => first.strip_prefix('@')?.to_string(),
            SocialPlatform::Instagram | SocialPlatform::Twitter | SocialPlatform::Facebook => {
                first.to_string()
            }
            SocialPlatform::Spotify => {
                // open.spotify.com/artist/<id>
                if first != "artist" {
                    return None;
                }
                segments.next()?.to_string()
            }
            SocialPlatform::Youtube | SocialPlatform::Website => return None,
        };
        if handle.is_empty() || self.is_generic_segment(&handle) {
            return None;
        }
        Some(handle)
    }

    fn is_generic_segment(&self, segment: &str) -> bool {
        let folded = segment.to_lowercase();
        GENERIC_PATH_SEGMENTS.iter().any(|g| folded == *g)
    }

    fn bucket(&self, url: &str) -> Option<(SocialPlatform, String)> {
        let parsed = Url::parse(url).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }
        let host = parsed.host_str()?.trim_start_matches("www.").to_lowercase();

        let first_segment = parsed
            .path_segments()
            .and_then(|mut segments| segments.find(|s| !s.is_empty()).map(str::to_string));

        let platform = match host.as_str() {
            "open.spotify.com" | "spotify.com" => SocialPlatform::Spotify,
            "instagram.com" => SocialPlatform::Instagram,
            "tiktok.com" => SocialPlatform::Tiktok,
            "twitter.com" | "x.com" => SocialPlatform::Twitter,
            "facebook.com" => SocialPlatform::Facebook,
            "youtube.com" | "youtu.be" | "music.youtube.com" => SocialPlatform::Youtube,
            _ => {
                // Anything else with a resolvable host is a website
                // candidate.
                return Some((SocialPlatform::Website, url.to_string()));
            }
        };

        // A platform root or a generic section is not a profile link.
        let segment = first_segment?;
        if self.is_generic_segment(&segment) {
            return None;
        }
        Some((platform, url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Drake ft. Future - Life Is Good (Official Music Video)", Some("Drake"))]
    #[case("Alice - Song (Official Music Video)", Some("Alice"))]
    #[case("Bob feat. Carol - Hit (Official Music Video)", Some("Bob"))]
    #[case("A & B - Duet (Official Video)", Some("A"))]
    #[case("Halsey, Benny - Track (Official Video)", Some("Halsey"))]
    #[case("Kid x Dude - Jam (Official Video)", Some("Kid"))]
    #[case("\"Quoted\" - Song (Official Video)", Some("Quoted"))]
    #[case("Mallory (Official Audio)", Some("Mallory"))]
    #[case("Vevo - Playlist (Official Video)", None)]
    #[case("!!! - ??? (Official Video)", None)]
    fn name_extraction(#[case] title: &str, #[case] expected: Option<&str>) {
        assert_eq!(
            ArtistExtractor::new().artist_name(title).as_deref(),
            expected,
            "{title}"
        );
    }

    #[test]
    fn xylophone_artists_survive_the_x_separator() {
        // `x` splits only as a standalone separator token.
        assert_eq!(
            ArtistExtractor::new()
                .artist_name("Xavier - Song (Official Video)")
                .as_deref(),
            Some("Xavier")
        );
    }

    #[test]
    fn redirect_envelope_decodes_to_target() {
        let extractor = ArtistExtractor::new();
        let decoded = extractor.decode_redirect(
            "https://www.youtube.com/redirect?event=video_description&q=https%3A%2F%2Fwww.instagram.com%2Fartistx",
        );
        assert_eq!(decoded.as_deref(), Some("https://www.instagram.com/artistx"));
        assert_eq!(
            extractor.decode_redirect("https://www.youtube.com/watch?v=abcdefghijk"),
            None
        );
    }

    #[test]
    fn social_links_from_redirect_and_bare_urls() {
        let extractor = ArtistExtractor::new();
        let text = concat!(
            "follow me https://www.youtube.com/redirect?event=video_description&",
            "q=https%3A%2F%2Fwww.instagram.com%2Fartistx ",
            "and https://tiktok.com/@artistx plus https://artistx.example.com/music"
        );
        let links = extractor.social_links(text);
        assert_eq!(
            links.instagram.as_deref(),
            Some("https://www.instagram.com/artistx")
        );
        assert_eq!(links.tiktok.as_deref(), Some("https://tiktok.com/@artistx"));
        assert_eq!(
            links.website.as_deref(),
            Some("https://artistx.example.com/music")
        );
    }

    #[test]
    fn generic_platform_pages_are_not_profiles() {
        let extractor = ArtistExtractor::new();
        let links = extractor.social_links(
            "https://www.instagram.com/explore https://instagram.com/ https://twitter.com/login",
        );
        assert!(links.instagram.is_none());
        assert!(links.twitter.is_none());
    }

    #[test]
    fn handles_extracted_per_platform() {
        let extractor = ArtistExtractor::new();
        assert_eq!(
            extractor
                .handle_from_url(SocialPlatform::Instagram, "https://instagram.com/artistx")
                .as_deref(),
            Some("artistx")
        );
        assert_eq!(
            extractor
                .handle_from_url(SocialPlatform::Tiktok, "https://tiktok.com/@artistx")
                .as_deref(),
            Some("artistx")
        );
        assert_eq!(
            extractor
                .handle_from_url(
                    SocialPlatform::Spotify,
                    "https://open.spotify.com/artist/4Z8W4fKeB5YxbusRsdQVPb"
                )
                .as_deref(),
            Some("4Z8W4fKeB5YxbusRsdQVPb")
        );
        assert_eq!(
            extractor.handle_from_url(SocialPlatform::Instagram, "https://instagram.com/"),
            None
        );
    }

    #[test]
    fn email_mining() {
        let extractor = ArtistExtractor::new();
        assert_eq!(
            extractor
                .email("booking: Artist.Mgmt+book@Example.COM for shows")
                .as_deref(),
            Some("artist.mgmt+book@example.com")
        );
        assert_eq!(extractor.email("no contact here"), None);
    }
}
