//! First gate: does a search-result title look like a music video?

use once_cell::sync::Lazy;
use regex::Regex;

/// Marker phrases that qualify a title on their own or together with a
/// structural artist-song pattern.
const STRONG_MARKER: &str = "official music video";
const WEAK_MARKERS: [&str; 4] = [
    "official video",
    "music video",
    "official mv",
    "official audio",
];

static PAREN_OFFICIAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*\S.*\(\s*official[^)]*\)").expect("paren pattern"));
static BRACKET_OFFICIAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*\S.*\[\s*official[^\]]*\]").expect("bracket pattern"));

/// Split at the first `-`, `|` or `:` that sits outside parentheses and
/// brackets. Returns trimmed sides when both are non-empty.
pub fn split_artist_song(title: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (idx, c) in title.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '-' | '|' | ':' if depth == 0 => {
                let left = title[..idx].trim();
                let right = title[idx + c.len_utf8()..].trim();
                if !left.is_empty() && !right.is_empty() {
                    return Some((left, right));
                }
                return None;
            }
            _ => {}
        }
    }
    None
}

/// Title acceptance gate.
///
/// Accepts iff the strong marker is present, or a weak marker is present
/// together with one of the structural patterns `A - B`, `A | B`, `A : B`,
/// `A (Official …)`, `A [Official …]`.
#[derive(Debug, Clone, Default)]
pub struct TitleFilter;

impl TitleFilter {
    pub fn new() -> Self {
        Self
    }

    pub fn accepts(&self, title: &str) -> bool {
        let folded = title.to_lowercase();
        if folded.contains(STRONG_MARKER) {
            return true;
        }
        if !WEAK_MARKERS.iter().any(|marker| folded.contains(marker)) {
            return false;
        }
        if split_artist_song(title).is_some() {
            return true;
        }
        PAREN_OFFICIAL.is_match(title) || BRACKET_OFFICIAL.is_match(title)
    }
}
