//! Candidate videos extracted from a search surface.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// The id grammars a video URL can carry. Watch pages, short links and
/// shorts all embed the same 11-character token.
static VIDEO_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"watch\?v=([A-Za-z0-9_-]{11})").expect("video id pattern"),
        Regex::new(r"youtu\.be/([A-Za-z0-9_-]{11})").expect("video id pattern"),
        Regex::new(r"/shorts/([A-Za-z0-9_-]{11})").expect("video id pattern"),
    ]
});

/// Extract the 11-character video id from any supported URL form.
pub fn extract_video_id(url: &str) -> Option<String> {
    VIDEO_ID_PATTERNS
        .iter()
        .find_map(|re| re.captures(url))
        .map(|caps| caps[1].to_string())
}

/// A search-result item that passed DOM extraction but no semantic
/// filtering yet. Two candidates with equal `video_id` are duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateVideo {
    pub video_id: String,
    pub url: String,
    pub title: String,
    pub channel_id: Option<String>,
    pub channel_url: Option<String>,
    pub description_snippet: Option<String>,
    pub view_count: Option<u64>,
    pub upload_hint: Option<String>,
}

impl CandidateVideo {
    /// Build a candidate from a watch URL, deriving the video id.
    pub fn from_url(url: impl Into<String>, title: impl Into<String>) -> Option<Self> {
        let url = url.into();
        let video_id = extract_video_id(&url)?;
        Some(Self {
            video_id,
            url,
            title: title.into(),
            channel_id: None,
            channel_url: None,
            description_snippet: None,
            view_count: None,
            upload_hint: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_id_from_all_url_forms() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=abc",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
        ] {
            assert_eq!(extract_video_id(url).as_deref(), Some("dQw4w9WgXcQ"), "{url}");
        }
    }

    #[test]
    fn rejects_malformed_ids() {
        assert_eq!(extract_video_id("https://www.youtube.com/watch?v=short"), None);
        assert_eq!(extract_video_id("https://example.com/page"), None);
    }

    #[test]
    fn candidate_derives_id_from_url() {
        let video =
            CandidateVideo::from_url("https://www.youtube.com/watch?v=abcdefghijk", "Title")
                .unwrap();
        assert_eq!(video.video_id, "abcdefghijk");
    }
}
