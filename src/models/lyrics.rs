//! Lyric analysis results produced by the analyzer port.

use serde::{Deserialize, Serialize};

/// Per-song analysis. `sentiment` is in [-1, 1]; `language` is an
/// ISO-639-1 code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyricAnalysis {
    pub themes: Vec<String>,
    pub sentiment: f32,
    pub language: String,
}

impl LyricAnalysis {
    /// Clamp out-of-range analyzer output instead of propagating it.
    pub fn sanitized(mut self) -> Self {
        self.sentiment = self.sentiment.clamp(-1.0, 1.0);
        self.themes.truncate(crate::models::MAX_LYRIC_THEMES);
        self
    }
}
