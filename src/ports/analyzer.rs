//! Analyzer port: lyric text analysis.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::LyricAnalysis;

/// Text-analysis collaborator. Must be deterministic for a given text up
/// to rounding.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze_lyrics(
        &self,
        text: &str,
        language_hint: Option<&str>,
    ) -> Result<LyricAnalysis>;
}
