//! Lyrics enrichment worker.
//!
//! Fetches lyrics pages for an artist's top songs, normalizes the page
//! to a single lyrics string and hands it to the analyzer. Which lyrics
//! site backs the slugs is a constructor parameter; the default targets
//! a `<base>/<artist>-<title>-lyrics` page shape that serves HTML to the
//! plain-HTTP strategy.

use std::sync::Arc;
use std::time::Duration;

use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;

use crate::error::{DiscoveryError, Result};
use crate::ports::Analyzer;
use crate::services::enrichment::{LyricsData, SourceOutcome};
use crate::services::quota::QuotaLimiter;
use crate::services::strategy_fetcher::{FetchHints, StrategyFetcher};

const DEFAULT_SITE_BASE: &str = "https://genius.com";
/// Songs analyzed per artist.
const MAX_SONGS: usize = 3;

/// Build the `<artist>-<title>-lyrics` page slug.
pub(crate) fn lyrics_slug(artist: &str, title: &str) -> String {
    let slugify = |text: &str| {
        text.to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect::<String>()
            .split('-')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-")
    };
    format!("{}-{}-lyrics", slugify(artist), slugify(title))
}

/// Reduce a lyrics page to one text blob.
pub(crate) fn extract_lyrics_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let container_selector =
        Selector::parse(r#"[data-lyrics-container], .lyrics, [class*="Lyrics__Container"]"#)
            .expect("lyrics selector");

    let mut text: String = document
        .select(&container_selector)
        .flat_map(|el| el.text())
        .collect::<Vec<_>>()
        .join("\n");

    if text.trim().is_empty() {
        // Fallback: paragraph text for plainer lyric sites.
        let p_selector = Selector::parse("p").expect("p selector");
        text = document
            .select(&p_selector)
            .flat_map(|el| el.text())
            .collect::<Vec<_>>()
            .join("\n");
    }

    let cleaned = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if cleaned.len() < 40 {
        return None;
    }
    Some(cleaned)
}

/// Lyrics source worker. Runs after the Spotify wave because it consumes
/// its track titles.
pub struct LyricsEnricher {
    fetcher: Arc<StrategyFetcher>,
    analyzer: Arc<dyn Analyzer>,
    quota: QuotaLimiter,
    site_base: String,
}

impl LyricsEnricher {
    pub fn new(
        fetcher: Arc<StrategyFetcher>,
        analyzer: Arc<dyn Analyzer>,
        quota: QuotaLimiter,
    ) -> Self {
        Self::with_site(fetcher, analyzer, quota, DEFAULT_SITE_BASE)
    }

    pub fn with_site(
        fetcher: Arc<StrategyFetcher>,
        analyzer: Arc<dyn Analyzer>,
        quota: QuotaLimiter,
        site_base: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            analyzer,
            quota,
            site_base: site_base.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        "lyrics"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Analyze up to [`MAX_SONGS`] of the given titles. Per-song failures
    /// are skipped; the source fails only when nothing was analyzable.
    pub async fn enrich_songs(
        &self,
        artist: &str,
        titles: &[String],
        cancel: &CancellationToken,
    ) -> Result<SourceOutcome> {
        let mut analyses = Vec::new();
        let mut last_error: Option<DiscoveryError> = None;

        for title in titles.iter().take(MAX_SONGS) {
            if cancel.is_cancelled() {
                return Err(DiscoveryError::Cancelled);
            }
            match self.analyze_song(artist, title, cancel).await {
                Ok(analysis) => analyses.push(analysis),
                Err(e) => {
                    tracing::debug!(artist, title, error = %e, "song analysis failed");
                    last_error = Some(e);
                }
            }
        }

        if analyses.is_empty() {
            return Err(last_error.unwrap_or(DiscoveryError::NotFound {
                resource: format!("lyrics for {artist:?}"),
            }));
        }
        Ok(SourceOutcome::Lyrics(LyricsData { analyses }))
    }

    async fn analyze_song(
        &self,
        artist: &str,
        title: &str,
        cancel: &CancellationToken,
    ) -> Result<crate::models::LyricAnalysis> {
        let url = format!("{}/{}", self.site_base, lyrics_slug(artist, title));
        let document = self.fetcher.fetch(&url, FetchHints::default(), cancel).await?;
        let text = extract_lyrics_text(&document.html).ok_or_else(|| {
            DiscoveryError::data_quality(format!("no lyrics text on {url}"))
        })?;

        if !self.quota.try_acquire("analyzer.lyrics", 1) {
            return Err(DiscoveryError::RateLimited { retry_after: None });
        }
        let analysis = self.analyzer.analyze_lyrics(&text, None).await?;
        Ok(analysis.sanitized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_url_safe_and_stable() {
        assert_eq!(
            lyrics_slug("Drake", "Life Is Good"),
            "drake-life-is-good-lyrics"
        );
        assert_eq!(
            lyrics_slug("A$AP Rocky", "L$D (Remix)"),
            "a-ap-rocky-l-d-remix-lyrics"
        );
        assert_eq!(lyrics_slug("Drake", "Life Is Good"), lyrics_slug("Drake", "Life Is Good"));
    }

    #[test]
    fn extracts_container_text() {
        let html = concat!(
            "<html><body>",
            "<div data-lyrics-container=\"true\">first line<br>second line about love and loss</div>",
            "<div data-lyrics-container=\"true\">third line with more words</div>",
            "</body></html>"
        );
        let text = extract_lyrics_text(html).unwrap();
        assert!(text.contains("first line"));
        assert!(text.contains("third line"));
    }

    #[test]
    fn falls_back_to_paragraphs() {
        let html = "<html><body><p>a fairly long lyrics paragraph that clears the minimum length bar</p></body></html>";
        assert!(extract_lyrics_text(html).is_some());
    }

    #[test]
    fn short_or_empty_pages_yield_nothing() {
        assert!(extract_lyrics_text("<html><body><p>too short</p></body></html>").is_none());
        assert!(extract_lyrics_text("<html></html>").is_none());
    }
}
