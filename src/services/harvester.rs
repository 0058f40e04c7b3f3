//! Candidate harvesting: scroll a search surface until enough new videos
//! stop appearing.
//!
//! The harvester owns one browser-like page session, scans the DOM after
//! every scroll, and emits newly seen candidates in DOM order through a
//! bounded channel. It terminates when the no-progress window closes, a
//! hard ceiling is hit, the budget gate denies another page, or the stop
//! signal fires. Two consecutive scroll errors end the harvest with
//! whatever was already emitted; that is not an error to the caller.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::DiscoverySettings;
use crate::models::{extract_video_id, CandidateVideo, SearchFilters, SessionCounters};
use crate::ports::{Fetcher, RenderOptions};
use crate::services::quota::SearchBudget;
use crate::services::search_url::SearchUrlComposer;

const CHANNEL_CAPACITY: usize = 32;

static VIEW_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\d][\d,.]*)\s*views").expect("view count pattern"));
static UPLOAD_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+\s+(?:second|minute|hour|day|week|month|year)s?\s+ago)\b")
        .expect("upload hint pattern")
});
static CHANNEL_HREF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/(?:channel/(UC[A-Za-z0-9_-]+)|(@[A-Za-z0-9._-]+))").expect("channel pattern")
});

/// Scroll-until-target candidate producer.
#[derive(Clone)]
pub struct Harvester {
    fetcher: Arc<dyn Fetcher>,
    composer: Arc<dyn SearchUrlComposer>,
    settings: DiscoverySettings,
}

impl Harvester {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        composer: Arc<dyn SearchUrlComposer>,
        settings: DiscoverySettings,
    ) -> Self {
        Self {
            fetcher,
            composer,
            settings,
        }
    }

    /// Start harvesting into a bounded, back-pressured channel. The
    /// returned receiver is the single consumer; dropping it stops the
    /// harvest.
    pub fn harvest(
        &self,
        query: &str,
        filters: &SearchFilters,
        max_candidates: usize,
        budget: Arc<SearchBudget>,
        counters: Arc<SessionCounters>,
        stop: CancellationToken,
    ) -> mpsc::Receiver<CandidateVideo> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let url = self.composer.compose(query, filters);
        let harvester = self.clone();

        tokio::spawn(async move {
            if let Err(e) = harvester
                .run(url, max_candidates, budget, counters, stop, tx)
                .await
            {
                tracing::warn!(error = %e, "harvest ended early");
            }
        });

        rx
    }

    async fn run(
        &self,
        url: String,
        max_candidates: usize,
        budget: Arc<SearchBudget>,
        counters: Arc<SessionCounters>,
        stop: CancellationToken,
        tx: mpsc::Sender<CandidateVideo>,
    ) -> crate::error::Result<()> {
        if !budget.admit("youtube.search") {
            tracing::info!("search budget denied before the first page");
            return Ok(());
        }

        let render_options = RenderOptions {
            settle: self.settings.harvest_settle,
            ..RenderOptions::default()
        };
        let mut session = tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            opened = self.fetcher.open_session(&render_options) => opened?,
        };
        let navigated = tokio::select! {
            _ = stop.cancelled() => {
                let _ = session.close().await;
                return Ok(());
            }
            navigated = session.navigate(&url) => navigated,
        };
        if let Err(e) = navigated {
            let _ = session.close().await;
            return Err(e);
        }

        let mut seen_ids: HashSet<String> = HashSet::new();
        // DOM scans see the whole page each pass; renderers before this
        // mark were already processed.
        let mut scanned = 0usize;
        let mut emitted = 0usize;
        let mut no_progress = 0u32;
        let mut consecutive_errors = 0u32;

        'harvest: loop {
            if stop.is_cancelled() {
                break;
            }

            let html = tokio::select! {
                _ = stop.cancelled() => break,
                html = session.html() => html,
            };
            let html = match html {
                Ok(html) => html,
                Err(e) => {
                    consecutive_errors += 1;
                    no_progress += 1;
                    tracing::debug!(error = %e, "page read failed");
                    if consecutive_errors >= 2
                        || no_progress >= self.settings.harvest_no_progress_limit
                    {
                        break;
                    }
                    continue;
                }
            };

            let mut new_this_pass = 0usize;
            for candidate in parse_candidates(&html).into_iter().skip(scanned) {
                scanned += 1;
                counters
                    .videos_seen
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                if seen_ids.len() >= self.settings.harvest_video_ceiling {
                    break 'harvest;
                }
                if !seen_ids.insert(candidate.video_id.clone()) {
                    continue;
                }
                new_this_pass += 1;

                tokio::select! {
                    _ = stop.cancelled() => break 'harvest,
                    sent = tx.send(candidate) => {
                        if sent.is_err() {
                            // Consumer hung up; nothing left to do.
                            break 'harvest;
                        }
                    }
                }
                emitted += 1;
                if emitted >= max_candidates {
                    break 'harvest;
                }
            }

            if new_this_pass > 0 {
                no_progress = 0;
            } else {
                no_progress += 1;
            }
            if no_progress >= self.settings.harvest_no_progress_limit {
                break;
            }

            if !budget.admit("youtube.search") {
                tracing::info!(emitted, "search budget exhausted mid-harvest");
                break;
            }
            let scrolled = tokio::select! {
                _ = stop.cancelled() => break,
                scrolled = session.scroll_once(self.settings.harvest_settle) => scrolled,
            };
            match scrolled {
                Ok(()) => consecutive_errors = 0,
                Err(e) => {
                    consecutive_errors += 1;
                    no_progress += 1;
                    tracing::debug!(error = %e, "scroll failed");
                    if consecutive_errors >= 2 {
                        break;
                    }
                }
            }
        }

        let _ = session.close().await;
        tracing::debug!(emitted, unique = seen_ids.len(), "harvest finished");
        Ok(())
    }
}

/// Scan a search-results document for video renderers, in DOM order.
///
/// Renderer containers are preferred because they carry the title,
/// channel and snippet together; a bare-anchor fallback still yields ids
/// and titles on unfamiliar markup.
pub fn parse_candidates(html: &str) -> Vec<CandidateVideo> {
    let document = Html::parse_document(html);

    let renderer_selector = Selector::parse(
        "ytd-video-renderer, ytd-rich-item-renderer, div.video-renderer, [data-video-renderer]",
    )
    .expect("renderer selector");
    let anchor_selector = Selector::parse("a[href]").expect("anchor selector");

    let renderers: Vec<ElementRef> = document.select(&renderer_selector).collect();
    if renderers.is_empty() {
        return document
            .select(&anchor_selector)
            .filter_map(candidate_from_anchor)
            .collect();
    }

    renderers
        .into_iter()
        .filter_map(|renderer| {
            let anchor = renderer.select(&anchor_selector).find(|a| {
                a.value()
                    .attr("href")
                    .and_then(extract_video_id)
                    .is_some()
            })?;
            let mut candidate = candidate_from_anchor(anchor)?;
            fill_renderer_details(renderer, &mut candidate);
            Some(candidate)
        })
        .collect()
}

fn candidate_from_anchor(anchor: ElementRef) -> Option<CandidateVideo> {
    let href = anchor.value().attr("href")?;
    let video_id = extract_video_id(href)?;
    let title = anchor
        .value()
        .attr("title")
        .map(str::to_string)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| anchor.text().collect::<String>().trim().to_string());
    if title.is_empty() {
        return None;
    }
    let url = if href.starts_with("http") {
        href.to_string()
    } else {
        format!("https://www.youtube.com{href}")
    };
    Some(CandidateVideo {
        video_id,
        url,
        title,
        channel_id: None,
        channel_url: None,
        description_snippet: None,
        view_count: None,
        upload_hint: None,
    })
}

fn fill_renderer_details(renderer: ElementRef, candidate: &mut CandidateVideo) {
    let anchor_selector = Selector::parse("a[href]").expect("anchor selector");
    for anchor in renderer.select(&anchor_selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if let Some(caps) = CHANNEL_HREF.captures(href) {
            if candidate.channel_id.is_none() {
                candidate.channel_id = caps.get(1).map(|m| m.as_str().to_string());
            }
            if candidate.channel_url.is_none() {
                let url = if href.starts_with("http") {
                    href.to_string()
                } else {
                    format!("https://www.youtube.com{href}")
                };
                candidate.channel_url = Some(url);
            }
        }
    }

    let snippet_selector =
        Selector::parse(".metadata-snippet-text, .description-snippet, [data-snippet]")
            .expect("snippet selector");
    if let Some(snippet) = renderer.select(&snippet_selector).next() {
        let text = snippet.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            candidate.description_snippet = Some(text);
        }
    }

    let body_text = renderer.text().collect::<String>();
    if let Some(caps) = VIEW_COUNT.captures(&body_text) {
        candidate.view_count = caps[1].replace([',', '.'], "").parse::<u64>().ok();
    }
    if let Some(caps) = UPLOAD_HINT.captures(&body_text) {
        candidate.upload_hint = Some(caps[1].to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer(id: &str, title: &str, channel: &str, snippet: &str) -> String {
        format!(
            concat!(
                "<div class=\"video-renderer\">",
                "<a href=\"/watch?v={id}\" title=\"{title}\">{title}</a>",
                "<a href=\"/channel/{channel}\">channel</a>",
                "<div class=\"metadata-snippet-text\">{snippet}</div>",
                "<span>12,345 views</span><span>3 days ago</span>",
                "</div>"
            ),
            id = id,
            title = title,
            channel = channel,
            snippet = snippet,
        )
    }

    #[test]
    fn parses_renderers_in_dom_order() {
        let html = format!(
            "<html><body>{}{}</body></html>",
            renderer("aaaaaaaaaaa", "Alice - Song (Official Music Video)", "UCalice", "links"),
            renderer("bbbbbbbbbbb", "Bob - Hit (Official Music Video)", "UCbob", "more"),
        );
        let candidates = parse_candidates(&html);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].video_id, "aaaaaaaaaaa");
        assert_eq!(candidates[0].channel_id.as_deref(), Some("UCalice"));
        assert_eq!(candidates[0].view_count, Some(12345));
        assert_eq!(candidates[0].upload_hint.as_deref(), Some("3 days ago"));
        assert_eq!(candidates[1].title, "Bob - Hit (Official Music Video)");
    }

    #[test]
    fn bare_anchor_fallback_still_finds_videos() {
        let html = concat!(
            "<html><body>",
            "<a href=\"https://youtu.be/ccccccccccc\">Carol - Track (Official Video)</a>",
            "<a href=\"/about\">not a video</a>",
            "</body></html>"
        );
        let candidates = parse_candidates(html);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].video_id, "ccccccccccc");
        assert_eq!(candidates[0].title, "Carol - Track (Official Video)");
    }

    #[test]
    fn renderer_without_video_link_is_skipped() {
        let html = concat!(
            "<html><body><div class=\"video-renderer\">",
            "<a href=\"/playlist?list=PL123\">A playlist</a>",
            "</div></body></html>"
        );
        assert!(parse_candidates(html).is_empty());
    }
}
