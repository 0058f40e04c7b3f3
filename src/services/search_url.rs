//! Search URL composition.
//!
//! The search surface encodes filters in an opaque `sp` token. The token
//! layout is not documented, so composition is pluggable: the default
//! composer uses the literal tokens known for single-filter requests and
//! falls back to explicit query parameters for combinations. Composing
//! the same filters always yields the same URL, which the fetch cache
//! relies on.

use crate::models::{
    DurationFilter, QualityFilter, SearchFilters, SortFilter, UploadDateFilter,
};

pub const DEFAULT_SEARCH_HOST: &str = "https://www.youtube.com";

/// Pluggable URL composition strategy.
pub trait SearchUrlComposer: Send + Sync {
    fn compose(&self, query: &str, filters: &SearchFilters) -> String;
}

/// Default composer: known `sp` tokens for the common single-filter
/// shapes, query-parameter fallback otherwise.
pub struct DefaultSearchUrlComposer {
    host: String,
}

impl DefaultSearchUrlComposer {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    fn upload_date_token(filter: UploadDateFilter) -> Option<&'static str> {
        match filter {
            UploadDateFilter::Any => None,
            UploadDateFilter::Hour => Some("EgIIAQ%3D%3D"),
            UploadDateFilter::Today => Some("EgIIAg%3D%3D"),
            UploadDateFilter::Week => Some("EgIIAw%3D%3D"),
            UploadDateFilter::Month => Some("EgIIBA%3D%3D"),
            UploadDateFilter::Year => Some("EgIIBQ%3D%3D"),
        }
    }

    fn is_single_upload_date(filters: &SearchFilters) -> bool {
        filters.duration == DurationFilter::Any
            && filters.sort == SortFilter::Relevance
            && filters.quality_hint == QualityFilter::Any
    }
}

impl Default for DefaultSearchUrlComposer {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_HOST)
    }
}

impl SearchUrlComposer for DefaultSearchUrlComposer {
    fn compose(&self, query: &str, filters: &SearchFilters) -> String {
        let mut url = format!(
            "{}/results?search_query={}&gl=us&hl=en",
            self.host,
            urlencoding::encode(query.trim())
        );

        if Self::is_single_upload_date(filters) {
            if let Some(token) = Self::upload_date_token(filters.upload_date) {
                url.push_str("&sp=");
                url.push_str(token);
            }
            return url;
        }

        // Parameter fallback for combined filters. Fixed emission order
        // keeps the URL stable for caching.
        if filters.upload_date != UploadDateFilter::Any {
            url.push_str("&upload_date=");
            url.push_str(filters.upload_date.as_str());
        }
        if filters.duration != DurationFilter::Any {
            url.push_str("&duration=");
            url.push_str(filters.duration.as_str());
        }
        if filters.sort != SortFilter::Relevance {
            url.push_str("&sort=");
            url.push_str(filters.sort.as_str());
        }
        if filters.quality_hint != QualityFilter::Any {
            url.push_str("&quality=");
            url.push_str(filters.quality_hint.as_str());
        }
        url
    }
}
