//! Pipeline services.

pub mod deduplicator;
pub mod enrichment;
pub mod extractor;
pub mod harvester;
pub mod progress;
pub mod quota;
pub mod response_cache;
pub mod scorer;
pub mod search_url;
pub mod session_orchestrator;
pub mod strategy_fetcher;
pub mod title_filter;

pub use deduplicator::{DedupOutcome, Deduplicator};
pub use enrichment::{
    EnrichmentCoordinator, EnrichmentSource, InstagramEnricher, LyricsEnricher, RetryPolicy,
    SourceOutcome, SourceReport, SpotifyEnricher, TiktokEnricher, YoutubeChannelEnricher,
};
pub use extractor::ArtistExtractor;
pub use harvester::Harvester;
pub use progress::{EventStream, ProgressBus};
pub use quota::{CostBudget, QuotaLimiter, QuotaReservation, SearchBudget};
pub use response_cache::ResponseCache;
pub use scorer::score;
pub use search_url::{DefaultSearchUrlComposer, SearchUrlComposer};
pub use session_orchestrator::SessionOrchestrator;
pub use strategy_fetcher::{FetchHints, FetchStrategy, FetchedDocument, StrategyFetcher};
pub use title_filter::TitleFilter;
