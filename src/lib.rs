//! Music discovery backend
//!
//! A pipeline engine that discovers emerging music artists: it harvests
//! recent music videos from a search surface, extracts artist identities,
//! enriches them from Spotify, Instagram, TikTok, YouTube and lyrics
//! sources with per-source failure isolation, deduplicates by
//! fingerprint, scores the result and persists it, streaming progress to
//! subscribers throughout.

pub mod config;
pub mod error;
pub mod models;
pub mod ports;
pub mod services;
pub mod store;

// Re-export commonly used types
pub use config::{AppConfig, ConfigError, DiscoverySettings, Environment, FetchSettings};
pub use error::{DiscoveryError, ErrorKind, Result};
pub use models::*;
pub use ports::{Analyzer, ArtistIdentifier, ArtistRecord, Clock, Fetcher, Store};
pub use services::{
    DedupOutcome, Deduplicator, EnrichmentCoordinator, EventStream, Harvester, ProgressBus,
    QuotaLimiter, ResponseCache, RetryPolicy, SessionOrchestrator, StrategyFetcher,
};
pub use store::{InMemoryStore, PostgresStore};
