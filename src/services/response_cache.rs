//! TTL + LRU cache for upstream responses.
//!
//! Keyed by `(operation, canonicalized params)`. The cache is consulted
//! before the quota limiter; a hit never consumes budget. Entries carry
//! their own TTL so each operation family ages on its own schedule.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use moka::future::Cache;
use moka::Expiry;

const DEFAULT_CAPACITY: u64 = 10_000;
const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Clone)]
struct CachedEntry {
    value: String,
    ttl: Duration,
}

struct PerEntryExpiry;

impl Expiry<String, CachedEntry> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Process-global response cache.
pub struct ResponseCache {
    cache: Cache<String, CachedEntry>,
    ttls: HashMap<&'static str, Duration>,
    default_ttl: Duration,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: u64) -> Self {
        let ttls = HashMap::from([
            ("spotify.search", Duration::from_secs(24 * 60 * 60)),
            ("spotify.artist", Duration::from_secs(6 * 60 * 60)),
            ("instagram.profile", Duration::from_secs(60 * 60)),
        ]);
        Self {
            cache: Cache::builder()
                .max_capacity(capacity)
                .expire_after(PerEntryExpiry)
                .build(),
            ttls,
            default_ttl: DEFAULT_TTL,
        }
    }

    fn key(op: &str, params: &str) -> String {
        format!("{op}\u{1f}{params}")
    }

    /// TTL for an operation: exact entry, else the `fetch.*`-style family
    /// default.
    pub fn ttl_for(&self, op: &str) -> Duration {
        self.ttls.get(op).copied().unwrap_or(self.default_ttl)
    }

    pub async fn get(&self, op: &str, params: &str) -> Option<String> {
        self.cache
            .get(&Self::key(op, params))
            .await
            .map(|entry| entry.value)
    }

    pub async fn insert(&self, op: &str, params: &str, value: String) {
        let entry = CachedEntry {
            value,
            ttl: self.ttl_for(op),
        };
        self.cache.insert(Self::key(op, params), entry).await;
    }

    /// Drop every entry; used by tests and operational tooling.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}
