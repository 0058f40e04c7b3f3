//! Artist deduplication across the session and the persistent store.

use std::sync::Arc;

use dashmap::DashSet;
use uuid::Uuid;

use crate::error::Result;
use crate::models::ArtistProfile;
use crate::ports::{ArtistIdentifier, Store};

/// Outcome of an identity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    /// Never seen before; now registered for this session.
    Fresh,
    /// Same identity already accepted earlier in this session (no store
    /// row yet).
    DuplicateInSession,
    /// Matches a persisted artist.
    DuplicateOf(Uuid),
}

/// Session-scoped registry plus read-through store checks.
///
/// A missing identifier never blocks a check; the cascade simply falls
/// through to the next one. The name-only path requires an exact match on
/// the canonical normalization; anything fuzzier belongs to the store's
/// merge logic.
pub struct Deduplicator {
    store: Arc<dyn Store>,
    seen_keys: DashSet<String>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            seen_keys: DashSet::new(),
        }
    }

    /// Check a profile and register its identity when fresh.
    pub async fn check_and_register(&self, profile: &ArtistProfile) -> Result<DedupOutcome> {
        let mut keys = profile.identity_keys();
        let name_key = format!("name:{}", profile.normalized_name());
        keys.push(name_key);

        if keys.iter().any(|key| self.seen_keys.contains(key)) {
            return Ok(DedupOutcome::DuplicateInSession);
        }

        if let Some(stored_id) = self.find_stored(profile).await? {
            self.register(&keys);
            return Ok(DedupOutcome::DuplicateOf(stored_id));
        }

        self.register(&keys);
        Ok(DedupOutcome::Fresh)
    }

    async fn find_stored(&self, profile: &ArtistProfile) -> Result<Option<Uuid>> {
        let mut identifiers = Vec::new();
        if let Some(id) = &profile.youtube_channel_id {
            identifiers.push(ArtistIdentifier::YoutubeChannelId(id.clone()));
        }
        if let Some(id) = &profile.spotify_id {
            identifiers.push(ArtistIdentifier::SpotifyId(id.clone()));
        }
        if let Some(handle) = &profile.instagram_handle {
            identifiers.push(ArtistIdentifier::InstagramHandle(handle.to_lowercase()));
        }
        if let Some(handle) = &profile.tiktok_handle {
            identifiers.push(ArtistIdentifier::TiktokHandle(handle.to_lowercase()));
        }
        identifiers.push(ArtistIdentifier::NormalizedName(profile.normalized_name()));

        for identifier in identifiers {
            if let Some(record) = self.store.find_artist_by(&identifier).await? {
                tracing::debug!(
                    artist = %profile.name,
                    matched_by = identifier.kind(),
                    stored_id = %record.id,
                    "artist already persisted"
                );
                return Ok(Some(record.id));
            }
        }
        Ok(None)
    }

    fn register(&self, keys: &[String]) {
        for key in keys {
            self.seen_keys.insert(key.clone());
        }
    }

    /// Number of identity keys registered this session.
    pub fn registered_keys(&self) -> usize {
        self.seen_keys.len()
    }
}
