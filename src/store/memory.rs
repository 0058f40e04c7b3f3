//! In-memory Store for tests and dry runs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{DiscoveryError, Result};
use crate::models::{ArtistProfile, ProgressEvent, SessionId, SessionSnapshot};
use crate::ports::{ArtistIdentifier, ArtistRecord, Store};

/// DashMap-backed Store. Upserts are serialized with one lock, which is
/// the whole atomicity story an in-process fake needs.
pub struct InMemoryStore {
    artists: DashMap<Uuid, ArtistRecord>,
    identity_index: DashMap<String, Uuid>,
    sessions: DashMap<SessionId, SessionSnapshot>,
    session_events: DashMap<SessionId, Vec<ProgressEvent>>,
    upsert_lock: Arc<Mutex<()>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            artists: DashMap::new(),
            identity_index: DashMap::new(),
            sessions: DashMap::new(),
            session_events: DashMap::new(),
            upsert_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn artist_count(&self) -> usize {
        self.artists.len()
    }

    pub fn artists(&self) -> Vec<ArtistRecord> {
        self.artists.iter().map(|e| e.value().clone()).collect()
    }

    pub fn session_events(&self, session_id: SessionId) -> Vec<ProgressEvent> {
        self.session_events
            .get(&session_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn session(&self, session_id: SessionId) -> Option<SessionSnapshot> {
        self.sessions.get(&session_id).map(|e| e.value().clone())
    }

    fn identity_key(identifier: &ArtistIdentifier) -> String {
        match identifier {
            ArtistIdentifier::YoutubeChannelId(v) => format!("yt:{v}"),
            ArtistIdentifier::SpotifyId(v) => format!("sp:{v}"),
            ArtistIdentifier::InstagramHandle(v) => format!("ig:{}", v.to_lowercase()),
            ArtistIdentifier::TiktokHandle(v) => format!("tt:{}", v.to_lowercase()),
            ArtistIdentifier::NormalizedName(v) => format!("name:{v}"),
        }
    }

    fn index_keys(profile: &ArtistProfile) -> Vec<String> {
        let mut keys = profile.identity_keys();
        keys.push(format!("name:{}", profile.normalized_name()));
        keys
    }

    fn validate(profile: &ArtistProfile) -> Result<()> {
        if !(0.0..=1.0).contains(&profile.enrichment_score) {
            return Err(DiscoveryError::data_quality(format!(
                "enrichment_score {} out of bounds",
                profile.enrichment_score
            )));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_artist_by(&self, identifier: &ArtistIdentifier) -> Result<Option<ArtistRecord>> {
        let key = Self::identity_key(identifier);
        Ok(self
            .identity_index
            .get(&key)
            .and_then(|id| self.artists.get(id.value()))
            .map(|record| record.value().clone()))
    }

    async fn upsert_artist(&self, profile: &ArtistProfile) -> Result<ArtistRecord> {
        Self::validate(profile)?;
        let _guard = self.upsert_lock.lock().await;

        let existing_id = Self::index_keys(profile)
            .into_iter()
            .find_map(|key| self.identity_index.get(&key).map(|id| *id.value()));

        let record = match existing_id {
            Some(id) => {
                let mut entry = self
                    .artists
                    .get_mut(&id)
                    .ok_or_else(|| DiscoveryError::fatal("identity index out of sync"))?;
                entry.profile.merge_from(profile);
                entry.fingerprint = entry.profile.fingerprint().to_string();
                entry.updated_at = Utc::now();
                entry.clone()
            }
            None => {
                let now = Utc::now();
                let record = ArtistRecord {
                    id: profile.id,
                    fingerprint: profile.fingerprint().to_string(),
                    profile: profile.clone(),
                    created_at: now,
                    updated_at: now,
                };
                self.artists.insert(record.id, record.clone());
                record
            }
        };

        for key in Self::index_keys(&record.profile) {
            self.identity_index.insert(key, record.id);
        }
        Ok(record)
    }

    async fn record_session(&self, snapshot: &SessionSnapshot) -> Result<()> {
        self.sessions.insert(snapshot.session_id, snapshot.clone());
        Ok(())
    }

    async fn append_session_event(
        &self,
        session_id: SessionId,
        event: &ProgressEvent,
    ) -> Result<()> {
        self.session_events
            .entry(session_id)
            .or_default()
            .push(event.clone());
        Ok(())
    }
}
