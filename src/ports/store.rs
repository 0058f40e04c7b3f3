//! Store port: the relational persistence contract the core consumes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ArtistProfile, ProgressEvent, SessionId, SessionSnapshot};

/// Lookup keys for cross-session deduplication, strongest first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtistIdentifier {
    YoutubeChannelId(String),
    SpotifyId(String),
    InstagramHandle(String),
    TiktokHandle(String),
    NormalizedName(String),
}

impl ArtistIdentifier {
    pub fn kind(&self) -> &'static str {
        match self {
            ArtistIdentifier::YoutubeChannelId(_) => "youtube_channel_id",
            ArtistIdentifier::SpotifyId(_) => "spotify_id",
            ArtistIdentifier::InstagramHandle(_) => "instagram_handle",
            ArtistIdentifier::TiktokHandle(_) => "tiktok_handle",
            ArtistIdentifier::NormalizedName(_) => "normalized_name",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            ArtistIdentifier::YoutubeChannelId(v)
            | ArtistIdentifier::SpotifyId(v)
            | ArtistIdentifier::InstagramHandle(v)
            | ArtistIdentifier::TiktokHandle(v)
            | ArtistIdentifier::NormalizedName(v) => v,
        }
    }
}

/// A persisted artist row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtistRecord {
    pub id: Uuid,
    pub fingerprint: String,
    pub profile: ArtistProfile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence operations the pipeline consumes. `upsert_artist` must be
/// atomic per fingerprint and apply the same merge rules the enrichment
/// coordinator uses; the store also enforces non-negative counters and a
/// score in [0, 1].
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_artist_by(&self, identifier: &ArtistIdentifier) -> Result<Option<ArtistRecord>>;

    async fn upsert_artist(&self, profile: &ArtistProfile) -> Result<ArtistRecord>;

    /// Idempotent by session id.
    async fn record_session(&self, snapshot: &SessionSnapshot) -> Result<()>;

    /// Append-only session journal.
    async fn append_session_event(
        &self,
        session_id: SessionId,
        event: &ProgressEvent,
    ) -> Result<()>;
}
