//! Postgres-backed Store over sqlx.
//!
//! Uses the runtime query API (no compile-time checking) so the crate
//! builds without a live database. Upserts take a row lock on the
//! matched artist so concurrent sessions merging into the same identity
//! serialize at the store.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::error::{DiscoveryError, Result};
use crate::models::{ArtistProfile, ProgressEvent, SessionId, SessionSnapshot};
use crate::ports::{ArtistIdentifier, ArtistRecord, Store};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS discovered_artists (
    id UUID PRIMARY KEY,
    fingerprint TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    youtube_channel_id TEXT,
    spotify_id TEXT,
    instagram_handle TEXT,
    tiktok_handle TEXT,
    profile JSONB NOT NULL,
    enrichment_score DOUBLE PRECISION NOT NULL
        CHECK (enrichment_score >= 0 AND enrichment_score <= 1),
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_artists_normalized_name
    ON discovered_artists (normalized_name);
CREATE INDEX IF NOT EXISTS idx_artists_youtube ON discovered_artists (youtube_channel_id);
CREATE INDEX IF NOT EXISTS idx_artists_spotify ON discovered_artists (spotify_id);
CREATE INDEX IF NOT EXISTS idx_artists_instagram ON discovered_artists (instagram_handle);
CREATE INDEX IF NOT EXISTS idx_artists_tiktok ON discovered_artists (tiktok_handle);

CREATE TABLE IF NOT EXISTS discovery_sessions (
    id UUID PRIMARY KEY,
    snapshot JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS discovery_session_events (
    id BIGSERIAL PRIMARY KEY,
    session_id UUID NOT NULL,
    event JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_session_events_session
    ON discovery_session_events (session_id);
"#;

/// sqlx-backed Store.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and make sure the schema exists.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn row_to_record(row: &PgRow) -> Result<ArtistRecord> {
        let profile_json: serde_json::Value = row.try_get("profile")?;
        let profile: ArtistProfile = serde_json::from_value(profile_json)?;
        let id: Uuid = row.try_get("id")?;
        let fingerprint: String = row.try_get("fingerprint")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
        Ok(ArtistRecord {
            id,
            fingerprint,
            profile,
            created_at,
            updated_at,
        })
    }

    fn identifier_column(identifier: &ArtistIdentifier) -> &'static str {
        match identifier {
            ArtistIdentifier::YoutubeChannelId(_) => "youtube_channel_id",
            ArtistIdentifier::SpotifyId(_) => "spotify_id",
            ArtistIdentifier::InstagramHandle(_) => "instagram_handle",
            ArtistIdentifier::TiktokHandle(_) => "tiktok_handle",
            ArtistIdentifier::NormalizedName(_) => "normalized_name",
        }
    }

    async fn write_row(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        record: &ArtistRecord,
        insert: bool,
    ) -> Result<()> {
        let profile_json = serde_json::to_value(&record.profile)?;
        let query = if insert {
            r#"
            INSERT INTO discovered_artists
                (id, fingerprint, name, normalized_name, youtube_channel_id, spotify_id,
                 instagram_handle, tiktok_handle, profile, enrichment_score,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#
        } else {
            r#"
            UPDATE discovered_artists SET
                fingerprint = $2, name = $3, normalized_name = $4,
                youtube_channel_id = $5, spotify_id = $6, instagram_handle = $7,
                tiktok_handle = $8, profile = $9, enrichment_score = $10,
                created_at = $11, updated_at = $12
            WHERE id = $1
            "#
        };
        sqlx::query(query)
            .bind(record.id)
            .bind(&record.fingerprint)
            .bind(&record.profile.name)
            .bind(record.profile.normalized_name())
            .bind(&record.profile.youtube_channel_id)
            .bind(&record.profile.spotify_id)
            .bind(record.profile.instagram_handle.as_ref().map(|h| h.to_lowercase()))
            .bind(record.profile.tiktok_handle.as_ref().map(|h| h.to_lowercase()))
            .bind(profile_json)
            .bind(record.profile.enrichment_score)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    async fn find_artist_by(&self, identifier: &ArtistIdentifier) -> Result<Option<ArtistRecord>> {
        let column = Self::identifier_column(identifier);
        let query = format!(
            "SELECT id, fingerprint, profile, created_at, updated_at \
             FROM discovered_artists WHERE {column} = $1 LIMIT 1"
        );
        let value = match identifier {
            ArtistIdentifier::InstagramHandle(v) | ArtistIdentifier::TiktokHandle(v) => {
                v.to_lowercase()
            }
            other => other.value().to_string(),
        };
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn upsert_artist(&self, profile: &ArtistProfile) -> Result<ArtistRecord> {
        if !(0.0..=1.0).contains(&profile.enrichment_score) {
            return Err(DiscoveryError::data_quality(format!(
                "enrichment_score {} out of bounds",
                profile.enrichment_score
            )));
        }

        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            r#"
            SELECT id, fingerprint, profile, created_at, updated_at
            FROM discovered_artists
            WHERE (youtube_channel_id IS NOT NULL AND youtube_channel_id = $1)
               OR (spotify_id IS NOT NULL AND spotify_id = $2)
               OR (instagram_handle IS NOT NULL AND instagram_handle = $3)
               OR (tiktok_handle IS NOT NULL AND tiktok_handle = $4)
               OR normalized_name = $5
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(&profile.youtube_channel_id)
        .bind(&profile.spotify_id)
        .bind(profile.instagram_handle.as_ref().map(|h| h.to_lowercase()))
        .bind(profile.tiktok_handle.as_ref().map(|h| h.to_lowercase()))
        .bind(profile.normalized_name())
        .fetch_optional(&mut *tx)
        .await?;

        let now = Utc::now();
        let record = match existing {
            Some(row) => {
                let mut record = Self::row_to_record(&row)?;
                record.profile.merge_from(profile);
                record.fingerprint = record.profile.fingerprint().to_string();
                record.updated_at = now;
                Self::write_row(&mut tx, &record, false).await?;
                record
            }
            None => {
                let record = ArtistRecord {
                    id: profile.id,
                    fingerprint: profile.fingerprint().to_string(),
                    profile: profile.clone(),
                    created_at: now,
                    updated_at: now,
                };
                Self::write_row(&mut tx, &record, true).await?;
                record
            }
        };

        tx.commit().await?;
        Ok(record)
    }

    async fn record_session(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let snapshot_json = serde_json::to_value(snapshot)?;
        sqlx::query(
            r#"
            INSERT INTO discovery_sessions (id, snapshot, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET snapshot = $2, updated_at = $3
            "#,
        )
        .bind(snapshot.session_id)
        .bind(snapshot_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_session_event(
        &self,
        session_id: SessionId,
        event: &ProgressEvent,
    ) -> Result<()> {
        let event_json = serde_json::to_value(event)?;
        sqlx::query(
            r#"
            INSERT INTO discovery_session_events (session_id, event, created_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(session_id)
        .bind(event_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
