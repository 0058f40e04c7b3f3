//! Progress events streamed to session subscribers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::models::{SessionFailure, SessionId, SessionSummary};

/// Pipeline phase reported by `PhaseProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryPhase {
    Harvest,
    Enrich,
    Store,
}

/// Why an artist was rejected instead of stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Title failed the music-video gate.
    TitleFiltered,
    /// No usable artist name could be extracted.
    NameUnusable,
    /// Same fingerprint already accepted in this session.
    DuplicateInSession,
    /// Matches an artist already persisted in the store.
    DuplicateOf { stored_id: Uuid },
    /// Enrichment surfaced an invariant-violating profile.
    DataQuality { detail: String },
    /// Accepted, but the session reached its target before this artist
    /// came up for enrichment.
    TargetReached,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::TitleFiltered => "title_filtered",
            RejectReason::NameUnusable => "name_unusable",
            RejectReason::DuplicateInSession => "duplicate_in_session",
            RejectReason::DuplicateOf { .. } => "duplicate_of_stored",
            RejectReason::DataQuality { .. } => "data_quality",
            RejectReason::TargetReached => "target_reached",
        }
    }
}

/// Event stream payload. Serialized with a `type` tag so the CLI can emit
/// newline-delimited JSON directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    SessionStarted {
        session_id: SessionId,
        query: String,
    },
    PhaseProgress {
        phase: DiscoveryPhase,
        completed: u64,
        target: Option<u64>,
    },
    CandidateFound {
        video_id: String,
        title: String,
    },
    ArtistAccepted {
        video_id: String,
        name: String,
    },
    ArtistRejected {
        video_id: Option<String>,
        name: Option<String>,
        #[serde(flatten)]
        reason: RejectReason,
    },
    ArtistEnriched {
        name: String,
        applied_sources: Vec<String>,
    },
    ArtistStored {
        name: String,
        artist_id: Uuid,
        score: f64,
    },
    SessionCompleted {
        summary: SessionSummary,
    },
    SessionFailed {
        #[serde(flatten)]
        failure: SessionFailure,
    },
    /// Emitted to a subscriber that fell too far behind, right before its
    /// stream is closed.
    Lagged {
        missed: u64,
    },
}

impl ProgressEvent {
    pub fn session_failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        ProgressEvent::SessionFailed {
            failure: SessionFailure {
                kind,
                message: message.into(),
            },
        }
    }

    /// Terminal events end the session stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::SessionCompleted { .. } | ProgressEvent::SessionFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = ProgressEvent::CandidateFound {
            video_id: "abcdefghijk".to_string(),
            title: "Artist - Song".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "candidate_found");
        assert_eq!(json["video_id"], "abcdefghijk");
    }

    #[test]
    fn reject_reason_flattens_into_event() {
        let event = ProgressEvent::ArtistRejected {
            video_id: Some("abcdefghijk".to_string()),
            name: Some("Drake".to_string()),
            reason: RejectReason::DuplicateInSession,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "artist_rejected");
        assert_eq!(json["reason"], "duplicate_in_session");
    }

    #[test]
    fn terminal_detection() {
        assert!(ProgressEvent::session_failed(ErrorKind::Cancelled, "stop").is_terminal());
        assert!(!ProgressEvent::Lagged { missed: 3 }.is_terminal());
    }
}
