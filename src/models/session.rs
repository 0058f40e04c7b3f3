//! Discovery session aggregate: request, lifecycle state and counters.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{DiscoveryError, ErrorKind};

pub type SessionId = Uuid;

fn default_target_count() -> u32 {
    50
}

/// Immutable input for a discovery session.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SessionRequest {
    #[validate(length(min = 1, message = "query must be non-empty"))]
    pub query: String,
    #[serde(default = "default_target_count")]
    #[validate(range(min = 1, message = "target_count must be positive"))]
    pub target_count: u32,
    #[serde(default)]
    pub filters: SearchFilters,
    pub max_cost_units: Option<u64>,
}

impl SessionRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            target_count: 50,
            filters: SearchFilters::default(),
            max_cost_units: None,
        }
    }

    pub fn with_target(mut self, target_count: u32) -> Self {
        self.target_count = target_count;
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_max_cost(mut self, units: u64) -> Self {
        self.max_cost_units = Some(units);
        self
    }

    /// Full request validation, including the whitespace-only query case
    /// the derive cannot express.
    pub fn validated(self) -> Result<Self, DiscoveryError> {
        self.validate()
            .map_err(|e| DiscoveryError::InvalidRequest(e.to_string()))?;
        if self.query.trim().is_empty() {
            return Err(DiscoveryError::InvalidRequest(
                "query must not be blank".to_string(),
            ));
        }
        if let Some(0) = self.max_cost_units {
            return Err(DiscoveryError::InvalidRequest(
                "max_cost_units must be positive".to_string(),
            ));
        }
        Ok(self)
    }
}

/// Recognized search filter options (§6.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub upload_date: UploadDateFilter,
    #[serde(default)]
    pub duration: DurationFilter,
    #[serde(default)]
    pub sort: SortFilter,
    #[serde(default)]
    pub quality_hint: QualityFilter,
}

impl SearchFilters {
    /// Apply one `key=value` option as the CLI passes them.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), DiscoveryError> {
        let unknown = |k: &str, v: &str| {
            DiscoveryError::InvalidRequest(format!("unrecognized filter {k}={v}"))
        };
        match key {
            "upload_date" => {
                self.upload_date = value.parse().map_err(|_| unknown(key, value))?;
            }
            "duration" => {
                self.duration = value.parse().map_err(|_| unknown(key, value))?;
            }
            "sort" => {
                self.sort = value.parse().map_err(|_| unknown(key, value))?;
            }
            "quality_hint" => {
                self.quality_hint = value.parse().map_err(|_| unknown(key, value))?;
            }
            _ => return Err(unknown(key, value)),
        }
        Ok(())
    }
}

macro_rules! filter_enum {
    ($name:ident { $($variant:ident => $token:literal),+ $(,)? }, default $default:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $token),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, ()> {
                match s {
                    $($token => Ok(Self::$variant),)+
                    _ => Err(()),
                }
            }
        }
    };
}

filter_enum!(UploadDateFilter {
    Any => "any",
    Hour => "hour",
    Today => "today",
    Week => "week",
    Month => "month",
    Year => "year",
}, default Any);

filter_enum!(DurationFilter {
    Any => "any",
    Short => "short",
    Long => "long",
}, default Any);

filter_enum!(SortFilter {
    Relevance => "relevance",
    Date => "date",
    Views => "views",
    Rating => "rating",
}, default Relevance);

filter_enum!(QualityFilter {
    Any => "any",
    Hd => "hd",
    FourK => "4k",
}, default Any);

/// Session lifecycle. Terminal states are sticky; transitions happen only
/// in the orchestrator driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// Live counters shared between pipeline stages. Snapshots are cheap and
/// point-in-time consistent per counter.
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub videos_seen: AtomicU64,
    pub videos_accepted: AtomicU64,
    pub artists_enriched: AtomicU64,
    pub artists_stored: AtomicU64,
}

impl SessionCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            videos_seen: self.videos_seen.load(Ordering::Relaxed),
            videos_accepted: self.videos_accepted.load(Ordering::Relaxed),
            artists_enriched: self.artists_enriched.load(Ordering::Relaxed),
            artists_stored: self.artists_stored.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub videos_seen: u64,
    pub videos_accepted: u64,
    pub artists_enriched: u64,
    pub artists_stored: u64,
}

/// Point-in-time view of a session returned by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub query: String,
    pub state: SessionState,
    pub counters: CounterSnapshot,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Final accounting attached to the terminal session event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub counters: CounterSnapshot,
    pub budget_exhausted: bool,
    pub harvest_exhausted: bool,
    pub elapsed_ms: u64,
}

/// Failure payload attached to `SessionFailed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub kind: ErrorKind,
    pub message: String,
}
