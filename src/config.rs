//! Application configuration module
//!
//! Provides centralized, environment-aware configuration with validation.
//! Every external integration is optional at the core level: a missing
//! variable disables the corresponding feature rather than failing startup.

use std::time::Duration;

use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Production requires {0} to be set")]
    ProductionRequired(String),
}

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        match std::env::var("ENVIRONMENT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            "staging" | "stage" => Self::Staging,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().map(Some).map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("could not parse {raw:?}"),
        }),
        Err(_) => Ok(None),
    }
}

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub discovery: DiscoverySettings,
    pub fetch: FetchSettings,
    pub quota: QuotaSettings,
    pub spotify: Option<SpotifySettings>,
    pub analyzer: Option<AnalyzerSettings>,
    pub store_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::from_env();

        let config = Self {
            environment,
            discovery: DiscoverySettings::from_env()?,
            fetch: FetchSettings::default(),
            quota: QuotaSettings::from_env()?,
            spotify: SpotifySettings::from_env(),
            analyzer: AnalyzerSettings::from_env(),
            store_url: std::env::var("STORE_URL").ok(),
        };

        if environment.is_production() {
            config.validate_production()?;
        }

        Ok(config)
    }

    fn validate_production(&self) -> Result<(), ConfigError> {
        // A production deployment with no persistent store discards every
        // discovered artist at session end.
        if self.store_url.is_none() {
            return Err(ConfigError::ProductionRequired("STORE_URL".to_string()));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            discovery: DiscoverySettings::default(),
            fetch: FetchSettings::default(),
            quota: QuotaSettings::default(),
            spotify: None,
            analyzer: None,
            store_url: None,
        }
    }
}

/// Pipeline-level tunables for a discovery session.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    /// Process-wide cap on concurrently running sessions.
    pub max_concurrent_sessions: usize,
    /// Harvest `target_count * over_fetch_factor` candidates to absorb
    /// filter loss.
    pub over_fetch_factor: u32,
    /// Enrichment workers per session.
    pub enrichment_workers: usize,
    /// Scroll steps with no new candidates before the harvester gives up.
    pub harvest_no_progress_limit: u32,
    /// Hard ceiling on candidates examined per harvest.
    pub harvest_video_ceiling: usize,
    /// Settle delay after each scroll.
    pub harvest_settle: Duration,
    /// Grace period for in-flight work after cancellation.
    pub cancel_grace: Duration,
}

impl DiscoverySettings {
    fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        if let Some(max) = parse_var::<usize>("MAX_CONCURRENT_SESSIONS")? {
            if max == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "MAX_CONCURRENT_SESSIONS".to_string(),
                    message: "must be positive".to_string(),
                });
            }
            settings.max_concurrent_sessions = max;
        }
        Ok(settings)
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 4,
            over_fetch_factor: 2,
            enrichment_workers: 8,
            harvest_no_progress_limit: 3,
            harvest_video_ceiling: 1000,
            harvest_settle: Duration::from_millis(500),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// Strategy-fetch limits shared by the whole process.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Concurrent headless renders across all sessions.
    pub headless_concurrency: usize,
    /// Concurrent plain-HTTP fetches across all sessions.
    pub plain_concurrency: usize,
    /// Pause between strategy attempts.
    pub strategy_cooldown: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            headless_concurrency: 4,
            plain_concurrency: 32,
            strategy_cooldown: Duration::from_secs(1),
        }
    }
}

/// Daily cost budget for named operations.
#[derive(Debug, Clone)]
pub struct QuotaSettings {
    pub daily_cost_budget: u64,
}

impl QuotaSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        if let Some(budget) = parse_var::<u64>("DAILY_COST_BUDGET")? {
            if budget == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "DAILY_COST_BUDGET".to_string(),
                    message: "must be positive".to_string(),
                });
            }
            settings.daily_cost_budget = budget;
        }
        Ok(settings)
    }
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            daily_cost_budget: 10_000,
        }
    }
}

/// Spotify Web API credentials (client-credentials flow).
#[derive(Debug, Clone)]
pub struct SpotifySettings {
    pub client_id: String,
    pub client_secret: String,
}

impl SpotifySettings {
    fn from_env() -> Option<Self> {
        let client_id = std::env::var("SPOTIFY_CLIENT_ID").ok()?;
        let client_secret = std::env::var("SPOTIFY_CLIENT_SECRET").ok()?;
        Some(Self {
            client_id,
            client_secret,
        })
    }
}

/// Lyrics analyzer service credentials.
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub api_key: String,
}

impl AnalyzerSettings {
    fn from_env() -> Option<Self> {
        let api_key = std::env::var("ANALYZER_API_KEY").ok()?;
        Some(Self { api_key })
    }
}
