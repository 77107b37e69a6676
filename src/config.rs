// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Everything is read once at startup; a missing or malformed value is a
//! startup failure, never a mid-run surprise.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Utc};
use std::env;
use std::path::PathBuf;

const DEFAULT_API_URL: &str = "https://www.strava.com/api/v3";
const DEFAULT_OAUTH_URL: &str = "https://www.strava.com/oauth/token";
const DEFAULT_CACHE_DIR: &str = "/data/cache/activities";
const DEFAULT_EXCLUDE_KEYWORDS: &str = "#NoBAFS";

/// The competition window. Activities are listed from `start` onwards and
/// must finish by `end`; uploads are still accepted until `end + grace`.
#[derive(Debug, Clone)]
pub struct CompetitionWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub grace: Duration,
}

impl CompetitionWindow {
    /// Window start as athlete-local wall-clock time (what rides store).
    pub fn local_start(&self) -> NaiveDateTime {
        self.start.naive_local()
    }

    /// Latest permitted local end time for an eligible activity.
    pub fn local_cutoff(&self) -> NaiveDateTime {
        self.end.naive_local() + self.grace
    }

    /// Whether the upload grace period has passed.
    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        now > (self.end + self.grace).with_timezone(&Utc)
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Strava OAuth client ID
    pub strava_client_id: String,
    /// Strava OAuth client secret
    pub strava_client_secret: String,
    /// Strava REST API base URL
    pub strava_api_url: String,
    /// Strava OAuth token endpoint
    pub strava_oauth_url: String,
    /// Root directory for cached activity/stream JSON
    pub cache_dir: PathBuf,
    /// GCP project ID
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// Webhook verification token
    pub webhook_verify_token: String,
    /// Expected webhook subscription id (unchecked if unset)
    pub strava_subscription_id: Option<u64>,

    pub window: CompetitionWindow,
    /// Case-insensitive name keywords that exclude an activity
    pub exclude_keywords: Vec<String>,

    /// Delay before a failed queue message becomes visible again
    pub requeue_delay: std::time::Duration,
    /// Pause after each processed message (Strava rate limit)
    pub throttle_delay: std::time::Duration,
    /// How long a single queue reservation blocks
    pub reserve_timeout: std::time::Duration,

    /// Number of athlete shards for bulk reconciliation
    pub sync_shards: u64,
    pub activity_sync_interval: std::time::Duration,
    pub detail_sync_interval: std::time::Duration,
    pub stream_sync_interval: std::time::Duration,
    pub photo_sync_interval: std::time::Duration,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        let start = DateTime::parse_from_rfc3339("2026-01-01T00:00:00-05:00")
            .unwrap_or_else(|_| Utc::now().fixed_offset());
        let end = DateTime::parse_from_rfc3339("2026-03-20T00:00:00-04:00")
            .unwrap_or_else(|_| Utc::now().fixed_offset());
        Self {
            strava_client_id: "test_client_id".to_string(),
            strava_client_secret: "test_secret".to_string(),
            strava_api_url: DEFAULT_API_URL.to_string(),
            strava_oauth_url: DEFAULT_OAUTH_URL.to_string(),
            cache_dir: env::temp_dir().join("ride-sync-cache"),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            webhook_verify_token: "test_verify_token".to_string(),
            strava_subscription_id: Some(12345),
            window: CompetitionWindow {
                start,
                end,
                grace: Duration::days(1),
            },
            exclude_keywords: parse_keywords(DEFAULT_EXCLUDE_KEYWORDS),
            requeue_delay: std::time::Duration::from_secs(30),
            throttle_delay: std::time::Duration::from_millis(3000),
            reserve_timeout: std::time::Duration::from_secs(30),
            sync_shards: 24,
            activity_sync_interval: std::time::Duration::from_secs(150),
            detail_sync_interval: std::time::Duration::from_secs(300),
            stream_sync_interval: std::time::Duration::from_secs(300),
            photo_sync_interval: std::time::Duration::from_secs(1800),
        }
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let start = parse_date("START_DATE", &required("START_DATE")?)?;
        let end = parse_date("END_DATE", &required("END_DATE")?)?;
        let grace_days: i64 = parse_or("UPLOAD_GRACE_PERIOD_DAYS", 1)?;

        Ok(Self {
            strava_client_id: required("STRAVA_CLIENT_ID")?,
            strava_client_secret: required("STRAVA_CLIENT_SECRET")?.trim().to_string(),
            strava_api_url: env::var("STRAVA_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            strava_oauth_url: env::var("STRAVA_OAUTH_URL")
                .unwrap_or_else(|_| DEFAULT_OAUTH_URL.to_string()),
            cache_dir: env::var("STRAVA_ACTIVITY_CACHE_DIR")
                .unwrap_or_else(|_| DEFAULT_CACHE_DIR.to_string())
                .into(),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: parse_or("PORT", 8080)?,
            webhook_verify_token: required("WEBHOOK_VERIFY_TOKEN")?.trim().to_string(),
            strava_subscription_id: match env::var("STRAVA_SUBSCRIPTION_ID") {
                Ok(v) => Some(v.trim().parse().map_err(|_| ConfigError::Invalid {
                    name: "STRAVA_SUBSCRIPTION_ID",
                    reason: format!("not an integer: {}", v),
                })?),
                Err(_) => None,
            },
            window: CompetitionWindow {
                start,
                end,
                grace: Duration::days(grace_days),
            },
            exclude_keywords: parse_keywords(
                &env::var("EXCLUDE_KEYWORDS")
                    .unwrap_or_else(|_| DEFAULT_EXCLUDE_KEYWORDS.to_string()),
            ),
            requeue_delay: std::time::Duration::from_secs(parse_or("REQUEUE_DELAY", 30)?),
            throttle_delay: std::time::Duration::from_millis(parse_or("THROTTLE_DELAY_MS", 3000)?),
            reserve_timeout: std::time::Duration::from_secs(parse_or("RESERVE_TIMEOUT", 30)?),
            sync_shards: parse_or("SYNC_SHARDS", 24)?,
            activity_sync_interval: std::time::Duration::from_secs(parse_or(
                "ACTIVITY_SYNC_INTERVAL",
                150,
            )?),
            detail_sync_interval: std::time::Duration::from_secs(parse_or(
                "DETAIL_SYNC_INTERVAL",
                300,
            )?),
            stream_sync_interval: std::time::Duration::from_secs(parse_or(
                "STREAM_SYNC_INTERVAL",
                300,
            )?),
            photo_sync_interval: std::time::Duration::from_secs(parse_or(
                "PHOTO_SYNC_INTERVAL",
                1800,
            )?),
        })
    }

    /// Check things that can only be verified against the environment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.cache_dir.is_dir() {
            return Err(ConfigError::CacheDir(self.cache_dir.clone()));
        }
        if self.window.end <= self.window.start {
            return Err(ConfigError::Invalid {
                name: "END_DATE",
                reason: "must be after START_DATE".to_string(),
            });
        }
        if self.sync_shards == 0 {
            return Err(ConfigError::Invalid {
                name: "SYNC_SHARDS",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            reason: format!("cannot parse {:?}", v),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_date(name: &'static str, value: &str) -> Result<DateTime<FixedOffset>, ConfigError> {
    DateTime::parse_from_rfc3339(value.trim()).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

/// Split a comma-separated keyword list, dropping empty entries.
pub fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Cache directory does not exist: {0}")]
    CacheDir(PathBuf),
}
