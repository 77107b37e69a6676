// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-athlete Strava credentials.
//!
//! Hands out [`AthleteClient`]s, refreshing the OAuth token pair first when
//! the access token is missing or about to expire, and migrating legacy
//! forever-tokens (no refresh token) onto the refresh-token model.

use crate::db::SyncStore;
use crate::error::{AppError, Result};
use crate::models::{Athlete, AthleteTokens};
use crate::services::strava::{AthleteClient, StravaClient};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Refresh when the access token expires within this margin (1 hour).
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60 * 60;

/// Per-athlete locks serializing refresh exchanges.
pub type RefreshLocks = Arc<DashMap<u64, Arc<Mutex<()>>>>;

/// What has to happen before the athlete's token can be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenState {
    /// Access token is good for longer than the margin.
    Valid(String),
    /// Exchange this refresh token.
    Refresh(String),
    /// Exchange this legacy access token as if it were a refresh token.
    Upgrade(String),
    /// Nothing to work with.
    Missing,
}

/// Decide what the athlete's stored tokens need at time `now`.
pub fn token_state(athlete: &Athlete, now: DateTime<Utc>) -> TokenState {
    let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
    match (&athlete.refresh_token, &athlete.access_token) {
        (Some(refresh), Some(access)) => match athlete.token_expiry {
            Some(expiry) if now + margin < expiry => TokenState::Valid(access.clone()),
            _ => TokenState::Refresh(refresh.clone()),
        },
        (Some(refresh), None) => TokenState::Refresh(refresh.clone()),
        (None, Some(legacy)) => TokenState::Upgrade(legacy.clone()),
        (None, None) => TokenState::Missing,
    }
}

/// Issues authenticated Strava clients per athlete.
#[derive(Clone)]
pub struct CredentialManager {
    client: StravaClient,
    store: Arc<dyn SyncStore>,
    refresh_locks: RefreshLocks,
}

impl CredentialManager {
    pub fn new(client: StravaClient, store: Arc<dyn SyncStore>) -> Self {
        Self {
            client,
            store,
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    /// Get a client for the athlete, refreshing or upgrading tokens as needed.
    pub async fn client_for(&self, athlete_id: u64) -> Result<AthleteClient> {
        let athlete = self.load_athlete(athlete_id).await?;
        if let TokenState::Valid(token) = token_state(&athlete, Utc::now()) {
            return Ok(self.handle(athlete_id, token));
        }

        // Only one refresh per athlete at a time; later callers see the
        // persisted result when they get the lock.
        let lock = self
            .refresh_locks
            .entry(athlete_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let athlete = self.load_athlete(athlete_id).await?;
        let tokens = match token_state(&athlete, Utc::now()) {
            TokenState::Valid(token) => return Ok(self.handle(athlete_id, token)),
            TokenState::Refresh(refresh_token) => {
                tracing::info!(athlete_id, "Access token expiring, refreshing");
                match self.exchange(&refresh_token).await {
                    Ok(tokens) => tokens,
                    Err(e) if e.is_authorization_error() => {
                        return self.recover_from_race(athlete_id, &refresh_token, e).await;
                    }
                    Err(e) => return Err(e),
                }
            }
            TokenState::Upgrade(legacy_token) => {
                tracing::info!(athlete_id, "Upgrading legacy access token");
                self.exchange(&legacy_token).await?
            }
            TokenState::Missing => {
                return Err(AppError::Credential(format!(
                    "Athlete {} has no access or refresh token",
                    athlete_id
                )));
            }
        };

        self.store.set_athlete_tokens(athlete_id, &tokens).await?;
        tracing::info!(athlete_id, expires_at = %tokens.expires_at, "Token refreshed and stored");

        Ok(self.handle(athlete_id, tokens.access_token))
    }

    /// Drop the stored access token after Strava rejected it.
    pub async fn revoke(&self, athlete_id: u64) -> Result<()> {
        tracing::warn!(athlete_id, "Clearing revoked access token");
        self.store.clear_access_token(athlete_id).await
    }

    async fn load_athlete(&self, athlete_id: u64) -> Result<Athlete> {
        self.store
            .get_athlete(athlete_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Athlete {}", athlete_id)))
    }

    async fn exchange(&self, refresh_token: &str) -> Result<AthleteTokens> {
        let response = self.client.refresh_token(refresh_token).await?;
        let expires_at = DateTime::from_timestamp(response.expires_at, 0).ok_or_else(|| {
            AppError::StravaApi(format!("Invalid token expiry: {}", response.expires_at))
        })?;
        Ok(AthleteTokens {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at,
        })
    }

    /// Another process may have used the refresh token first. If the stored
    /// pair has moved on and is valid, use it; otherwise the rejection stands.
    async fn recover_from_race(
        &self,
        athlete_id: u64,
        used_refresh_token: &str,
        original: AppError,
    ) -> Result<AthleteClient> {
        let athlete = self.load_athlete(athlete_id).await?;
        let rotated = athlete.refresh_token.as_deref() != Some(used_refresh_token);
        match token_state(&athlete, Utc::now()) {
            TokenState::Valid(token) if rotated => {
                tracing::info!(athlete_id, "Refresh race detected, using stored tokens");
                Ok(self.handle(athlete_id, token))
            }
            _ => Err(original),
        }
    }

    fn handle(&self, athlete_id: u64, access_token: String) -> AthleteClient {
        AthleteClient::new(self.client.clone(), athlete_id, access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn athlete(access: Option<&str>, refresh: Option<&str>, expiry: Option<DateTime<Utc>>) -> Athlete {
        Athlete {
            id: 7,
            name: "Rider".to_string(),
            display_name: None,
            team_id: None,
            access_token: access.map(str::to_string),
            refresh_token: refresh.map(str::to_string),
            token_expiry: expiry,
        }
    }

    #[test]
    fn test_valid_token_outside_margin() {
        let now = Utc::now();
        let a = athlete(Some("acc"), Some("ref"), Some(now + Duration::hours(2)));
        assert_eq!(token_state(&a, now), TokenState::Valid("acc".to_string()));
    }

    #[test]
    fn test_refresh_within_margin() {
        let now = Utc::now();
        let a = athlete(Some("acc"), Some("ref"), Some(now + Duration::minutes(59)));
        assert_eq!(token_state(&a, now), TokenState::Refresh("ref".to_string()));
    }

    #[test]
    fn test_refresh_when_access_missing_or_expiry_unknown() {
        let now = Utc::now();
        assert_eq!(
            token_state(&athlete(None, Some("ref"), None), now),
            TokenState::Refresh("ref".to_string())
        );
        assert_eq!(
            token_state(&athlete(Some("acc"), Some("ref"), None), now),
            TokenState::Refresh("ref".to_string())
        );
    }

    #[test]
    fn test_legacy_token_upgrades() {
        let a = athlete(Some("forever"), None, None);
        assert_eq!(
            token_state(&a, Utc::now()),
            TokenState::Upgrade("forever".to_string())
        );
    }

    #[test]
    fn test_no_tokens() {
        assert_eq!(
            token_state(&athlete(None, None, None), Utc::now()),
            TokenState::Missing
        );
    }
}
