// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Athlete model for storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registered athlete stored in Firestore.
///
/// Profile fields are owned by the athlete-registration side; the sync
/// engine only reads them and writes the token fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Athlete {
    /// Strava athlete ID (also used as document ID)
    pub id: u64,
    /// Full name
    pub name: String,
    /// Public display name
    #[serde(default)]
    pub display_name: Option<String>,
    /// Team the athlete competes for
    #[serde(default)]
    pub team_id: Option<u64>,
    /// Current OAuth access token (cleared when Strava revokes it)
    #[serde(default)]
    pub access_token: Option<String>,
    /// OAuth refresh token (absent for legacy forever-tokens)
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// When the access token expires
    #[serde(default)]
    pub token_expiry: Option<DateTime<Utc>>,
}

impl Athlete {
    /// Shard this athlete falls into when athletes are split `shards` ways.
    pub fn shard(&self, shards: u64) -> u64 {
        self.id % shards.max(1)
    }

    /// Whether bulk jobs should consider this athlete at all.
    pub fn is_authorized(&self) -> bool {
        self.access_token.is_some()
    }
}

/// Freshly issued token pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AthleteTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}
