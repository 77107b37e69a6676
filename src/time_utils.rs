// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting and parsing.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer};

const LOCAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Format a local (zone-less) timestamp the way rides store it.
pub fn format_local(date: NaiveDateTime) -> String {
    date.format(LOCAL_FORMAT).to_string()
}

/// Parse a Strava local timestamp.
///
/// Strava reports `start_date_local` with a misleading `Z` suffix; the
/// wall-clock value is what matters.
pub fn parse_local(value: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.naive_local())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(value, LOCAL_FORMAT).ok())
}

/// Serde adapter for [`parse_local`].
pub fn deserialize_local<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_local(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid local timestamp: {}", raw)))
}
