// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava API client and response types.
//!
//! Handles:
//! - Paginated activity listing
//! - Raw detail/stream fetches (kept verbatim for the cache)
//! - Photo listing
//! - Token refresh
//! - Status mapping: 401 → authorization, 404 → not found, 429 → rate limit

use crate::config::Config;
use crate::error::AppError;
use crate::time_utils::deserialize_local;
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::collections::HashMap;

/// Page size for activity listing (Strava's maximum).
pub const LIST_PAGE_SIZE: u32 = 200;

/// Photo source code for photos uploaded directly to Strava.
pub const PHOTO_SOURCE_NATIVE: u8 = 1;

/// Strava API client.
#[derive(Clone)]
pub struct StravaClient {
    http: reqwest::Client,
    base_url: String,
    oauth_url: String,
    client_id: String,
    client_secret: String,
}

impl StravaClient {
    /// Create a new Strava client with OAuth credentials.
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "https://www.strava.com/api/v3".to_string(),
            oauth_url: "https://www.strava.com/oauth/token".to_string(),
            client_id,
            client_secret,
        }
    }

    /// Create a client using the URLs and credentials from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.strava_client_id.clone(),
            config.strava_client_secret.clone(),
        )
        .with_urls(&config.strava_api_url, &config.strava_oauth_url)
    }

    /// Point the client at different endpoints (tests, proxies).
    pub fn with_urls(mut self, base_url: &str, oauth_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self.oauth_url = oauth_url.to_string();
        self
    }

    /// List one page of activities started after `after` (Unix timestamp).
    pub async fn list_activities(
        &self,
        access_token: &str,
        after: i64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<StravaActivity>, AppError> {
        let url = format!("{}/athlete/activities", self.base_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[
                ("after", after.to_string()),
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::StravaApi(e.to_string()))?;

        let response = self.check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| AppError::StravaApi(format!("JSON parse error: {}", e)))
    }

    /// Get a detailed activity as raw JSON. `None` if Strava has no such activity.
    pub async fn get_activity_raw(
        &self,
        access_token: &str,
        activity_id: u64,
    ) -> Result<Option<String>, AppError> {
        let url = format!("{}/activities/{}", self.base_url, activity_id);
        self.get_raw(&url, access_token, &[("include_all_efforts", "true")])
            .await
    }

    /// Get latlng/time/altitude streams as raw JSON. `None` if not found.
    pub async fn get_streams_raw(
        &self,
        access_token: &str,
        activity_id: u64,
    ) -> Result<Option<String>, AppError> {
        let url = format!(
            "{}/activities/{}/streams/latlng,time,altitude",
            self.base_url, activity_id
        );
        self.get_raw(&url, access_token, &[("resolution", "low")])
            .await
    }

    /// List the photos of an activity at the given pixel size.
    pub async fn get_activity_photos(
        &self,
        access_token: &str,
        activity_id: u64,
        size: u32,
    ) -> Result<Vec<StravaPhoto>, AppError> {
        let url = format!("{}/activities/{}/photos", self.base_url, activity_id);
        let size = size.to_string();
        let body = self
            .get_raw(
                &url,
                access_token,
                &[("size", size.as_str()), ("photo_sources", "true")],
            )
            .await?
            .ok_or_else(|| AppError::ActivityNotFound(format!("Photos for {}", activity_id)))?;
        serde_json::from_str(&body)
            .map_err(|e| AppError::StravaApi(format!("JSON parse error: {}", e)))
    }

    /// Exchange a refresh token (or a legacy access token) for a fresh pair.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenRefreshResponse, AppError> {
        let response = self
            .http
            .post(&self.oauth_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| AppError::StravaApi(format!("Token refresh request failed: {}", e)))?;

        // A rejected refresh token comes back as 400 rather than 401.
        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Authorization(format!(
                "Refresh token rejected: {}",
                body
            )));
        }

        let response = self.check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| AppError::StravaApi(format!("JSON parse error: {}", e)))
    }

    /// GET returning the body text, or `None` on 404.
    async fn get_raw(
        &self,
        url: &str,
        access_token: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<String>, AppError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::StravaApi(e.to_string()))?;

        match self.check_response(response).await {
            Ok(response) => response
                .text()
                .await
                .map(Some)
                .map_err(|e| AppError::StravaApi(e.to_string())),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Check response status and return an error if not successful.
    async fn check_response(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, AppError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let url = response.url().path().to_string();
        let body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 => Err(AppError::Authorization(format!("{}: {}", url, body))),
            404 => Err(AppError::NotFound(url)),
            429 => {
                tracing::warn!("Strava rate limit hit (429)");
                Err(AppError::RateLimited)
            }
            _ => Err(AppError::StravaApi(format!("HTTP {}: {}", status, body))),
        }
    }
}

/// Token refresh response from Strava.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// AthleteClient - client bound to one athlete's token
// ─────────────────────────────────────────────────────────────────────────────

/// Strava client authenticated as one athlete.
#[derive(Clone)]
pub struct AthleteClient {
    client: StravaClient,
    athlete_id: u64,
    access_token: String,
}

impl AthleteClient {
    pub fn new(client: StravaClient, athlete_id: u64, access_token: String) -> Self {
        Self {
            client,
            athlete_id,
            access_token,
        }
    }

    pub fn athlete_id(&self) -> u64 {
        self.athlete_id
    }

    /// All activities started after `after`, following pagination.
    pub async fn list_activities_after(&self, after: i64) -> Result<Vec<StravaActivity>, AppError> {
        let mut activities = Vec::new();
        let mut page = 1;
        loop {
            let batch = self
                .client
                .list_activities(&self.access_token, after, page, LIST_PAGE_SIZE)
                .await?;
            let count = batch.len();
            activities.extend(batch);
            if count < LIST_PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }
        tracing::debug!(
            athlete_id = self.athlete_id,
            count = activities.len(),
            pages = page,
            "Listed activities"
        );
        Ok(activities)
    }

    pub async fn get_activity_raw(&self, activity_id: u64) -> Result<Option<String>, AppError> {
        self.client
            .get_activity_raw(&self.access_token, activity_id)
            .await
    }

    pub async fn get_streams_raw(&self, activity_id: u64) -> Result<Option<String>, AppError> {
        self.client
            .get_streams_raw(&self.access_token, activity_id)
            .await
    }

    pub async fn get_activity_photos(
        &self,
        activity_id: u64,
        size: u32,
    ) -> Result<Vec<StravaPhoto>, AppError> {
        self.client
            .get_activity_photos(&self.access_token, activity_id, size)
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response types
// ─────────────────────────────────────────────────────────────────────────────

/// Strava activity (summary from listing, or detailed).
///
/// Numeric fields Strava sometimes nulls out are optional here and checked
/// when the ride is written.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaActivity {
    pub id: u64,
    #[serde(default)]
    pub athlete: Option<StravaAthleteRef>,
    pub name: String,
    #[serde(rename = "type", default)]
    pub activity_type: String,
    #[serde(default)]
    pub private: bool,
    #[serde(deserialize_with = "deserialize_local")]
    pub start_date_local: NaiveDateTime,
    /// Meters
    pub distance: Option<f64>,
    /// Seconds
    pub moving_time: Option<u64>,
    /// Seconds
    pub elapsed_time: Option<u64>,
    /// Meters
    pub total_elevation_gain: Option<f64>,
    /// Meters per second
    pub average_speed: Option<f64>,
    /// Meters per second
    pub max_speed: Option<f64>,
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub trainer: bool,
    #[serde(default)]
    pub commute: bool,
    pub timezone: Option<String>,
    pub location_city: Option<String>,
    pub location_state: Option<String>,
    /// `[lat, lng]`, or empty
    #[serde(default)]
    pub start_latlng: Option<Vec<f64>>,
    #[serde(default)]
    pub end_latlng: Option<Vec<f64>>,
    /// Externally hosted (Instagram) photos
    #[serde(default)]
    pub photo_count: u32,
    #[serde(default)]
    pub total_photo_count: u32,
    #[serde(default)]
    pub photos: Option<StravaPhotosSummary>,
    #[serde(default)]
    pub segment_efforts: Vec<StravaSegmentEffort>,
}

impl StravaActivity {
    /// Local end time, when elapsed time is known.
    pub fn end_date_local(&self) -> Option<NaiveDateTime> {
        self.elapsed_time
            .map(|secs| self.start_date_local + chrono::Duration::seconds(secs as i64))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StravaAthleteRef {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StravaSegmentEffort {
    pub id: u64,
    pub elapsed_time: u64,
    pub segment: StravaSegment,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StravaSegment {
    pub id: u64,
    pub name: String,
}

/// `photos` block of a detailed activity.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaPhotosSummary {
    #[serde(default)]
    pub count: u32,
    pub primary: Option<StravaPrimaryPhoto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StravaPrimaryPhoto {
    pub id: Option<u64>,
    pub source: u8,
    pub unique_id: Option<String>,
    #[serde(default)]
    pub urls: Option<HashMap<String, String>>,
}

/// Entry from the activity photos listing.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaPhoto {
    pub unique_id: Option<String>,
    #[serde(default)]
    pub source: u8,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub urls: Option<HashMap<String, String>>,
}

/// One stream from the streams endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaStream {
    #[serde(rename = "type")]
    pub stream_type: String,
    pub data: serde_json::Value,
}

/// The stream set for an activity.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct StreamSet(pub Vec<StravaStream>);

impl StreamSet {
    fn data<T: for<'de> Deserialize<'de>>(&self, stream_type: &str) -> Option<Vec<T>> {
        self.0
            .iter()
            .find(|s| s.stream_type == stream_type)
            .and_then(|s| serde_json::from_value(s.data.clone()).ok())
    }

    /// `[lat, lng]` samples.
    pub fn latlng(&self) -> Option<Vec<[f64; 2]>> {
        self.data("latlng")
    }

    /// Altitude samples in meters.
    pub fn altitude(&self) -> Vec<f64> {
        self.data("altitude").unwrap_or_default()
    }

    /// Seconds since start.
    pub fn time(&self) -> Vec<i64> {
        self.data("time").unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_activity_with_null_metrics_deserializes() {
        let activity: StravaActivity = serde_json::from_value(json!({
            "id": 1,
            "name": "Lunch Ride",
            "type": "Ride",
            "start_date_local": "2026-01-05T12:00:00Z",
            "distance": null,
            "moving_time": null,
            "elapsed_time": 3600,
            "start_latlng": []
        }))
        .unwrap();

        assert_eq!(activity.distance, None);
        assert_eq!(activity.photo_count, 0);
        assert!(activity.segment_efforts.is_empty());
        assert_eq!(
            activity.end_date_local().unwrap().to_string(),
            "2026-01-05 13:00:00"
        );
    }

    #[test]
    fn test_stream_set_accessors() {
        let streams: StreamSet = serde_json::from_value(json!([
            {"type": "latlng", "data": [[37.0, -122.0], [37.1, -122.1]]},
            {"type": "time", "data": [0, 10]},
            {"type": "altitude", "data": [5.0, 6.5]}
        ]))
        .unwrap();

        assert_eq!(streams.latlng().unwrap().len(), 2);
        assert_eq!(streams.time(), vec![0, 10]);
        assert_eq!(streams.altitude(), vec![5.0, 6.5]);
    }

    #[test]
    fn test_stream_set_missing_latlng() {
        let streams: StreamSet =
            serde_json::from_value(json!([{"type": "time", "data": [0]}])).unwrap();
        assert!(streams.latlng().is_none());
        assert!(streams.altitude().is_empty());
    }
}
