// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ride model and its child records.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress of one derived dataset for a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowFlag {
    /// Fetched and stored.
    Done,
    /// Needs (re)fetching.
    Pending,
    /// Does not exist for this ride (manual entry, no GPS, few photos).
    NotApplicable,
}

impl WorkflowFlag {
    /// Stored string form, for store queries.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowFlag::Done => "done",
            WorkflowFlag::Pending => "pending",
            WorkflowFlag::NotApplicable => "not_applicable",
        }
    }
}

/// Which derived dataset a flag tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowDimension {
    Detail,
    Track,
    Photos,
}

impl WorkflowDimension {
    /// Field name on the stored ride document.
    pub fn field_name(&self) -> &'static str {
        match self {
            WorkflowDimension::Detail => "detail",
            WorkflowDimension::Track => "track",
            WorkflowDimension::Photos => "photos",
        }
    }
}

/// Stored ride record in Firestore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    /// Strava activity ID (also used as document ID)
    pub id: u64,
    /// Strava athlete ID (owner)
    pub athlete_id: u64,
    pub private: bool,
    pub name: String,
    /// Start time in the athlete's local time zone
    pub start_date: NaiveDateTime,
    /// Distance in miles, rounded to 3 decimals
    pub distance: f64,
    /// Average speed in mph
    pub average_speed: f64,
    /// Maximum speed in mph
    pub maximum_speed: f64,
    /// Elapsed time in seconds
    pub elapsed_time: u64,
    /// Moving time in seconds
    pub moving_time: u64,
    /// Elevation gain in feet
    pub elevation_gain: f64,
    /// "City, State" (possibly empty)
    pub location: String,
    pub commute: bool,
    pub trainer: bool,
    pub manual: bool,
    pub timezone: Option<String>,
    pub detail: WorkflowFlag,
    pub track: WorkflowFlag,
    pub photos: WorkflowFlag,
}

impl Ride {
    pub fn flag(&self, dimension: WorkflowDimension) -> WorkflowFlag {
        match dimension {
            WorkflowDimension::Detail => self.detail,
            WorkflowDimension::Track => self.track,
            WorkflowDimension::Photos => self.photos,
        }
    }

    pub fn set_flag(&mut self, dimension: WorkflowDimension, flag: WorkflowFlag) {
        match dimension {
            WorkflowDimension::Detail => self.detail = flag,
            WorkflowDimension::Track => self.track = flag,
            WorkflowDimension::Photos => self.photos = flag,
        }
    }
}

/// Timed segment effort within a ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentEffort {
    /// Strava effort ID (also used as document ID)
    pub id: u64,
    pub ride_id: u64,
    /// Elapsed time in seconds
    pub elapsed_time: u64,
    pub segment_name: String,
    pub segment_id: u64,
}

/// Photo attached to a ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidePhoto {
    /// Stable photo id (Strava unique_id for native photos)
    pub id: String,
    pub ride_id: u64,
    /// Whether this is the activity's featured photo
    pub primary: bool,
    /// Strava photo source (1 = native upload)
    pub source: u8,
    /// Link to the photo on its external host
    #[serde(rename = "ref")]
    pub reference: Option<String>,
    /// Large image URL
    pub img_l: Option<String>,
    /// Thumbnail URL
    pub img_t: Option<String>,
    pub caption: Option<String>,
}

/// GPS track and series for a ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideTrack {
    /// Strava activity ID (also used as document ID)
    pub ride_id: u64,
    /// Encoded polyline (precision 5) of the track points
    pub gps_track: String,
    pub point_count: usize,
    /// Altitude samples in meters
    pub elevation_stream: Vec<f64>,
    /// Seconds since start for each sample
    pub time_stream: Vec<i64>,
}

impl RideTrack {
    /// Decode the stored polyline (x = longitude, y = latitude).
    pub fn line(&self) -> Result<geo::LineString<f64>, String> {
        polyline::decode_polyline(&self.gps_track, 5).map_err(|e| e.to_string())
    }
}

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Build from Strava's `[lat, lng]` pair; empty or short arrays yield None.
    pub fn from_latlng(pair: &[f64]) -> Option<Self> {
        match pair {
            [lat, lon, ..] => Some(Self {
                lat: *lat,
                lon: *lon,
            }),
            _ => None,
        }
    }
}

/// Start and end points of a ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideGeo {
    /// Strava activity ID (also used as document ID)
    pub ride_id: u64,
    pub start_geo: Option<GeoPoint>,
    pub end_geo: Option<GeoPoint>,
}

impl RideGeo {
    pub fn is_complete(&self) -> bool {
        self.start_geo.is_some() && self.end_geo.is_some()
    }
}

/// Most recent bulk-write failure for an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideError {
    /// Strava activity ID (also used as document ID)
    pub id: u64,
    pub athlete_id: u64,
    pub name: String,
    pub start_date: NaiveDateTime,
    pub reason: String,
    pub last_seen: DateTime<Utc>,
}
