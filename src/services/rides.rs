// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Writing Strava activities as rides.
//!
//! Shared by bulk reconciliation and the queue subscriber, so both paths
//! apply the same unit conversions, eligibility rules and flag transitions.

use crate::db::SyncStore;
use crate::error::{AppError, Result};
use crate::models::{GeoPoint, Ride, RideGeo, WorkflowFlag};
use crate::services::strava::StravaActivity;
use chrono::NaiveDateTime;
use std::sync::Arc;

const METERS_PER_MILE: f64 = 1609.344;
const MPS_TO_MPH: f64 = 2.236_936_292_054_402;
const FEET_PER_METER: f64 = 3.280_839_895_013_123;

/// Activity types that count as rides.
const RIDE_TYPES: &[&str] = &["Ride", "EBikeRide"];

/// Round to `places` decimal places.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Meters to miles, rounded to 3 decimals so "1.0 mi" survives a round trip.
pub fn meters_to_miles(meters: f64) -> f64 {
    round_to(meters / METERS_PER_MILE, 3)
}

pub fn mps_to_mph(mps: f64) -> f64 {
    mps * MPS_TO_MPH
}

pub fn meters_to_feet(meters: f64) -> f64 {
    meters * FEET_PER_METER
}

/// Why an activity is not synced.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Ineligibility {
    #[error("not a ride (type {0:?})")]
    NotARide(String),
    #[error("manual entry")]
    Manual,
    #[error("trainer ride")]
    Trainer,
    #[error("name contains exclusion keyword {0:?}")]
    ExcludedKeyword(String),
    #[error("starts at {starts} before window start {start}")]
    StartsBeforeWindow {
        starts: NaiveDateTime,
        start: NaiveDateTime,
    },
    #[error("ends at {ends} after cutoff {cutoff}")]
    EndsAfterWindow {
        ends: NaiveDateTime,
        cutoff: NaiveDateTime,
    },
}

/// Rules deciding which remote activities are synced.
#[derive(Debug, Clone)]
pub struct EligibilityRules {
    exclude_keywords: Vec<String>,
}

impl EligibilityRules {
    pub fn new(exclude_keywords: &[String]) -> Self {
        Self {
            exclude_keywords: exclude_keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Check an activity. With `cutoff` set, the activity must also end
    /// (start + elapsed, local time) no later than it.
    pub fn check(
        &self,
        activity: &StravaActivity,
        cutoff: Option<NaiveDateTime>,
    ) -> std::result::Result<(), Ineligibility> {
        if !RIDE_TYPES.contains(&activity.activity_type.as_str()) {
            return Err(Ineligibility::NotARide(activity.activity_type.clone()));
        }
        if activity.manual {
            return Err(Ineligibility::Manual);
        }
        if activity.trainer {
            return Err(Ineligibility::Trainer);
        }

        let name = activity.name.to_lowercase();
        if let Some(keyword) = self.exclude_keywords.iter().find(|k| name.contains(k.as_str())) {
            return Err(Ineligibility::ExcludedKeyword(keyword.clone()));
        }

        if let (Some(cutoff), Some(ends)) = (cutoff, activity.end_date_local()) {
            if ends > cutoff {
                return Err(Ineligibility::EndsAfterWindow { ends, cutoff });
            }
        }
        Ok(())
    }

    /// [`check`](Self::check) for a single activity, which must also start
    /// no earlier than `start`. Bulk listings never return such activities,
    /// so only the queue path needs this.
    pub fn check_in_window(
        &self,
        activity: &StravaActivity,
        start: NaiveDateTime,
        cutoff: NaiveDateTime,
    ) -> std::result::Result<(), Ineligibility> {
        self.check(activity, Some(cutoff))?;
        if activity.start_date_local < start {
            return Err(Ineligibility::StartsBeforeWindow {
                starts: activity.start_date_local,
                start,
            });
        }
        Ok(())
    }
}

/// A ride ready to be stored.
#[derive(Debug, Clone)]
pub struct PreparedRide {
    pub ride: Ride,
    pub is_new: bool,
    /// Distance moved at 2-decimal precision, so detail and track were reset.
    pub distance_changed: bool,
}

/// Build the ride record for `activity`, merging workflow state from
/// `existing` if the ride is already stored.
pub fn prepare_ride(
    existing: Option<Ride>,
    activity: &StravaActivity,
    athlete_id: u64,
) -> Result<PreparedRide> {
    let distance = activity.distance.ok_or_else(|| {
        AppError::DataEntry(format!("Activity {} has null distance", activity.id))
    })?;
    let elapsed_time = activity.elapsed_time.ok_or_else(|| {
        AppError::DataEntry(format!("Activity {} has null elapsed time", activity.id))
    })?;
    let moving_time = activity.moving_time.ok_or_else(|| {
        AppError::DataEntry(format!("Activity {} has null moving time", activity.id))
    })?;
    let distance = meters_to_miles(distance);

    let location = [&activity.location_city, &activity.location_state]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");

    let is_new = existing.is_none();
    let (mut detail, mut track, mut photos) = match &existing {
        Some(ride) => (ride.detail, ride.track, ride.photos),
        None => (
            WorkflowFlag::Pending,
            if activity.manual {
                WorkflowFlag::NotApplicable
            } else {
                WorkflowFlag::Pending
            },
            if activity.photo_count > 1 {
                WorkflowFlag::Pending
            } else {
                WorkflowFlag::NotApplicable
            },
        ),
    };

    let distance_changed = existing
        .as_ref()
        .is_some_and(|ride| round_to(ride.distance, 2) != round_to(distance, 2));
    if distance_changed {
        detail = WorkflowFlag::Pending;
        track = WorkflowFlag::Pending;
    }

    if activity.photo_count > 1 && photos == WorkflowFlag::NotApplicable {
        photos = WorkflowFlag::Pending;
    }

    let ride = Ride {
        id: activity.id,
        athlete_id,
        private: activity.private,
        name: activity.name.clone(),
        start_date: activity.start_date_local,
        distance,
        average_speed: mps_to_mph(activity.average_speed.unwrap_or_default()),
        maximum_speed: mps_to_mph(activity.max_speed.unwrap_or_default()),
        elapsed_time,
        moving_time,
        elevation_gain: meters_to_feet(activity.total_elevation_gain.unwrap_or_default()),
        location,
        commute: activity.commute,
        trainer: activity.trainer,
        manual: activity.manual,
        timezone: activity.timezone.clone(),
        detail,
        track,
        photos,
    };

    Ok(PreparedRide {
        ride,
        is_new,
        distance_changed,
    })
}

/// Start/end points reported on the activity itself, if any.
pub fn activity_geo(activity: &StravaActivity) -> Option<RideGeo> {
    let start_geo = activity.start_latlng.as_deref().and_then(GeoPoint::from_latlng);
    let end_geo = activity.end_latlng.as_deref().and_then(GeoPoint::from_latlng);
    if start_geo.is_none() && end_geo.is_none() {
        return None;
    }
    Some(RideGeo {
        ride_id: activity.id,
        start_geo,
        end_geo,
    })
}

/// Writes ride basics to the store.
#[derive(Clone)]
pub struct RideWriter {
    store: Arc<dyn SyncStore>,
}

impl RideWriter {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    /// Look up the stored ride and build its updated record (no write).
    pub async fn prepare(&self, athlete_id: u64, activity: &StravaActivity) -> Result<PreparedRide> {
        let existing = self.store.get_ride(activity.id).await?;
        prepare_ride(existing, activity, athlete_id)
    }

    /// Upsert the ride's basic fields (and start/end points when known).
    pub async fn write_ride(
        &self,
        athlete_id: u64,
        activity: &StravaActivity,
    ) -> Result<PreparedRide> {
        let prepared = self.prepare(athlete_id, activity).await?;
        self.store
            .write_ride_basics(&prepared.ride, activity_geo(activity).as_ref())
            .await?;

        if prepared.distance_changed {
            tracing::info!(
                ride_id = activity.id,
                distance = prepared.ride.distance,
                "Distance changed, queueing detail and track resync"
            );
        }
        tracing::debug!(
            athlete_id,
            ride_id = activity.id,
            name = %activity.name,
            start_date = %activity.start_date_local,
            is_new = prepared.is_new,
            "Ride written"
        );
        Ok(prepared)
    }
}
