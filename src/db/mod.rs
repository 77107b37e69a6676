// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persistence layer.
//!
//! [`SyncStore`] is what the sync services talk to. Each method is one unit
//! of work: it either commits completely or leaves the store untouched.

pub mod firestore;
pub mod memory;

pub use firestore::{FirestoreDb, FirestoreQueue};
pub use memory::MemoryStore;

use crate::error::Result;
use crate::models::{
    Athlete, AthleteTokens, Ride, RideError, RideGeo, RidePhoto, RideTrack, SegmentEffort,
    WorkflowDimension, WorkflowFlag,
};
use async_trait::async_trait;
use chrono::NaiveDateTime;

/// Collection names as constants.
pub mod collections {
    pub const ATHLETES: &str = "athletes";
    pub const RIDES: &str = "rides";
    pub const RIDE_EFFORTS: &str = "ride_efforts";
    pub const RIDE_PHOTOS: &str = "ride_photos";
    pub const RIDE_TRACKS: &str = "ride_tracks";
    pub const RIDE_GEO: &str = "ride_geo";
    pub const RIDE_ERRORS: &str = "ride_errors";
    /// Work queue for webhook-driven activity updates
    pub const ACTIVITY_UPDATES: &str = "activity_updates";
}

/// What to do with the primary photo during a detail write.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryPhotoUpdate {
    /// Leave existing primary photo rows alone.
    Keep,
    /// Delete existing primary photo rows, then insert this one (if any).
    Replace(Option<RidePhoto>),
}

/// Everything a detail fetch writes, committed together.
#[derive(Debug, Clone)]
pub struct DetailUpdate {
    /// Ride with refreshed basic fields (its `detail` flag is stored as given)
    pub ride: Ride,
    /// Full replacement set of segment efforts
    pub efforts: Vec<SegmentEffort>,
    pub primary_photo: PrimaryPhotoUpdate,
    /// Start/end points reported on the activity
    pub geo: Option<RideGeo>,
}

/// Everything a stream fetch writes, committed together.
#[derive(Debug, Clone)]
pub struct TrackUpdate {
    pub ride_id: u64,
    /// `None` when the streams hold fewer than two GPS points: any stored
    /// track is deleted and the ride is marked `track = NotApplicable`.
    pub track: Option<RideTrack>,
    /// Start/end points to store when none are known yet
    pub geo: Option<RideGeo>,
}

impl TrackUpdate {
    /// Flag value the ride ends up with.
    pub fn flag(&self) -> WorkflowFlag {
        match self.track {
            Some(_) => WorkflowFlag::Done,
            None => WorkflowFlag::NotApplicable,
        }
    }
}

/// Non-primary photo reconciliation for one ride.
#[derive(Debug, Clone, Default)]
pub struct PhotoChanges {
    pub ride_id: u64,
    pub upserts: Vec<RidePhoto>,
    /// Photo ids to delete
    pub deletes: Vec<String>,
}

/// Selection of rides awaiting one kind of enrichment.
///
/// Private rides are never selected.
#[derive(Debug, Clone)]
pub struct PendingQuery {
    pub dimension: WorkflowDimension,
    pub athlete_id: Option<u64>,
    pub ride_id: Option<u64>,
    /// Select regardless of the flag value
    pub include_all: bool,
    pub exclude_manual: bool,
    pub limit: Option<usize>,
}

impl PendingQuery {
    pub fn new(dimension: WorkflowDimension) -> Self {
        Self {
            dimension,
            athlete_id: None,
            ride_id: None,
            include_all: false,
            exclude_manual: false,
            limit: None,
        }
    }

    /// Whether `ride` satisfies this query (shared by store implementations).
    pub fn matches(&self, ride: &Ride) -> bool {
        !ride.private
            && (self.include_all || ride.flag(self.dimension) == WorkflowFlag::Pending)
            && self.athlete_id.is_none_or(|id| ride.athlete_id == id)
            && self.ride_id.is_none_or(|id| ride.id == id)
            && !(self.exclude_manual && ride.manual)
    }
}

/// Store operations used by the sync engine.
#[async_trait]
pub trait SyncStore: Send + Sync {
    // ─── Athletes ────────────────────────────────────────────────

    async fn get_athlete(&self, athlete_id: u64) -> Result<Option<Athlete>>;

    /// Athletes holding an access token, optionally restricted to one shard
    /// given as `(shards, shard)`.
    async fn list_authorized_athletes(&self, shard: Option<(u64, u64)>) -> Result<Vec<Athlete>>;

    /// Persist a refreshed token pair.
    async fn set_athlete_tokens(&self, athlete_id: u64, tokens: &AthleteTokens) -> Result<()>;

    /// Forget the access token so bulk jobs skip the athlete.
    async fn clear_access_token(&self, athlete_id: u64) -> Result<()>;

    // ─── Rides ───────────────────────────────────────────────────

    async fn get_ride(&self, ride_id: u64) -> Result<Option<Ride>>;

    /// Rides for an athlete starting at or after `since` (local time).
    async fn list_rides_since(&self, athlete_id: u64, since: NaiveDateTime) -> Result<Vec<Ride>>;

    async fn list_pending(&self, query: &PendingQuery) -> Result<Vec<Ride>>;

    async fn upsert_ride(&self, ride: &Ride) -> Result<()>;

    /// Store ride basics together with the start/end points reported on the
    /// activity, if any.
    async fn write_ride_basics(&self, ride: &Ride, geo: Option<&RideGeo>) -> Result<()>;

    async fn set_ride_flag(
        &self,
        ride_id: u64,
        dimension: WorkflowDimension,
        flag: WorkflowFlag,
    ) -> Result<()>;

    /// Delete one ride owned by `athlete_id`. Returns false if not found.
    async fn delete_ride(&self, athlete_id: u64, ride_id: u64) -> Result<bool>;

    /// Delete many rides in one operation. Returns how many existed.
    async fn delete_rides(&self, ride_ids: &[u64]) -> Result<usize>;

    // ─── Ride errors ─────────────────────────────────────────────

    async fn get_ride_error(&self, ride_id: u64) -> Result<Option<RideError>>;

    async fn upsert_ride_error(&self, error: &RideError) -> Result<()>;

    /// Returns true if an error record was removed.
    async fn clear_ride_error(&self, ride_id: u64) -> Result<bool>;

    // ─── Child records ───────────────────────────────────────────

    async fn list_efforts(&self, ride_id: u64) -> Result<Vec<SegmentEffort>>;

    async fn list_photos(&self, ride_id: u64) -> Result<Vec<RidePhoto>>;

    async fn get_track(&self, ride_id: u64) -> Result<Option<RideTrack>>;

    async fn get_ride_geo(&self, ride_id: u64) -> Result<Option<RideGeo>>;

    async fn upsert_ride_geo(&self, geo: &RideGeo) -> Result<()>;

    // ─── Composite writes ────────────────────────────────────────

    /// Store ride basics and geo, replace efforts and (optionally) the
    /// primary photo.
    async fn apply_detail(&self, update: &DetailUpdate) -> Result<()>;

    /// Replace (or delete) the track, store geo if given, and set the
    /// `track` flag to [`TrackUpdate::flag`].
    async fn apply_track(&self, update: &TrackUpdate) -> Result<()>;

    /// Apply non-primary photo changes and mark `photos = Done`.
    async fn apply_photo_changes(&self, changes: &PhotoChanges) -> Result<()>;
}
