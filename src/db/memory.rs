// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory [`SyncStore`] for tests.
//!
//! A single mutex guards all state, so every call is trivially atomic.
//! Mutating calls are counted and individual rides can be made to fail,
//! which lets tests observe idempotence and partial-failure handling.

use super::{DetailUpdate, PendingQuery, PhotoChanges, PrimaryPhotoUpdate, SyncStore, TrackUpdate};
use crate::error::{AppError, Result};
use crate::models::{
    Athlete, AthleteTokens, Ride, RideError, RideGeo, RidePhoto, RideTrack, SegmentEffort,
    WorkflowDimension, WorkflowFlag,
};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    athletes: BTreeMap<u64, Athlete>,
    rides: BTreeMap<u64, Ride>,
    efforts: BTreeMap<u64, Vec<SegmentEffort>>,
    photos: BTreeMap<u64, Vec<RidePhoto>>,
    tracks: BTreeMap<u64, RideTrack>,
    geo: BTreeMap<u64, RideGeo>,
    errors: BTreeMap<u64, RideError>,
    failing_rides: HashSet<u64>,
    failing_geo: HashSet<u64>,
}

impl MemoryState {
    fn check_failure(&self, ride_id: u64) -> Result<()> {
        if self.failing_rides.contains(&ride_id) {
            return Err(AppError::Database(format!(
                "Injected write failure for ride {}",
                ride_id
            )));
        }
        Ok(())
    }

    fn check_geo_failure(&self, geo: Option<&RideGeo>) -> Result<()> {
        match geo {
            Some(geo) if self.failing_geo.contains(&geo.ride_id) => Err(AppError::Database(
                format!("Injected geo write failure for ride {}", geo.ride_id),
            )),
            _ => Ok(()),
        }
    }

    fn remove_ride(&mut self, ride_id: u64) -> bool {
        let existed = self.rides.remove(&ride_id).is_some();
        self.efforts.remove(&ride_id);
        self.photos.remove(&ride_id);
        self.tracks.remove(&ride_id);
        self.geo.remove(&ride_id);
        self.errors.remove(&ride_id);
        existed
    }
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating store calls made so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Seed an athlete (not counted as a write).
    pub async fn insert_athlete(&self, athlete: Athlete) {
        self.state.lock().await.athletes.insert(athlete.id, athlete);
    }

    /// Seed a ride (not counted as a write).
    pub async fn insert_ride(&self, ride: Ride) {
        self.state.lock().await.rides.insert(ride.id, ride);
    }

    /// Make every write touching `ride_id` fail until cleared.
    pub async fn fail_writes_for(&self, ride_id: u64) {
        self.state.lock().await.failing_rides.insert(ride_id);
    }

    /// Make any write touching this ride's start/end points fail.
    pub async fn fail_geo_writes_for(&self, ride_id: u64) {
        self.state.lock().await.failing_geo.insert(ride_id);
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.failing_rides.clear();
        state.failing_geo.clear();
    }

    pub async fn ride_ids(&self) -> Vec<u64> {
        self.state.lock().await.rides.keys().copied().collect()
    }

    fn count_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn get_athlete(&self, athlete_id: u64) -> Result<Option<Athlete>> {
        Ok(self.state.lock().await.athletes.get(&athlete_id).cloned())
    }

    async fn list_authorized_athletes(&self, shard: Option<(u64, u64)>) -> Result<Vec<Athlete>> {
        let state = self.state.lock().await;
        Ok(state
            .athletes
            .values()
            .filter(|a| a.is_authorized())
            .filter(|a| shard.is_none_or(|(shards, segment)| a.shard(shards) == segment))
            .cloned()
            .collect())
    }

    async fn set_athlete_tokens(&self, athlete_id: u64, tokens: &AthleteTokens) -> Result<()> {
        self.count_write();
        let mut state = self.state.lock().await;
        let athlete = state
            .athletes
            .get_mut(&athlete_id)
            .ok_or_else(|| AppError::NotFound(format!("Athlete {}", athlete_id)))?;
        athlete.access_token = Some(tokens.access_token.clone());
        athlete.refresh_token = Some(tokens.refresh_token.clone());
        athlete.token_expiry = Some(tokens.expires_at);
        Ok(())
    }

    async fn clear_access_token(&self, athlete_id: u64) -> Result<()> {
        self.count_write();
        if let Some(athlete) = self.state.lock().await.athletes.get_mut(&athlete_id) {
            athlete.access_token = None;
        }
        Ok(())
    }

    async fn get_ride(&self, ride_id: u64) -> Result<Option<Ride>> {
        Ok(self.state.lock().await.rides.get(&ride_id).cloned())
    }

    async fn list_rides_since(&self, athlete_id: u64, since: NaiveDateTime) -> Result<Vec<Ride>> {
        let state = self.state.lock().await;
        Ok(state
            .rides
            .values()
            .filter(|r| r.athlete_id == athlete_id && r.start_date >= since)
            .cloned()
            .collect())
    }

    async fn list_pending(&self, query: &PendingQuery) -> Result<Vec<Ride>> {
        let state = self.state.lock().await;
        let matching = state.rides.values().filter(|r| query.matches(r)).cloned();
        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn upsert_ride(&self, ride: &Ride) -> Result<()> {
        self.count_write();
        let mut state = self.state.lock().await;
        state.check_failure(ride.id)?;
        state.rides.insert(ride.id, ride.clone());
        Ok(())
    }

    async fn write_ride_basics(&self, ride: &Ride, geo: Option<&RideGeo>) -> Result<()> {
        self.count_write();
        let mut state = self.state.lock().await;
        state.check_failure(ride.id)?;
        state.check_geo_failure(geo)?;
        state.rides.insert(ride.id, ride.clone());
        if let Some(geo) = geo {
            state.geo.insert(ride.id, geo.clone());
        }
        Ok(())
    }

    async fn set_ride_flag(
        &self,
        ride_id: u64,
        dimension: WorkflowDimension,
        flag: WorkflowFlag,
    ) -> Result<()> {
        self.count_write();
        let mut state = self.state.lock().await;
        state.check_failure(ride_id)?;
        let ride = state
            .rides
            .get_mut(&ride_id)
            .ok_or_else(|| AppError::NotFound(format!("Ride {}", ride_id)))?;
        ride.set_flag(dimension, flag);
        Ok(())
    }

    async fn delete_ride(&self, athlete_id: u64, ride_id: u64) -> Result<bool> {
        self.count_write();
        let mut state = self.state.lock().await;
        match state.rides.get(&ride_id) {
            Some(ride) if ride.athlete_id == athlete_id => Ok(state.remove_ride(ride_id)),
            _ => Ok(false),
        }
    }

    async fn delete_rides(&self, ride_ids: &[u64]) -> Result<usize> {
        self.count_write();
        let mut state = self.state.lock().await;
        Ok(ride_ids
            .iter()
            .filter(|id| state.remove_ride(**id))
            .count())
    }

    async fn get_ride_error(&self, ride_id: u64) -> Result<Option<RideError>> {
        Ok(self.state.lock().await.errors.get(&ride_id).cloned())
    }

    async fn upsert_ride_error(&self, error: &RideError) -> Result<()> {
        self.count_write();
        self.state
            .lock()
            .await
            .errors
            .insert(error.id, error.clone());
        Ok(())
    }

    async fn clear_ride_error(&self, ride_id: u64) -> Result<bool> {
        self.count_write();
        Ok(self.state.lock().await.errors.remove(&ride_id).is_some())
    }

    async fn list_efforts(&self, ride_id: u64) -> Result<Vec<SegmentEffort>> {
        let state = self.state.lock().await;
        Ok(state.efforts.get(&ride_id).cloned().unwrap_or_default())
    }

    async fn list_photos(&self, ride_id: u64) -> Result<Vec<RidePhoto>> {
        let state = self.state.lock().await;
        Ok(state.photos.get(&ride_id).cloned().unwrap_or_default())
    }

    async fn get_track(&self, ride_id: u64) -> Result<Option<RideTrack>> {
        Ok(self.state.lock().await.tracks.get(&ride_id).cloned())
    }

    async fn get_ride_geo(&self, ride_id: u64) -> Result<Option<RideGeo>> {
        Ok(self.state.lock().await.geo.get(&ride_id).cloned())
    }

    async fn upsert_ride_geo(&self, geo: &RideGeo) -> Result<()> {
        self.count_write();
        let mut state = self.state.lock().await;
        state.check_failure(geo.ride_id)?;
        state.check_geo_failure(Some(geo))?;
        state.geo.insert(geo.ride_id, geo.clone());
        Ok(())
    }

    async fn apply_detail(&self, update: &DetailUpdate) -> Result<()> {
        self.count_write();
        let ride_id = update.ride.id;
        let mut state = self.state.lock().await;
        state.check_failure(ride_id)?;
        state.check_geo_failure(update.geo.as_ref())?;

        state.rides.insert(ride_id, update.ride.clone());
        state.efforts.insert(ride_id, update.efforts.clone());
        if let Some(geo) = &update.geo {
            state.geo.insert(ride_id, geo.clone());
        }

        if let PrimaryPhotoUpdate::Replace(primary) = &update.primary_photo {
            let photos = state.photos.entry(ride_id).or_default();
            photos.retain(|p| !p.primary);
            if let Some(photo) = primary {
                photos.push(photo.clone());
            }
        }
        Ok(())
    }

    async fn apply_track(&self, update: &TrackUpdate) -> Result<()> {
        self.count_write();
        let ride_id = update.ride_id;
        let mut state = self.state.lock().await;
        state.check_failure(ride_id)?;
        state.check_geo_failure(update.geo.as_ref())?;
        if !state.rides.contains_key(&ride_id) {
            return Err(AppError::NotFound(format!("Ride {}", ride_id)));
        }

        match &update.track {
            Some(track) => state.tracks.insert(ride_id, track.clone()),
            None => state.tracks.remove(&ride_id),
        };
        if let Some(geo) = &update.geo {
            state.geo.insert(ride_id, geo.clone());
        }
        if let Some(ride) = state.rides.get_mut(&ride_id) {
            ride.track = update.flag();
        }
        Ok(())
    }

    async fn apply_photo_changes(&self, changes: &PhotoChanges) -> Result<()> {
        self.count_write();
        let ride_id = changes.ride_id;
        let mut state = self.state.lock().await;
        state.check_failure(ride_id)?;
        if !state.rides.contains_key(&ride_id) {
            return Err(AppError::NotFound(format!("Ride {}", ride_id)));
        }

        let photos = state.photos.entry(ride_id).or_default();
        photos.retain(|p| !changes.deletes.contains(&p.id));
        for photo in &changes.upserts {
            match photos.iter_mut().find(|p| p.id == photo.id) {
                Some(existing) => *existing = photo.clone(),
                None => photos.push(photo.clone()),
            }
        }
        if let Some(ride) = state.rides.get_mut(&ride_id) {
            ride.photos = WorkflowFlag::Done;
        }
        Ok(())
    }
}
