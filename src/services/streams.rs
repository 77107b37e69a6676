// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! GPS track enrichment from activity streams.

use crate::db::{SyncStore, TrackUpdate};
use crate::error::{AppError, Result};
use crate::models::{GeoPoint, Ride, RideGeo, RideTrack, WorkflowDimension};
use crate::services::cache::{CachingFetcher, FetchPolicy};
use crate::services::credentials::CredentialManager;
use crate::services::detail::{EnrichOptions, EnrichReport, Enriched};
use crate::services::strava::StreamSet;
use geo::Coord;
use std::collections::HashSet;
use std::sync::Arc;

/// Polyline precision for stored tracks.
const POLYLINE_PRECISION: u32 = 5;

/// Build a track from streams. `Ok(None)` when there are fewer than two GPS
/// points, since no line exists then.
pub fn build_track(ride_id: u64, streams: &StreamSet) -> Result<Option<RideTrack>> {
    let points = streams.latlng().unwrap_or_default();
    if points.len() < 2 {
        return Ok(None);
    }

    let coords = points.iter().map(|[lat, lon]| Coord { x: *lon, y: *lat });
    let gps_track = polyline::encode_coordinates(coords, POLYLINE_PRECISION)
        .map_err(|e| AppError::DataEntry(format!("Cannot encode track for {}: {}", ride_id, e)))?;

    Ok(Some(RideTrack {
        ride_id,
        gps_track,
        point_count: points.len(),
        elevation_stream: streams.altitude(),
        time_stream: streams.time(),
    }))
}

/// Fill in start/end points from the track ends when not already known.
pub fn geo_from_streams(
    ride_id: u64,
    streams: &StreamSet,
    existing: Option<RideGeo>,
) -> Option<RideGeo> {
    if existing.as_ref().is_some_and(RideGeo::is_complete) {
        return None;
    }
    let points = streams.latlng()?;
    let first = points.first().and_then(|p| GeoPoint::from_latlng(p));
    let last = points.last().and_then(|p| GeoPoint::from_latlng(p));

    let existing = existing.unwrap_or(RideGeo {
        ride_id,
        start_geo: None,
        end_geo: None,
    });
    Some(RideGeo {
        ride_id,
        start_geo: existing.start_geo.or(first),
        end_geo: existing.end_geo.or(last),
    })
}

/// Fills in `track = Pending` rides from activity streams.
#[derive(Clone)]
pub struct StreamEnricher {
    credentials: CredentialManager,
    store: Arc<dyn SyncStore>,
    fetcher: CachingFetcher,
}

impl StreamEnricher {
    pub fn new(
        credentials: CredentialManager,
        store: Arc<dyn SyncStore>,
        fetcher: CachingFetcher,
    ) -> Self {
        Self {
            credentials,
            store,
            fetcher,
        }
    }

    /// Fetch tracks for every selected ride. Manual rides are never selected.
    pub async fn sync_streams(&self, options: EnrichOptions) -> Result<EnrichReport> {
        let mut query = options.query(WorkflowDimension::Track);
        query.exclude_manual = true;
        let rides = self.store.list_pending(&query).await?;
        let mut report = EnrichReport {
            selected: rides.len(),
            ..Default::default()
        };
        tracing::info!(count = rides.len(), athlete_id = ?options.athlete_id, "Fetching GPS tracks");

        let mut revoked = HashSet::new();
        for ride in rides {
            if revoked.contains(&ride.athlete_id) {
                report.record(Enriched::Skipped);
                continue;
            }
            match self.enrich_ride(&ride, options.policy).await {
                Ok(outcome) => report.record(outcome),
                Err(e) if e.is_authorization_error() => {
                    report.failed += 1;
                    tracing::error!(athlete_id = ride.athlete_id, error = %e, "Invalid authorization, removing token");
                    revoked.insert(ride.athlete_id);
                    if let Err(e) = self.credentials.revoke(ride.athlete_id).await {
                        tracing::error!(athlete_id = ride.athlete_id, error = %e, "Failed to clear access token");
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        ride_id = ride.id,
                        athlete_id = ride.athlete_id,
                        error = %e,
                        "Error fetching/writing activity streams"
                    );
                }
            }
        }
        Ok(report)
    }

    async fn enrich_ride(&self, ride: &Ride, policy: FetchPolicy) -> Result<Enriched> {
        let client = self.credentials.client_for(ride.athlete_id).await?;
        match self.fetcher.fetch::<StreamSet>(&client, ride.id, policy).await? {
            Some(streams) => self.store_streams(ride.id, &streams).await,
            None => {
                tracing::debug!(ride_id = ride.id, "No streams (skipping)");
                Ok(Enriched::Skipped)
            }
        }
    }

    /// Fetch and store streams for one ride (queue path). The ride must
    /// already be stored; until then this is a retryable error.
    pub async fn fetch_and_store_streams(&self, athlete_id: u64, activity_id: u64) -> Result<()> {
        tracing::info!(athlete_id, activity_id, "Fetching activity streams");
        if self.store.get_ride(activity_id).await?.is_none() {
            return Err(AppError::Internal(anyhow::anyhow!(
                "Cannot load streams for {} before fetching activity",
                activity_id
            )));
        }

        let client = self.credentials.client_for(athlete_id).await?;
        let streams = self
            .fetcher
            .fetch::<StreamSet>(&client, activity_id, FetchPolicy::remote())
            .await?
            .ok_or_else(|| {
                AppError::ActivityNotFound(format!(
                    "Streams for activity {}, athlete {}",
                    activity_id, athlete_id
                ))
            })?;

        self.store_streams(activity_id, &streams).await?;
        Ok(())
    }

    async fn store_streams(&self, ride_id: u64, streams: &StreamSet) -> Result<Enriched> {
        let update = match build_track(ride_id, streams)? {
            Some(track) => {
                let existing = self.store.get_ride_geo(ride_id).await?;
                TrackUpdate {
                    ride_id,
                    track: Some(track),
                    geo: geo_from_streams(ride_id, streams, existing),
                }
            }
            // Also drops a track stored before an upstream edit.
            None => TrackUpdate {
                ride_id,
                track: None,
                geo: None,
            },
        };
        self.store.apply_track(&update).await?;

        match &update.track {
            Some(track) => {
                tracing::info!(ride_id, points = track.point_count, "Stored GPS track");
                Ok(Enriched::Done)
            }
            None => {
                tracing::info!(ride_id, "No GPS track for activity");
                Ok(Enriched::NotApplicable)
            }
        }
    }
}
