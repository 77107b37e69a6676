// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Non-primary photo sync.
//!
//! The primary photo comes with activity detail; the rest need the photo
//! listing endpoint and are reconciled by photo id.

use crate::db::{PendingQuery, PhotoChanges, SyncStore};
use crate::error::Result;
use crate::models::{Ride, RidePhoto, WorkflowDimension};
use crate::services::credentials::CredentialManager;
use crate::services::detail::{EnrichReport, Enriched};
use crate::services::strava::StravaPhoto;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Pixel size requested from the photo listing.
pub const PHOTO_SIZE: u32 = 1000;

/// Caption keyword that keeps a photo out of the gallery.
const EXCLUDE_CAPTION_KEYWORD: &str = "#nobafs";

/// Work out which non-primary rows to add, update and delete so the stored
/// set matches `listed`.
pub fn reconcile_photos(ride_id: u64, stored: &[RidePhoto], listed: &[StravaPhoto]) -> PhotoChanges {
    let size_key = PHOTO_SIZE.to_string();
    let primary_ids: HashSet<&str> = stored
        .iter()
        .filter(|p| p.primary)
        .map(|p| p.id.as_str())
        .collect();
    let mut remaining: HashMap<&str, &RidePhoto> = stored
        .iter()
        .filter(|p| !p.primary)
        .map(|p| (p.id.as_str(), p))
        .collect();

    let mut changes = PhotoChanges {
        ride_id,
        ..Default::default()
    };

    for photo in listed {
        let Some(large) = photo.urls.as_ref().and_then(|u| u.get(&size_key)) else {
            tracing::warn!(ride_id, unique_id = ?photo.unique_id, size = PHOTO_SIZE, "Photo has no URL at requested size (skipping)");
            continue;
        };
        if photo
            .caption
            .as_deref()
            .is_some_and(|c| c.to_lowercase().contains(EXCLUDE_CAPTION_KEYWORD))
        {
            continue;
        }
        let Some(unique_id) = photo.unique_id.as_deref() else {
            tracing::warn!(ride_id, "Photo has no unique id (skipping)");
            continue;
        };
        if primary_ids.contains(unique_id) {
            continue;
        }

        let row = match remaining.remove(unique_id) {
            Some(existing) => RidePhoto {
                img_l: Some(large.clone()),
                caption: photo.caption.clone(),
                ..existing.clone()
            },
            None => {
                tracing::info!(ride_id, unique_id, caption = ?photo.caption, "Adding photo");
                RidePhoto {
                    id: unique_id.to_string(),
                    ride_id,
                    primary: false,
                    source: photo.source,
                    reference: photo.reference.clone(),
                    img_l: Some(large.clone()),
                    img_t: None,
                    caption: photo.caption.clone(),
                }
            }
        };
        changes.upserts.push(row);
    }

    changes.deletes = remaining.into_keys().map(str::to_string).collect();
    changes.deletes.sort();
    changes
}

/// Syncs non-primary photos for rides with `photos = Pending`.
#[derive(Clone)]
pub struct PhotoSync {
    credentials: CredentialManager,
    store: Arc<dyn SyncStore>,
}

impl PhotoSync {
    pub fn new(credentials: CredentialManager, store: Arc<dyn SyncStore>) -> Self {
        Self { credentials, store }
    }

    /// Sync photos for pending rides, or every non-private ride with `force`.
    pub async fn sync_photos(
        &self,
        athlete_id: Option<u64>,
        activity_id: Option<u64>,
        force: bool,
    ) -> Result<EnrichReport> {
        let mut query = PendingQuery::new(WorkflowDimension::Photos);
        query.athlete_id = athlete_id;
        query.ride_id = activity_id;
        query.include_all = force;

        let rides = self.store.list_pending(&query).await?;
        let mut report = EnrichReport {
            selected: rides.len(),
            ..Default::default()
        };

        for ride in rides {
            tracing::info!(ride_id = ride.id, "Writing out photos");
            match self.sync_ride(&ride).await {
                Ok(()) => report.record(Enriched::Done),
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        ride_id = ride.id,
                        athlete_id = ride.athlete_id,
                        error = %e,
                        "Error fetching/writing non-primary photos"
                    );
                }
            }
        }
        Ok(report)
    }

    async fn sync_ride(&self, ride: &Ride) -> Result<()> {
        let client = self.credentials.client_for(ride.athlete_id).await?;
        let listed = client.get_activity_photos(ride.id, PHOTO_SIZE).await?;
        let stored = self.store.list_photos(ride.id).await?;

        let changes = reconcile_photos(ride.id, &stored, &listed);
        for id in &changes.deletes {
            tracing::info!(ride_id = ride.id, photo_id = %id, "Deleting removed photo");
        }
        self.store.apply_photo_changes(&changes).await
    }
}
