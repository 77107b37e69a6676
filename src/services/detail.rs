// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity detail enrichment.
//!
//! A detail fetch refreshes the ride's basic fields, replaces its segment
//! efforts and (usually) its primary photo, and marks `detail = Done`, all
//! in one store write. A failure leaves the ride Pending for the next pass.

use crate::config::{CompetitionWindow, Config};
use crate::db::{DetailUpdate, PendingQuery, PrimaryPhotoUpdate, SyncStore};
use crate::error::{AppError, Result};
use crate::models::{Ride, RideGeo, RidePhoto, SegmentEffort, WorkflowDimension, WorkflowFlag};
use crate::services::cache::{CachingFetcher, FetchPolicy};
use crate::services::credentials::CredentialManager;
use crate::services::rides::{activity_geo, prepare_ride, EligibilityRules};
use crate::services::strava::{StravaActivity, StravaPrimaryPhoto, PHOTO_SOURCE_NATIVE};
use std::collections::HashSet;
use std::sync::Arc;

/// Options shared by the bulk enrichment jobs.
#[derive(Debug, Clone, Copy)]
pub struct EnrichOptions {
    pub athlete_id: Option<u64>,
    /// Process rides regardless of their flag.
    pub rewrite: bool,
    pub max_records: Option<usize>,
    pub policy: FetchPolicy,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            athlete_id: None,
            rewrite: false,
            max_records: None,
            policy: FetchPolicy::cached(),
        }
    }
}

impl EnrichOptions {
    pub(crate) fn query(&self, dimension: WorkflowDimension) -> PendingQuery {
        let mut query = PendingQuery::new(dimension);
        query.athlete_id = self.athlete_id;
        query.include_all = self.rewrite;
        query.limit = self.max_records;
        query
    }
}

/// Counts from a bulk enrichment run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichReport {
    pub selected: usize,
    pub done: usize,
    pub not_applicable: usize,
    /// Cache misses under cache-only, and rides of athletes whose token failed
    pub skipped: usize,
    pub failed: usize,
}

/// Outcome of enriching one ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enriched {
    Done,
    NotApplicable,
    Skipped,
}

impl EnrichReport {
    pub(crate) fn record(&mut self, outcome: Enriched) {
        match outcome {
            Enriched::Done => self.done += 1,
            Enriched::NotApplicable => self.not_applicable += 1,
            Enriched::Skipped => self.skipped += 1,
        }
    }
}

/// Thumbnail URL up to the `/` before `media?size=X`, which is the
/// external page for the photo.
pub fn external_photo_ref(thumbnail_url: &str) -> Option<String> {
    let idx = thumbnail_url.rfind("media?size=")?;
    let (prefix, size) = thumbnail_url.split_at(idx);
    if prefix.ends_with('/') && prefix.len() > 1 && size.len() == "media?size=".len() + 1 {
        Some(prefix.to_string())
    } else {
        None
    }
}

/// Build the primary photo row for a ride, if the primary photo has URLs.
pub fn primary_photo_row(ride_id: u64, photo: &StravaPrimaryPhoto) -> Result<Option<RidePhoto>> {
    let Some(urls) = photo.urls.as_ref() else {
        tracing::warn!(ride_id, "Primary photo present but has no URLs (skipping)");
        return Ok(None);
    };
    let img_l = urls.get("600").cloned();
    let img_t = urls.get("100").cloned();

    let (id, reference) = if photo.source == PHOTO_SOURCE_NATIVE {
        let id = photo.unique_id.clone().ok_or_else(|| {
            AppError::DataEntry(format!("Native primary photo on {} has no unique_id", ride_id))
        })?;
        (id, None)
    } else {
        let id = photo.id.ok_or_else(|| {
            AppError::DataEntry(format!("External primary photo on {} has no id", ride_id))
        })?;
        (id.to_string(), img_t.as_deref().and_then(external_photo_ref))
    };

    Ok(Some(RidePhoto {
        id,
        ride_id,
        primary: true,
        source: photo.source,
        reference,
        img_l,
        img_t,
        caption: None,
    }))
}

/// Decide what happens to the primary photo on a detail write.
///
/// Several external photos make the primary ambiguous; those are left to
/// the non-primary photo sync.
pub fn primary_photo_update(activity: &StravaActivity) -> Result<PrimaryPhotoUpdate> {
    if activity.total_photo_count == 0 {
        tracing::debug!(ride_id = activity.id, "No photos");
        return Ok(PrimaryPhotoUpdate::Keep);
    }
    if activity.photo_count > 1 {
        tracing::debug!(ride_id = activity.id, "Multiple external photos, not touching primary");
        return Ok(PrimaryPhotoUpdate::Keep);
    }

    let primary = activity.photos.as_ref().and_then(|p| p.primary.as_ref());
    let row = match primary {
        Some(photo) => primary_photo_row(activity.id, photo)?,
        None => None,
    };
    Ok(PrimaryPhotoUpdate::Replace(row))
}

fn segment_efforts(activity: &StravaActivity) -> Vec<SegmentEffort> {
    activity
        .segment_efforts
        .iter()
        .map(|se| SegmentEffort {
            id: se.id,
            ride_id: activity.id,
            elapsed_time: se.elapsed_time,
            segment_name: se.segment.name.clone(),
            segment_id: se.segment.id,
        })
        .collect()
}

/// Fills in `detail = Pending` rides from Strava activity detail.
#[derive(Clone)]
pub struct DetailEnricher {
    credentials: CredentialManager,
    store: Arc<dyn SyncStore>,
    fetcher: CachingFetcher,
    rules: EligibilityRules,
    window: CompetitionWindow,
}

impl DetailEnricher {
    pub fn new(
        credentials: CredentialManager,
        store: Arc<dyn SyncStore>,
        fetcher: CachingFetcher,
        config: &Config,
    ) -> Self {
        Self {
            credentials,
            store,
            fetcher,
            rules: EligibilityRules::new(&config.exclude_keywords),
            window: config.window.clone(),
        }
    }

    /// Enrich every selected ride. Per-ride failures are logged and counted.
    pub async fn sync_details(&self, options: EnrichOptions) -> Result<EnrichReport> {
        let rides = self
            .store
            .list_pending(&options.query(WorkflowDimension::Detail))
            .await?;
        let mut report = EnrichReport {
            selected: rides.len(),
            ..Default::default()
        };
        tracing::info!(count = rides.len(), athlete_id = ?options.athlete_id, "Fetching activity details");

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
                        "Error fetching/writing activity detail"
                    );
                }
            }
        }
        Ok(report)
    }

    async fn enrich_ride(&self, ride: &Ride, policy: FetchPolicy) -> Result<Enriched> {
        let client = self.credentials.client_for(ride.athlete_id).await?;
        let Some(activity) = self
            .fetcher
            .fetch::<StravaActivity>(&client, ride.id, policy)
            .await?
        else {
            if policy.only_cache {
                tracing::info!(ride_id = ride.id, "No cached detail (skipping)");
                return Ok(Enriched::Skipped);
            }
            return Err(AppError::ActivityNotFound(format!("Activity {}", ride.id)));
        };

        self.store_detail(Some(ride.clone()), ride.athlete_id, &activity, None)
            .await?;
        Ok(Enriched::Done)
    }

    /// Fetch one activity from Strava (bypassing cache reads) and store its
    /// detail. Used by the queue subscriber for create/update events.
    pub async fn fetch_and_store_detail(&self, athlete_id: u64, activity_id: u64) -> Result<()> {
        tracing::info!(athlete_id, activity_id, "Fetching detailed activity");
        let client = self.credentials.client_for(athlete_id).await?;
        let activity = self
            .fetcher
            .fetch::<StravaActivity>(&client, activity_id, FetchPolicy::remote())
            .await?
            .ok_or_else(|| {
                AppError::ActivityNotFound(format!(
                    "Activity {} for athlete {}",
                    activity_id, athlete_id
                ))
            })?;

        self.rules
            .check_in_window(
                &activity,
                self.window.local_start(),
                self.window.local_cutoff(),
            )
            .map_err(|reason| {
                AppError::IneligibleActivity(format!("Activity {}: {}", activity_id, reason))
            })?;

        let existing = self.store.get_ride(activity_id).await?;
        self.store_detail(existing, athlete_id, &activity, activity_geo(&activity))
            .await
    }

    async fn store_detail(
        &self,
        existing: Option<Ride>,
        athlete_id: u64,
        activity: &StravaActivity,
        geo: Option<RideGeo>,
    ) -> Result<()> {
        let mut ride = prepare_ride(existing, activity, athlete_id)?.ride;
        ride.detail = WorkflowFlag::Done;

        let update = DetailUpdate {
            efforts: segment_efforts(activity),
            primary_photo: primary_photo_update(activity)?,
            ride,
            geo,
        };
        self.store.apply_detail(&update).await?;

        tracing::info!(
            ride_id = activity.id,
            efforts = update.efforts.len(),
            "Stored activity detail"
        );
        Ok(())
    }
}
