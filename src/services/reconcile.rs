// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Bulk reconciliation of remote activity listings against stored rides.
//!
//! For one athlete and window: list remote rides, write the new ones (or all
//! of them under `rewrite`), and delete stored rides that Strava no longer
//! lists. A failing record is recorded as a [`RideError`] and skipped; it
//! never stops the rest of the batch.

use crate::config::{CompetitionWindow, Config};
use crate::db::SyncStore;
use crate::error::{AppError, Result};
use crate::models::{Athlete, RideError};
use crate::services::credentials::CredentialManager;
use crate::services::rides::{EligibilityRules, RideWriter};
use crate::services::strava::StravaActivity;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

/// Options for a reconciliation run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    /// Rewrite rides that are already stored (no extra API calls).
    pub rewrite: bool,
    /// Run after the competition closed and skip the end-time check.
    pub force: bool,
}

/// Counts from a reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub athletes: usize,
    /// Athletes whose pass failed outright (token or listing failure)
    pub athlete_failures: usize,
    pub listed: usize,
    pub eligible: usize,
    pub new: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub removed: usize,
}

impl ReconcileReport {
    fn merge(&mut self, other: &ReconcileReport) {
        self.athletes += other.athletes;
        self.athlete_failures += other.athlete_failures;
        self.listed += other.listed;
        self.eligible += other.eligible;
        self.new += other.new;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.removed += other.removed;
    }
}

/// Diffs remote listings against stored rides.
#[derive(Clone)]
pub struct ActivityReconciler {
    credentials: CredentialManager,
    store: Arc<dyn SyncStore>,
    writer: RideWriter,
    rules: EligibilityRules,
    window: CompetitionWindow,
}

impl ActivityReconciler {
    pub fn new(credentials: CredentialManager, store: Arc<dyn SyncStore>, config: &Config) -> Self {
        Self {
            credentials,
            writer: RideWriter::new(store.clone()),
            store,
            rules: EligibilityRules::new(&config.exclude_keywords),
            window: config.window.clone(),
        }
    }

    /// The configured competition window.
    pub fn window(&self) -> &CompetitionWindow {
        &self.window
    }

    /// Reconcile one athlete's rides within `window`.
    ///
    /// Token and listing failures are returned; per-record failures are not.
    pub async fn reconcile(
        &self,
        athlete_id: u64,
        window: &CompetitionWindow,
        options: ReconcileOptions,
    ) -> Result<ReconcileReport> {
        let client = self.credentials.client_for(athlete_id).await?;
        let listing = client.list_activities_after(window.start.timestamp()).await?;

        let cutoff = (!options.force).then(|| window.local_cutoff());
        let mut report = ReconcileReport {
            athletes: 1,
            listed: listing.len(),
            ..Default::default()
        };

        let remote: Vec<StravaActivity> = listing
            .into_iter()
            .filter(|activity| match self.rules.check(activity, cutoff) {
                Ok(()) => true,
                Err(reason) => {
                    tracing::info!(
                        athlete_id,
                        ride_id = activity.id,
                        name = %activity.name,
                        reason = %reason,
                        "Skipping ineligible activity"
                    );
                    false
                }
            })
            .collect();
        report.eligible = remote.len();

        let stored_ids: HashSet<u64> = self
            .store
            .list_rides_since(athlete_id, window.local_start())
            .await?
            .into_iter()
            .map(|ride| ride.id)
            .collect();
        let remote_ids: HashSet<u64> = remote.iter().map(|a| a.id).collect();

        let total = remote.len();
        for (i, activity) in remote.iter().enumerate() {
            let is_new = !stored_ids.contains(&activity.id);
            if !is_new && !options.rewrite {
                tracing::debug!(
                    ride_id = activity.id,
                    position = i + 1,
                    total,
                    "Skipping existing ride"
                );
                report.skipped += 1;
                continue;
            }

            match self.writer.write_ride(athlete_id, activity).await {
                Ok(_) => {
                    if is_new {
                        report.new += 1;
                        tracing::info!(
                            ride_id = activity.id,
                            name = %activity.name,
                            position = i + 1,
                            total,
                            "New ride"
                        );
                    } else {
                        report.updated += 1;
                    }
                    self.clear_error(activity.id).await;
                }
                Err(e) => {
                    report.failed += 1;
                    self.record_error(athlete_id, activity, &e).await;
                }
            }
        }

        let mut removed: Vec<u64> = stored_ids.difference(&remote_ids).copied().collect();
        if removed.is_empty() {
            tracing::debug!(athlete_id, "No removed rides");
        } else {
            removed.sort_unstable();
            report.removed = self.store.delete_rides(&removed).await?;
            tracing::info!(
                athlete_id,
                removed = report.removed,
                ride_ids = ?removed,
                "Removed rides no longer listed by Strava"
            );
        }

        Ok(report)
    }

    /// Reconcile every authorized team athlete (or just `athlete_ids`).
    pub async fn sync_rides(
        &self,
        athlete_ids: Option<&[u64]>,
        options: ReconcileOptions,
    ) -> Result<ReconcileReport> {
        self.check_window(options)?;
        let athletes = self.store.list_authorized_athletes(None).await?;
        let athletes = athletes
            .into_iter()
            .filter(|a| athlete_ids.is_none_or(|ids| ids.contains(&a.id)))
            .collect();
        self.sync_athletes(athletes, options).await
    }

    /// Reconcile the athletes in shard `segment` of `shards`.
    pub async fn sync_shard(&self, shards: u64, segment: u64) -> Result<ReconcileReport> {
        let options = ReconcileOptions::default();
        self.check_window(options)?;
        let athletes = self
            .store
            .list_authorized_athletes(Some((shards, segment)))
            .await?;
        tracing::info!(
            shard = segment,
            shards,
            athletes = athletes.len(),
            "Selected athlete shard"
        );
        self.sync_athletes(athletes, options).await
    }

    fn check_window(&self, options: ReconcileOptions) -> Result<()> {
        if options.force || !self.window.is_closed(Utc::now()) {
            return Ok(());
        }
        Err(AppError::Command(
            "Competition end date plus grace period has passed, not syncing rides \
             (use force to override)"
                .to_string(),
        ))
    }

    async fn sync_athletes(
        &self,
        athletes: Vec<Athlete>,
        options: ReconcileOptions,
    ) -> Result<ReconcileReport> {
        if options.rewrite {
            tracing::info!("Rewriting existing ride data");
        }

        let mut total = ReconcileReport::default();
        for athlete in athletes {
            // Team competition: athletes without a team have nothing to score.
            if athlete.team_id.is_none() {
                tracing::debug!(athlete_id = athlete.id, "Skipping athlete without team");
                continue;
            }

            tracing::info!(athlete_id = athlete.id, name = %athlete.name, "Fetching rides");
            match self.reconcile(athlete.id, &self.window, options).await {
                Ok(report) => total.merge(&report),
                Err(e) if e.is_authorization_error() => {
                    total.athlete_failures += 1;
                    tracing::error!(athlete_id = athlete.id, error = %e, "Invalid authorization, removing token");
                    if let Err(e) = self.credentials.revoke(athlete.id).await {
                        tracing::error!(athlete_id = athlete.id, error = %e, "Failed to clear access token");
                    }
                }
                Err(e) => {
                    total.athlete_failures += 1;
                    tracing::error!(athlete_id = athlete.id, error = %e, "Ride sync failed for athlete");
                }
            }
        }

        tracing::info!(
            athletes = total.athletes,
            new = total.new,
            updated = total.updated,
            failed = total.failed,
            removed = total.removed,
            "Ride sync complete"
        );
        Ok(total)
    }

    async fn record_error(&self, athlete_id: u64, activity: &StravaActivity, error: &AppError) {
        match self.store.get_ride_error(activity.id).await {
            Ok(Some(_)) => {
                tracing::warn!(ride_id = activity.id, error = %error, "Unable to write ride (skipping, seen before)");
            }
            _ => {
                tracing::error!(ride_id = activity.id, error = %error, "Unable to write ride (skipping)");
            }
        }

        let record = RideError {
            id: activity.id,
            athlete_id,
            name: activity.name.clone(),
            start_date: activity.start_date_local,
            reason: error.to_string(),
            last_seen: Utc::now(),
        };
        if let Err(e) = self.store.upsert_ride_error(&record).await {
            tracing::error!(ride_id = activity.id, error = %e, "Failed to record ride error");
        }
    }

    async fn clear_error(&self, ride_id: u64) {
        match self.store.clear_ride_error(ride_id).await {
            Ok(true) => tracing::info!(ride_id, "Removed ride error entry"),
            Ok(false) => {}
            Err(e) => tracing::error!(ride_id, error = %e, "Failed to clear ride error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_merge() {
        let mut total = ReconcileReport::default();
        let one = ReconcileReport {
            athletes: 1,
            listed: 4,
            eligible: 3,
            new: 2,
            removed: 1,
            ..Default::default()
        };
        total.merge(&one);
        total.merge(&one);
        assert_eq!(total.athletes, 2);
        assert_eq!(total.new, 4);
        assert_eq!(total.removed, 2);
    }

    #[test]
    fn test_closed_window_refused_without_force() {
        let store: Arc<dyn SyncStore> = Arc::new(crate::db::MemoryStore::new());
        let mut config = Config::default();
        config.window.end = config.window.start;
        config.window.grace = chrono::Duration::zero();
        let credentials = CredentialManager::new(
            crate::services::strava::StravaClient::from_config(&config),
            store.clone(),
        );
        let reconciler = ActivityReconciler::new(credentials, store, &config);

        assert!(matches!(
            reconciler.check_window(ReconcileOptions::default()),
            Err(AppError::Command(_))
        ));
        assert!(reconciler
            .check_window(ReconcileOptions {
                force: true,
                ..Default::default()
            })
            .is_ok());
    }
}
