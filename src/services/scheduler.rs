// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Periodic bulk jobs.
//!
//! Each job runs on its own interval task. Cancelling the shutdown token
//! stops the tasks between runs; a run that has started always completes.

use crate::config::Config;
use crate::services::detail::EnrichOptions;
use crate::services::SyncServices;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Runs reconciliation and enrichment on fixed intervals.
pub struct SyncScheduler {
    services: SyncServices,
    shards: u64,
    activity_interval: Duration,
    detail_interval: Duration,
    stream_interval: Duration,
    photo_interval: Duration,
}

impl SyncScheduler {
    pub fn new(services: SyncServices, config: &Config) -> Self {
        Self {
            services,
            shards: config.sync_shards.max(1),
            activity_interval: config.activity_sync_interval,
            detail_interval: config.detail_sync_interval,
            stream_interval: config.stream_sync_interval,
            photo_interval: config.photo_sync_interval,
        }
    }

    /// Spawn one task per job. Await the returned set after cancelling
    /// `shutdown` to let running jobs finish.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinSet<()> {
        let mut tasks = JoinSet::new();

        let reconciler = self.services.reconciler.clone();
        let shards = self.shards;
        let mut segment = 0;
        tasks.spawn(run_periodic(
            "sync-activities",
            self.activity_interval,
            shutdown.clone(),
            move || {
                let reconciler = reconciler.clone();
                let current = segment;
                segment = (segment + 1) % shards;
                async move {
                    match reconciler.sync_shard(shards, current).await {
                        Ok(report) => tracing::info!(shard = current, ?report, "Activity sync finished"),
                        Err(e) => tracing::warn!(shard = current, error = %e, "Activity sync did not run"),
                    }
                }
            },
        ));

        let detail = self.services.detail.clone();
        tasks.spawn(run_periodic(
            "sync-details",
            self.detail_interval,
            shutdown.clone(),
            move || {
                let detail = detail.clone();
                async move {
                    match detail.sync_details(EnrichOptions::default()).await {
                        Ok(report) => tracing::info!(?report, "Detail sync finished"),
                        Err(e) => tracing::error!(error = %e, "Detail sync failed"),
                    }
                }
            },
        ));

        let streams = self.services.streams.clone();
        tasks.spawn(run_periodic(
            "sync-streams",
            self.stream_interval,
            shutdown.clone(),
            move || {
                let streams = streams.clone();
                async move {
                    match streams.sync_streams(EnrichOptions::default()).await {
                        Ok(report) => tracing::info!(?report, "Stream sync finished"),
                        Err(e) => tracing::error!(error = %e, "Stream sync failed"),
                    }
                }
            },
        ));

        let photos = self.services.photos.clone();
        tasks.spawn(run_periodic(
            "sync-photos",
            self.photo_interval,
            shutdown,
            move || {
                let photos = photos.clone();
                async move {
                    match photos.sync_photos(None, None, false).await {
                        Ok(report) => tracing::info!(?report, "Photo sync finished"),
                        Err(e) => tracing::error!(error = %e, "Photo sync failed"),
                    }
                }
            },
        ));

        tasks
    }
}

/// Invoke `job` every `period` until `shutdown` is cancelled. Ticks missed
/// while a run is in progress are skipped, not queued.
async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    // tokio::time::interval panics on a zero period
    let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(job = name, period_secs = period.as_secs(), "Scheduled job");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tracing::debug!(job = name, "Running scheduled job");
        job().await;
    }
    tracing::info!(job = name, "Scheduled job stopped");
}
