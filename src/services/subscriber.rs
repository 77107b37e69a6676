// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Queue-driven activity updates.
//!
//! Each message names one activity and what happened to it. Handling reuses
//! the bulk enrichment write paths. Outcomes:
//! - success: delete the job, then sleep the throttle interval
//! - terminal error (activity gone or ineligible): log, delete
//! - anything else: release with the requeue delay and count the error

use crate::config::Config;
use crate::db::SyncStore;
use crate::error::Result;
use crate::services::detail::DetailEnricher;
use crate::services::queue::{ActivityUpdate, Job, Operation, WorkQueue};
use crate::services::streams::StreamEnricher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pause after a failed reservation before polling again.
const RESERVE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// What happened to a reserved job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handled and acknowledged.
    Processed,
    /// Terminal error; acknowledged without retry.
    Dropped,
    /// Transient error; returned to the queue with a delay.
    Requeued,
}

/// Consumes [`ActivityUpdate`] messages from the work queue.
pub struct UpdateSubscriber {
    queue: Arc<dyn WorkQueue>,
    store: Arc<dyn SyncStore>,
    detail: DetailEnricher,
    streams: StreamEnricher,
    requeue_delay: Duration,
    throttle_delay: Duration,
    reserve_timeout: Duration,
    errors: AtomicU64,
}

impl UpdateSubscriber {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn SyncStore>,
        detail: DetailEnricher,
        streams: StreamEnricher,
        config: &Config,
    ) -> Self {
        Self {
            queue,
            store,
            detail,
            streams,
            requeue_delay: config.requeue_delay,
            throttle_delay: config.throttle_delay,
            reserve_timeout: config.reserve_timeout,
            errors: AtomicU64::new(0),
        }
    }

    /// Messages that failed and were requeued since start.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Reserve and process one job. `Ok(None)` when the reservation timed out.
    pub async fn process_next(&self) -> Result<Option<Outcome>> {
        match self.queue.reserve(self.reserve_timeout).await? {
            Some(job) => self.process(job).await.map(Some),
            None => {
                tracing::debug!("No activity updates within reservation timeout");
                Ok(None)
            }
        }
    }

    /// Handle a reserved job and settle it with the queue.
    pub async fn process(&self, job: Job) -> Result<Outcome> {
        tracing::info!(job_id = %job.id, body = %job.body, "Received message");
        match self.handle_body(&job.body).await {
            Ok(()) => {
                self.queue.delete(&job).await?;
                Ok(Outcome::Processed)
            }
            Err(e) if e.is_terminal() => {
                tracing::info!(job_id = %job.id, reason = %e, "Dropping activity update");
                self.queue.delete(&job).await?;
                Ok(Outcome::Dropped)
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    job_id = %job.id,
                    error = %e,
                    requeue_delay_secs = self.requeue_delay.as_secs(),
                    "Error processing message, requeueing"
                );
                self.queue.release(&job, self.requeue_delay).await?;
                Ok(Outcome::Requeued)
            }
        }
    }

    async fn handle_body(&self, body: &str) -> Result<()> {
        let update = ActivityUpdate::from_body(body)?;
        self.handle_message(&update).await
    }

    /// Apply one activity update.
    pub async fn handle_message(&self, update: &ActivityUpdate) -> Result<()> {
        tracing::info!(
            athlete_id = update.athlete_id,
            activity_id = update.activity_id,
            operation = ?update.operation,
            "Processing activity update"
        );

        if self.store.get_athlete(update.athlete_id).await?.is_none() {
            tracing::warn!(
                athlete_id = update.athlete_id,
                activity_id = update.activity_id,
                "Athlete not found, ignoring activity update"
            );
            return Ok(());
        }

        match update.operation {
            Operation::Delete => {
                let deleted = self
                    .store
                    .delete_ride(update.athlete_id, update.activity_id)
                    .await?;
                if deleted {
                    tracing::info!(activity_id = update.activity_id, "Deleted ride");
                } else {
                    tracing::warn!(
                        athlete_id = update.athlete_id,
                        activity_id = update.activity_id,
                        "Unable to find ride to delete"
                    );
                }
            }
            Operation::Update => {
                // Streams are assumed unchanged by an edit.
                self.detail
                    .fetch_and_store_detail(update.athlete_id, update.activity_id)
                    .await?;
            }
            Operation::Create => {
                self.detail
                    .fetch_and_store_detail(update.athlete_id, update.activity_id)
                    .await?;
                self.streams
                    .fetch_and_store_streams(update.athlete_id, update.activity_id)
                    .await?;
            }
        }
        Ok(())
    }

    /// Process messages until `shutdown` is cancelled. A job that has been
    /// reserved is always settled before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!("Activity update subscriber started");
        loop {
            let reserved = tokio::select! {
                _ = shutdown.cancelled() => break,
                reserved = self.queue.reserve(self.reserve_timeout) => reserved,
            };

            let job = match reserved {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "Queue reservation failed");
                    pause(&shutdown, RESERVE_ERROR_BACKOFF).await;
                    continue;
                }
            };

            match self.process(job).await {
                Ok(Outcome::Processed | Outcome::Dropped) => {
                    pause(&shutdown, self.throttle_delay).await;
                }
                Ok(Outcome::Requeued) => {}
                // The job reappears once its reservation lapses.
                Err(e) => tracing::error!(error = %e, "Failed to settle job with queue"),
            }
        }
        tracing::info!(errors = self.error_count(), "Activity update subscriber stopped");
    }
}

async fn pause(shutdown: &CancellationToken, duration: Duration) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}
