// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Work queue abstraction and the activity-update message format.
//!
//! Semantics follow a visibility-timeout queue: a reserved job is hidden
//! for a time-to-run and comes back if nobody deletes it (at-least-once).

use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// How long a reserved job stays hidden before it is handed out again.
pub const DEFAULT_TIME_TO_RUN: Duration = Duration::from_secs(120);

/// A reserved job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub body: String,
}

/// Queue operations used by the webhook (producer) and subscriber (consumer).
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueue a job that becomes visible after `delay`.
    async fn put(&self, body: String, delay: Duration) -> Result<()>;

    /// Wait up to `timeout` for a visible job. `None` on timeout.
    async fn reserve(&self, timeout: Duration) -> Result<Option<Job>>;

    /// Acknowledge: remove the job for good.
    async fn delete(&self, job: &Job) -> Result<()>;

    /// Return a reserved job to the queue, visible again after `delay`.
    async fn release(&self, job: &Job, delay: Duration) -> Result<()>;
}

/// What happened to an activity upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Queue message for a single activity change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityUpdate {
    pub athlete_id: u64,
    pub activity_id: u64,
    pub operation: Operation,
}

impl ActivityUpdate {
    pub fn to_body(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| AppError::Queue(e.to_string()))
    }

    pub fn from_body(body: &str) -> Result<Self> {
        serde_json::from_str(body)
            .map_err(|e| AppError::Queue(format!("Malformed activity update {:?}: {}", body, e)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryQueue - in-process queue on tokio time
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Entry {
    job: Job,
    visible_at: Instant,
}

/// In-process [`WorkQueue`] for tests.
#[derive(Debug)]
pub struct MemoryQueue {
    entries: Mutex<Vec<Entry>>,
    notify: Notify,
    time_to_run: Duration,
    next_id: std::sync::atomic::AtomicU64,
}

impl MemoryQueue {
    pub fn new(time_to_run: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            notify: Notify::new(),
            time_to_run,
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Jobs still in the queue, reserved or not.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Jobs that could be reserved right now.
    pub async fn visible_count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.visible_at <= now)
            .count()
    }

    async fn set_visible_at(&self, job: &Job, visible_at: Instant) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.job.id == job.id)
            .ok_or_else(|| AppError::Queue(format!("Job {} no longer queued", job.id)))?;
        entry.visible_at = visible_at;
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn put(&self, body: String, delay: Duration) -> Result<()> {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            .to_string();
        self.entries.lock().await.push(Entry {
            job: Job { id, body },
            visible_at: Instant::now() + delay,
        });
        self.notify.notify_waiters();
        Ok(())
    }

    async fn reserve(&self, timeout: Duration) -> Result<Option<Job>> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            let wake_at = {
                let mut entries = self.entries.lock().await;
                let now = Instant::now();
                let next = entries
                    .iter_mut()
                    .filter(|e| e.visible_at <= now)
                    .min_by_key(|e| e.visible_at);
                if let Some(entry) = next {
                    entry.visible_at = now + self.time_to_run;
                    return Ok(Some(entry.job.clone()));
                }
                entries
                    .iter()
                    .map(|e| e.visible_at)
                    .min()
                    .map_or(deadline, |t| t.min(deadline))
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(&self, job: &Job) -> Result<()> {
        self.entries.lock().await.retain(|e| e.job.id != job.id);
        Ok(())
    }

    async fn release(&self, job: &Job, delay: Duration) -> Result<()> {
        self.set_visible_at(job, Instant::now() + delay).await?;
        self.notify.notify_waiters();
        Ok(())
    }
}
