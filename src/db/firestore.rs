// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides:
//! - [`SyncStore`] over the athlete/ride collections
//! - [`FirestoreQueue`], a visibility-timeout work queue in `activity_updates`

use super::{
    collections, DetailUpdate, PendingQuery, PhotoChanges, PrimaryPhotoUpdate, SyncStore,
    TrackUpdate,
};
use crate::error::{AppError, Result};
use crate::models::{
    Athlete, AthleteTokens, Ride, RideError, RideGeo, RidePhoto, RideTrack, SegmentEffort,
    WorkflowDimension, WorkflowFlag,
};
use crate::services::queue::{Job, WorkQueue};
use crate::time_utils::{format_local, format_utc_rfc3339};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Firestore limits batch/transaction writes to 500 operations.
// We use a safe limit of 400 to allow headroom.
const BATCH_SIZE: usize = 400;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline client. All database operations return an error.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    async fn get_doc<T>(&self, collection: &str, id: u64) -> Result<Option<T>>
    where
        T: for<'de> Deserialize<'de> + Send,
    {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collection)
            .obj()
            .one(&id.to_string())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn put_doc<T>(&self, collection: &str, id: &str, object: &T) -> Result<()>
    where
        T: Serialize + for<'de> Deserialize<'de> + Send + Sync,
    {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collection)
            .document_id(id)
            .object(object)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Children of a ride stored in a `ride_id`-keyed collection.
    async fn list_children<T>(&self, collection: &str, ride_id: u64) -> Result<Vec<T>>
    where
        T: for<'de> Deserialize<'de> + Send,
    {
        self.get_client()?
            .fluent()
            .select()
            .from(collection)
            .filter(move |q| q.for_all([q.field("ride_id").eq(ride_id)]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete `(collection, document id)` pairs in chunked transactions.
    async fn batch_delete(&self, docs: &[(&'static str, String)]) -> Result<()> {
        let client = self.get_client()?;

        for chunk in docs.chunks(BATCH_SIZE) {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            for (collection, doc_id) in chunk {
                client
                    .fluent()
                    .delete()
                    .from(*collection)
                    .document_id(doc_id)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add deletion to transaction for {}: {}",
                            collection, e
                        ))
                    })?;
            }

            transaction.commit().await.map_err(|e| {
                AppError::Database(format!("Failed to commit batch deletion: {}", e))
            })?;
        }

        Ok(())
    }

    /// Every document belonging to a ride, the ride itself included.
    async fn ride_documents(&self, ride_id: u64) -> Result<Vec<(&'static str, String)>> {
        let id = ride_id.to_string();
        let mut docs = vec![
            (collections::RIDES, id.clone()),
            (collections::RIDE_TRACKS, id.clone()),
            (collections::RIDE_GEO, id.clone()),
            (collections::RIDE_ERRORS, id),
        ];

        let efforts: Vec<SegmentEffort> =
            self.list_children(collections::RIDE_EFFORTS, ride_id).await?;
        docs.extend(
            efforts
                .iter()
                .map(|e| (collections::RIDE_EFFORTS, e.id.to_string())),
        );

        let photos: Vec<RidePhoto> = self.list_children(collections::RIDE_PHOTOS, ride_id).await?;
        docs.extend(photos.into_iter().map(|p| (collections::RIDE_PHOTOS, p.id)));

        Ok(docs)
    }

    fn tx_error(what: &str, e: impl std::fmt::Display) -> AppError {
        AppError::Database(format!("Failed to add {} to transaction: {}", what, e))
    }
}

#[async_trait]
impl SyncStore for FirestoreDb {
    // ─── Athletes ────────────────────────────────────────────────

    async fn get_athlete(&self, athlete_id: u64) -> Result<Option<Athlete>> {
        self.get_doc(collections::ATHLETES, athlete_id).await
    }

    async fn list_authorized_athletes(&self, shard: Option<(u64, u64)>) -> Result<Vec<Athlete>> {
        // Firestore cannot filter on "field is not null" together with a modulus,
        // so the shard is applied client-side.
        let athletes: Vec<Athlete> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::ATHLETES)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(athletes
            .into_iter()
            .filter(|a| a.is_authorized())
            .filter(|a| shard.is_none_or(|(shards, segment)| a.shard(shards) == segment))
            .collect())
    }

    async fn set_athlete_tokens(&self, athlete_id: u64, tokens: &AthleteTokens) -> Result<()> {
        let mut athlete = self
            .get_athlete(athlete_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Athlete {}", athlete_id)))?;
        athlete.access_token = Some(tokens.access_token.clone());
        athlete.refresh_token = Some(tokens.refresh_token.clone());
        athlete.token_expiry = Some(tokens.expires_at);
        self.put_doc(collections::ATHLETES, &athlete_id.to_string(), &athlete)
            .await
    }

    async fn clear_access_token(&self, athlete_id: u64) -> Result<()> {
        let Some(mut athlete) = self.get_athlete(athlete_id).await? else {
            return Ok(());
        };
        athlete.access_token = None;
        self.put_doc(collections::ATHLETES, &athlete_id.to_string(), &athlete)
            .await
    }

    // ─── Rides ───────────────────────────────────────────────────

    async fn get_ride(&self, ride_id: u64) -> Result<Option<Ride>> {
        self.get_doc(collections::RIDES, ride_id).await
    }

    async fn list_rides_since(&self, athlete_id: u64, since: NaiveDateTime) -> Result<Vec<Ride>> {
        let since = format_local(since);
        self.get_client()?
            .fluent()
            .select()
            .from(collections::RIDES)
            .filter(move |q| {
                q.for_all([
                    q.field("athlete_id").eq(athlete_id),
                    q.field("start_date").greater_than_or_equal(since.clone()),
                ])
            })
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list_pending(&self, query: &PendingQuery) -> Result<Vec<Ride>> {
        let flag_field = query.dimension.field_name();
        let filter_query = query.clone();

        let select = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::RIDES)
            .filter(move |q| {
                q.for_all([
                    q.field("private").eq(false),
                    (!filter_query.include_all)
                        .then(|| q.field(flag_field).eq(WorkflowFlag::Pending.as_str()))
                        .flatten(),
                    filter_query
                        .athlete_id
                        .and_then(|id| q.field("athlete_id").eq(id)),
                    filter_query.ride_id.and_then(|id| q.field("id").eq(id)),
                    filter_query
                        .exclude_manual
                        .then(|| q.field("manual").eq(false))
                        .flatten(),
                ])
            });

        let select = match query.limit {
            Some(limit) => select.limit(limit as u32),
            None => select,
        };

        select
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn upsert_ride(&self, ride: &Ride) -> Result<()> {
        self.put_doc(collections::RIDES, &ride.id.to_string(), ride)
            .await
    }

    async fn write_ride_basics(&self, ride: &Ride, geo: Option<&RideGeo>) -> Result<()> {
        let Some(geo) = geo else {
            return self.upsert_ride(ride).await;
        };
        let client = self.get_client()?;
        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        client
            .fluent()
            .update()
            .in_col(collections::RIDES)
            .document_id(ride.id.to_string())
            .object(ride)
            .add_to_transaction(&mut transaction)
            .map_err(|e| Self::tx_error("ride", e))?;
        client
            .fluent()
            .update()
            .in_col(collections::RIDE_GEO)
            .document_id(ride.id.to_string())
            .object(geo)
            .add_to_transaction(&mut transaction)
            .map_err(|e| Self::tx_error("geo", e))?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;
        Ok(())
    }

    async fn set_ride_flag(
        &self,
        ride_id: u64,
        dimension: WorkflowDimension,
        flag: WorkflowFlag,
    ) -> Result<()> {
        let mut ride = self
            .get_ride(ride_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ride {}", ride_id)))?;
        ride.set_flag(dimension, flag);
        self.upsert_ride(&ride).await
    }

    async fn delete_ride(&self, athlete_id: u64, ride_id: u64) -> Result<bool> {
        match self.get_ride(ride_id).await? {
            Some(ride) if ride.athlete_id == athlete_id => {
                let docs = self.ride_documents(ride_id).await?;
                self.batch_delete(&docs).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_rides(&self, ride_ids: &[u64]) -> Result<usize> {
        let mut docs = Vec::new();
        let mut existing = 0;
        for &ride_id in ride_ids {
            if self.get_ride(ride_id).await?.is_some() {
                existing += 1;
            }
            docs.extend(self.ride_documents(ride_id).await?);
        }
        self.batch_delete(&docs).await?;
        Ok(existing)
    }

    // ─── Ride errors ─────────────────────────────────────────────

    async fn get_ride_error(&self, ride_id: u64) -> Result<Option<RideError>> {
        self.get_doc(collections::RIDE_ERRORS, ride_id).await
    }

    async fn upsert_ride_error(&self, error: &RideError) -> Result<()> {
        self.put_doc(collections::RIDE_ERRORS, &error.id.to_string(), error)
            .await
    }

    async fn clear_ride_error(&self, ride_id: u64) -> Result<bool> {
        if self.get_ride_error(ride_id).await?.is_none() {
            return Ok(false);
        }
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::RIDE_ERRORS)
            .document_id(ride_id.to_string())
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(true)
    }

    // ─── Child records ───────────────────────────────────────────

    async fn list_efforts(&self, ride_id: u64) -> Result<Vec<SegmentEffort>> {
        self.list_children(collections::RIDE_EFFORTS, ride_id).await
    }

    async fn list_photos(&self, ride_id: u64) -> Result<Vec<RidePhoto>> {
        self.list_children(collections::RIDE_PHOTOS, ride_id).await
    }

    async fn get_track(&self, ride_id: u64) -> Result<Option<RideTrack>> {
        self.get_doc(collections::RIDE_TRACKS, ride_id).await
    }

    async fn get_ride_geo(&self, ride_id: u64) -> Result<Option<RideGeo>> {
        self.get_doc(collections::RIDE_GEO, ride_id).await
    }

    async fn upsert_ride_geo(&self, geo: &RideGeo) -> Result<()> {
        self.put_doc(collections::RIDE_GEO, &geo.ride_id.to_string(), geo)
            .await
    }

    // ─── Composite writes ────────────────────────────────────────

    async fn apply_detail(&self, update: &DetailUpdate) -> Result<()> {
        let ride_id = update.ride.id;
        let client = self.get_client()?;

        let old_efforts = self.list_efforts(ride_id).await?;
        let old_primary: Vec<RidePhoto> = match update.primary_photo {
            PrimaryPhotoUpdate::Keep => Vec::new(),
            PrimaryPhotoUpdate::Replace(_) => self
                .list_photos(ride_id)
                .await?
                .into_iter()
                .filter(|p| p.primary)
                .collect(),
        };

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        client
            .fluent()
            .update()
            .in_col(collections::RIDES)
            .document_id(ride_id.to_string())
            .object(&update.ride)
            .add_to_transaction(&mut transaction)
            .map_err(|e| Self::tx_error("ride", e))?;

        if let Some(geo) = &update.geo {
            client
                .fluent()
                .update()
                .in_col(collections::RIDE_GEO)
                .document_id(ride_id.to_string())
                .object(geo)
                .add_to_transaction(&mut transaction)
                .map_err(|e| Self::tx_error("geo", e))?;
        }

        for effort in &old_efforts {
            client
                .fluent()
                .delete()
                .from(collections::RIDE_EFFORTS)
                .document_id(effort.id.to_string())
                .add_to_transaction(&mut transaction)
                .map_err(|e| Self::tx_error("effort deletion", e))?;
        }
        for effort in &update.efforts {
            client
                .fluent()
                .update()
                .in_col(collections::RIDE_EFFORTS)
                .document_id(effort.id.to_string())
                .object(effort)
                .add_to_transaction(&mut transaction)
                .map_err(|e| Self::tx_error("effort", e))?;
        }

        if let PrimaryPhotoUpdate::Replace(primary) = &update.primary_photo {
            for photo in &old_primary {
                client
                    .fluent()
                    .delete()
                    .from(collections::RIDE_PHOTOS)
                    .document_id(&photo.id)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| Self::tx_error("photo deletion", e))?;
            }
            if let Some(photo) = primary {
                client
                    .fluent()
                    .update()
                    .in_col(collections::RIDE_PHOTOS)
                    .document_id(&photo.id)
                    .object(photo)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| Self::tx_error("primary photo", e))?;
            }
        }

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;

        tracing::debug!(
            ride_id,
            efforts = update.efforts.len(),
            "Ride detail stored atomically"
        );
        Ok(())
    }

    async fn apply_track(&self, update: &TrackUpdate) -> Result<()> {
        let ride_id = update.ride_id;
        let client = self.get_client()?;

        let mut ride = self
            .get_ride(ride_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ride {}", ride_id)))?;
        ride.track = update.flag();

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        match &update.track {
            Some(track) => {
                client
                    .fluent()
                    .update()
                    .in_col(collections::RIDE_TRACKS)
                    .document_id(ride_id.to_string())
                    .object(track)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| Self::tx_error("track", e))?;
            }
            None => {
                client
                    .fluent()
                    .delete()
                    .from(collections::RIDE_TRACKS)
                    .document_id(ride_id.to_string())
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| Self::tx_error("track deletion", e))?;
            }
        }

        if let Some(geo) = &update.geo {
            client
                .fluent()
                .update()
                .in_col(collections::RIDE_GEO)
                .document_id(ride_id.to_string())
                .object(geo)
                .add_to_transaction(&mut transaction)
                .map_err(|e| Self::tx_error("geo", e))?;
        }

        client
            .fluent()
            .update()
            .in_col(collections::RIDES)
            .document_id(ride_id.to_string())
            .object(&ride)
            .add_to_transaction(&mut transaction)
            .map_err(|e| Self::tx_error("ride", e))?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;
        Ok(())
    }

    async fn apply_photo_changes(&self, changes: &PhotoChanges) -> Result<()> {
        let ride_id = changes.ride_id;
        let client = self.get_client()?;

        let mut ride = self
            .get_ride(ride_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ride {}", ride_id)))?;
        ride.photos = WorkflowFlag::Done;

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        for photo_id in &changes.deletes {
            client
                .fluent()
                .delete()
                .from(collections::RIDE_PHOTOS)
                .document_id(photo_id)
                .add_to_transaction(&mut transaction)
                .map_err(|e| Self::tx_error("photo deletion", e))?;
        }
        for photo in &changes.upserts {
            client
                .fluent()
                .update()
                .in_col(collections::RIDE_PHOTOS)
                .document_id(&photo.id)
                .object(photo)
                .add_to_transaction(&mut transaction)
                .map_err(|e| Self::tx_error("photo", e))?;
        }
        client
            .fluent()
            .update()
            .in_col(collections::RIDES)
            .document_id(ride_id.to_string())
            .object(&ride)
            .add_to_transaction(&mut transaction)
            .map_err(|e| Self::tx_error("ride", e))?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FirestoreQueue - work queue backed by a collection
// ─────────────────────────────────────────────────────────────────────────────

/// How often an idle `reserve` re-polls Firestore.
const QUEUE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Queued job document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueuedJob {
    id: String,
    body: String,
    /// Job may be reserved once this time has passed (RFC3339, UTC)
    visible_at: String,
    reservations: u32,
}

/// Work queue stored in the `activity_updates` collection.
///
/// A reserved job is hidden for `time_to_run`; if the reserver neither
/// deletes nor releases it in that time it becomes visible again.
#[derive(Clone)]
pub struct FirestoreQueue {
    db: FirestoreDb,
    time_to_run: Duration,
}

impl FirestoreQueue {
    pub fn new(db: FirestoreDb, time_to_run: Duration) -> Self {
        Self { db, time_to_run }
    }

    fn visible_after(delay: Duration) -> String {
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        format_utc_rfc3339(Utc::now() + delay)
    }

    /// Claim the oldest visible job, hiding it for `time_to_run`.
    ///
    /// The lookup and the claim share one transaction: if another reserver
    /// claims the same job first, the transaction is retried and sees the
    /// job as hidden.
    async fn claim_next(&self) -> Result<Option<QueuedJob>> {
        let time_to_run = self.time_to_run;
        let claimed: Option<QueuedJob> = self
            .db
            .get_client()?
            .run_transaction(move |db, transaction| {
                async move {
                    let now = format_utc_rfc3339(Utc::now());
                    let jobs: Vec<QueuedJob> = db
                        .fluent()
                        .select()
                        .from(collections::ACTIVITY_UPDATES)
                        .filter(move |q| {
                            q.for_all([q.field("visible_at").less_than_or_equal(now.clone())])
                        })
                        .order_by([("visible_at", firestore::FirestoreQueryDirection::Ascending)])
                        .limit(1)
                        .obj()
                        .query()
                        .await?;
                    let Some(mut job) = jobs.into_iter().next() else {
                        return Ok(None);
                    };

                    job.visible_at = Self::visible_after(time_to_run);
                    job.reservations += 1;
                    db.fluent()
                        .update()
                        .in_col(collections::ACTIVITY_UPDATES)
                        .document_id(&job.id)
                        .object(&job)
                        .add_to_transaction(transaction)?;
                    Ok(Some(job))
                }
                .boxed()
            })
            .await
            .map_err(|e| AppError::Queue(e.to_string()))?;
        Ok(claimed)
    }

    async fn set_visible_at(&self, job_id: &str, visible_at: String) -> Result<()> {
        let Some(mut job) = self
            .db
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::ACTIVITY_UPDATES)
            .obj::<QueuedJob>()
            .one(job_id)
            .await
            .map_err(|e| AppError::Queue(e.to_string()))?
        else {
            return Err(AppError::Queue(format!("Job {} no longer queued", job_id)));
        };
        job.visible_at = visible_at;
        self.db
            .put_doc(collections::ACTIVITY_UPDATES, job_id, &job)
            .await
            .map_err(|e| AppError::Queue(e.to_string()))
    }
}

#[async_trait]
impl WorkQueue for FirestoreQueue {
    async fn put(&self, body: String, delay: Duration) -> Result<()> {
        let job = QueuedJob {
            id: uuid::Uuid::new_v4().to_string(),
            body,
            visible_at: Self::visible_after(delay),
            reservations: 0,
        };
        self.db
            .put_doc(collections::ACTIVITY_UPDATES, &job.id, &job)
            .await
            .map_err(|e| AppError::Queue(e.to_string()))
    }

    async fn reserve(&self, timeout: Duration) -> Result<Option<Job>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(job) = self.claim_next().await? {
                tracing::debug!(job_id = %job.id, reservations = job.reservations, "Reserved job");
                return Ok(Some(Job {
                    id: job.id,
                    body: job.body,
                }));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(QUEUE_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn delete(&self, job: &Job) -> Result<()> {
        self.db
            .get_client()?
            .fluent()
            .delete()
            .from(collections::ACTIVITY_UPDATES)
            .document_id(&job.id)
            .execute()
            .await
            .map_err(|e| AppError::Queue(e.to_string()))
    }

    async fn release(&self, job: &Job, delay: Duration) -> Result<()> {
        self.set_visible_at(&job.id, Self::visible_after(delay))
            .await
    }
}
