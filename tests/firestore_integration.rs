// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore store and queue tests. The emulator-backed ones are skipped
//! unless FIRESTORE_EMULATOR_HOST is set.

mod common;

use common::{activity_json, stored_ride, test_db};
use ride_sync::db::{FirestoreDb, FirestoreQueue, PendingQuery, SyncStore};
use ride_sync::error::AppError;
use ride_sync::models::{WorkflowDimension, WorkflowFlag};
use ride_sync::services::WorkQueue;
use std::time::Duration;

#[tokio::test]
async fn test_offline_store_reports_database_error() {
    let db = FirestoreDb::new_mock();
    assert!(matches!(db.get_ride(1).await, Err(AppError::Database(_))));

    let queue = FirestoreQueue::new(db, Duration::from_secs(120));
    let result = queue.put("{}".to_string(), Duration::ZERO).await;
    assert!(matches!(result, Err(AppError::Queue(_))));
}

#[tokio::test]
async fn test_ride_flags_and_pending_selection() {
    require_emulator!();
    let db = test_db().await;

    let id = 880_000_000 + u64::from(std::process::id() % 1000);
    let ride = stored_ride(&activity_json(id, "Emulator ride", 10.0));
    db.upsert_ride(&ride).await.unwrap();
    assert_eq!(db.get_ride(id).await.unwrap(), Some(ride.clone()));

    let mut query = PendingQuery::new(WorkflowDimension::Detail);
    query.ride_id = Some(id);
    assert_eq!(db.list_pending(&query).await.unwrap().len(), 1);

    db.set_ride_flag(id, WorkflowDimension::Detail, WorkflowFlag::Done)
        .await
        .unwrap();
    assert!(db.list_pending(&query).await.unwrap().is_empty());

    assert_eq!(db.delete_rides(&[id]).await.unwrap(), 1);
    assert!(db.get_ride(id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_queue_reserve_hides_job() {
    require_emulator!();
    let queue = FirestoreQueue::new(test_db().await, Duration::from_secs(120));

    queue
        .put("emulator-job".to_string(), Duration::ZERO)
        .await
        .unwrap();
    let job = queue
        .reserve(Duration::from_secs(5))
        .await
        .unwrap()
        .expect("job visible");
    queue.release(&job, Duration::from_secs(600)).await.unwrap();

    // Other jobs may be queued, but not this one.
    while let Some(other) = queue.reserve(Duration::from_secs(1)).await.unwrap() {
        assert_ne!(other.id, job.id);
        queue.release(&other, Duration::from_secs(600)).await.unwrap();
    }
    queue.delete(&job).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_reserves_claim_distinct_jobs() {
    require_emulator!();
    let queue = FirestoreQueue::new(test_db().await, Duration::from_secs(120));
    queue
        .put("contended-job".to_string(), Duration::ZERO)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        queue.reserve(Duration::from_secs(2)),
        queue.reserve(Duration::from_secs(2)),
    );
    let reserved: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();
    assert!(!reserved.is_empty());
    if let [first, second] = reserved.as_slice() {
        assert_ne!(first.id, second.id);
    }
    for job in &reserved {
        queue.delete(job).await.unwrap();
    }
}
