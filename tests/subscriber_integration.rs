// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Integration tests for the queue-driven activity update path.

mod common;

use common::{activity_json, athlete, stored_ride, TestEnv, ATHLETE_ID};
use ride_sync::db::SyncStore;
use ride_sync::models::WorkflowFlag;
use ride_sync::services::subscriber::Outcome;
use ride_sync::services::{ActivityUpdate, MemoryQueue, Operation, WorkQueue};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn new_queue() -> Arc<MemoryQueue> {
    Arc::new(MemoryQueue::new(Duration::from_secs(120)))
}

async fn enqueue(queue: &MemoryQueue, athlete_id: u64, activity_id: u64, operation: Operation) {
    let body = ActivityUpdate {
        athlete_id,
        activity_id,
        operation,
    }
    .to_body()
    .unwrap();
    queue.put(body, Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn test_create_stores_detail_and_track() {
    let env = TestEnv::start().await;
    let mut detail = activity_json(10, "Fresh upload", 22.0);
    detail["start_latlng"] = json!([37.40, -122.10]);
    detail["end_latlng"] = json!([37.50, -122.20]);
    env.mount_detail(detail).await;
    env.mount_streams(10, &[[37.40, -122.10], [37.45, -122.15], [37.50, -122.20]])
        .await;

    let queue = new_queue();
    let subscriber = env.subscriber(queue.clone());
    enqueue(&queue, ATHLETE_ID, 10, Operation::Create).await;

    let outcome = subscriber.process_next().await.unwrap();
    assert_eq!(outcome, Some(Outcome::Processed));
    assert!(queue.is_empty().await);

    let ride = env.store.get_ride(10).await.unwrap().unwrap();
    assert_eq!(ride.name, "Fresh upload");
    assert_eq!(ride.detail, WorkflowFlag::Done);
    assert_eq!(ride.track, WorkflowFlag::Done);
    assert_eq!(
        env.store.get_track(10).await.unwrap().unwrap().point_count,
        3
    );
    assert!(env.store.get_ride_geo(10).await.unwrap().unwrap().is_complete());
}

#[tokio::test]
async fn test_duplicate_create_is_idempotent() {
    let env = TestEnv::start().await;
    env.mount_detail(activity_json(10, "Fresh upload", 22.0)).await;
    env.mount_streams(10, &[[37.40, -122.10], [37.50, -122.20]])
        .await;

    let queue = new_queue();
    let subscriber = env.subscriber(queue.clone());
    enqueue(&queue, ATHLETE_ID, 10, Operation::Create).await;
    enqueue(&queue, ATHLETE_ID, 10, Operation::Create).await;

    assert_eq!(
        subscriber.process_next().await.unwrap(),
        Some(Outcome::Processed)
    );
    let first = env.store.get_ride(10).await.unwrap().unwrap();
    assert_eq!(
        subscriber.process_next().await.unwrap(),
        Some(Outcome::Processed)
    );

    assert_eq!(env.store.ride_ids().await, vec![10]);
    assert_eq!(env.store.get_ride(10).await.unwrap().unwrap(), first);
}

#[tokio::test]
async fn test_update_refreshes_detail_only() {
    let env = TestEnv::start().await;
    let mut ride = stored_ride(&activity_json(10, "Old title", 22.0));
    ride.detail = WorkflowFlag::Done;
    ride.track = WorkflowFlag::Done;
    env.store.insert_ride(ride).await;
    env.mount_detail(activity_json(10, "New title", 22.0)).await;

    let queue = new_queue();
    let subscriber = env.subscriber(queue.clone());
    enqueue(&queue, ATHLETE_ID, 10, Operation::Update).await;

    assert_eq!(
        subscriber.process_next().await.unwrap(),
        Some(Outcome::Processed)
    );
    let ride = env.store.get_ride(10).await.unwrap().unwrap();
    assert_eq!(ride.name, "New title");
    assert_eq!(ride.track, WorkflowFlag::Done);
    assert_eq!(
        env.requests_to("/api/v3/activities/10/streams/latlng,time,altitude")
            .await,
        0
    );
}

#[tokio::test]
async fn test_missing_activity_dropped() {
    let env = TestEnv::start().await;
    env.mount_status("/api/v3/activities/10", 404).await;

    let queue = new_queue();
    let subscriber = env.subscriber(queue.clone());
    enqueue(&queue, ATHLETE_ID, 10, Operation::Create).await;

    assert_eq!(
        subscriber.process_next().await.unwrap(),
        Some(Outcome::Dropped)
    );
    assert!(queue.is_empty().await);
    assert_eq!(subscriber.error_count(), 0);
}

#[tokio::test]
async fn test_ineligible_activity_dropped() {
    let env = TestEnv::start().await;
    let mut run = activity_json(10, "Lunch run", 5.0);
    run["type"] = json!("Run");
    env.mount_detail(run).await;

    let queue = new_queue();
    let subscriber = env.subscriber(queue.clone());
    enqueue(&queue, ATHLETE_ID, 10, Operation::Create).await;

    assert_eq!(
        subscriber.process_next().await.unwrap(),
        Some(Outcome::Dropped)
    );
    assert!(queue.is_empty().await);
    assert!(env.store.get_ride(10).await.unwrap().is_none());
}

#[tokio::test]
async fn test_activity_before_window_dropped() {
    let env = TestEnv::start().await;
    let mut early = activity_json(10, "Before the start", 20.0);
    early["start_date_local"] = json!("2025-12-20T09:00:00Z");
    env.mount_detail(early).await;

    let queue = new_queue();
    let subscriber = env.subscriber(queue.clone());
    enqueue(&queue, ATHLETE_ID, 10, Operation::Create).await;

    assert_eq!(
        subscriber.process_next().await.unwrap(),
        Some(Outcome::Dropped)
    );
    assert!(queue.is_empty().await);
    assert!(env.store.get_ride(10).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_geo_write_requeued_without_ride() {
    let env = TestEnv::start().await;
    let mut detail = activity_json(10, "Fresh upload", 22.0);
    detail["start_latlng"] = json!([37.40, -122.10]);
    detail["end_latlng"] = json!([37.50, -122.20]);
    env.mount_detail(detail).await;
    env.store.fail_geo_writes_for(10).await;

    let queue = new_queue();
    let subscriber = env.subscriber(queue.clone());
    enqueue(&queue, ATHLETE_ID, 10, Operation::Update).await;

    assert_eq!(
        subscriber.process_next().await.unwrap(),
        Some(Outcome::Requeued)
    );
    assert_eq!(queue.len().await, 1);
    assert!(env.store.get_ride(10).await.unwrap().is_none());
    assert!(env.store.get_ride_geo(10).await.unwrap().is_none());
}

#[tokio::test]
async fn test_upstream_error_requeued() {
    let env = TestEnv::start().await;
    env.mount_status("/api/v3/activities/10", 503).await;

    let queue = new_queue();
    let subscriber = env.subscriber(queue.clone());
    enqueue(&queue, ATHLETE_ID, 10, Operation::Update).await;

    assert_eq!(
        subscriber.process_next().await.unwrap(),
        Some(Outcome::Requeued)
    );
    assert_eq!(queue.len().await, 1);
    assert_eq!(queue.visible_count().await, 0);
    assert_eq!(subscriber.error_count(), 1);
}

#[tokio::test]
async fn test_unknown_athlete_acknowledged() {
    let env = TestEnv::start().await;

    let queue = new_queue();
    let subscriber = env.subscriber(queue.clone());
    enqueue(&queue, 4242, 10, Operation::Create).await;

    assert_eq!(
        subscriber.process_next().await.unwrap(),
        Some(Outcome::Processed)
    );
    assert!(queue.is_empty().await);
    assert_eq!(env.total_requests().await, 0);
}

#[tokio::test]
async fn test_delete_only_removes_own_ride() {
    let env = TestEnv::start().await;
    env.store.insert_athlete(athlete(3003)).await;
    env.store
        .insert_ride(stored_ride(&activity_json(10, "Mine", 10.0)))
        .await;
    env.store
        .insert_ride(stored_ride(&activity_json(11, "Also mine", 10.0)))
        .await;

    let queue = new_queue();
    let subscriber = env.subscriber(queue.clone());
    enqueue(&queue, ATHLETE_ID, 10, Operation::Delete).await;
    enqueue(&queue, 3003, 11, Operation::Delete).await;

    for _ in 0..2 {
        assert_eq!(
            subscriber.process_next().await.unwrap(),
            Some(Outcome::Processed)
        );
    }
    assert_eq!(env.store.ride_ids().await, vec![11]);
    assert_eq!(env.total_requests().await, 0);
}

#[tokio::test]
async fn test_failed_message_hidden_until_requeue_delay() {
    let env = TestEnv::start().await;
    tokio::time::pause();

    let queue = new_queue();
    let subscriber = env.subscriber(queue.clone());
    queue
        .put("{\"athlete_id\": 1".to_string(), Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(
        subscriber.process_next().await.unwrap(),
        Some(Outcome::Requeued)
    );
    // Released, never deleted.
    assert_eq!(queue.len().await, 1);
    assert_eq!(queue.visible_count().await, 0);

    tokio::time::advance(env.config.requeue_delay - Duration::from_secs(1)).await;
    assert_eq!(queue.visible_count().await, 0);
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(queue.visible_count().await, 1);

    assert_eq!(
        subscriber.process_next().await.unwrap(),
        Some(Outcome::Requeued)
    );
    assert_eq!(subscriber.error_count(), 2);
}

#[tokio::test]
async fn test_missing_credentials_requeued() {
    let env = TestEnv::start().await;
    let mut rider = athlete(3003);
    rider.access_token = None;
    rider.refresh_token = None;
    env.store.insert_athlete(rider).await;
    tokio::time::pause();

    let queue = new_queue();
    let subscriber = env.subscriber(queue.clone());
    enqueue(&queue, 3003, 10, Operation::Create).await;

    assert_eq!(
        subscriber.process_next().await.unwrap(),
        Some(Outcome::Requeued)
    );
    assert_eq!(queue.len().await, 1);
}

#[tokio::test]
async fn test_empty_queue_times_out() {
    let env = TestEnv::start().await;
    tokio::time::pause();

    let queue = new_queue();
    let subscriber = env.subscriber(queue.clone());
    assert_eq!(subscriber.process_next().await.unwrap(), None);
}

#[tokio::test]
async fn test_run_drains_queue_and_stops_on_shutdown() {
    let env = TestEnv::start().await;
    for id in [10, 11, 12] {
        env.store
            .insert_ride(stored_ride(&activity_json(id, "Ride", 10.0)))
            .await;
    }
    tokio::time::pause();

    let queue = new_queue();
    for id in [10, 11, 12] {
        enqueue(&queue, ATHLETE_ID, id, Operation::Delete).await;
    }

    let subscriber = Arc::new(env.subscriber(queue.clone()));
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let subscriber = subscriber.clone();
        let shutdown = shutdown.clone();
        async move { subscriber.run(shutdown).await }
    });

    while !queue.is_empty().await {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("subscriber stops after shutdown")
        .unwrap();

    assert!(env.store.ride_ids().await.is_empty());
    assert_eq!(subscriber.error_count(), 0);
}
