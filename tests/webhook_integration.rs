// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Integration tests for webhook handling.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{athlete, create_test_app};
use ride_sync::db::SyncStore;
use ride_sync::services::{ActivityUpdate, Operation, WorkQueue};
use serde_json::json;
use std::time::Duration;
use tower::ServiceExt;

fn post_event(event: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(event).unwrap()))
        .unwrap()
}

fn verify_request(token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(format!(
            "/webhook?hub.mode=subscribe&hub.challenge=test_challenge_123&hub.verify_token={}",
            token
        ))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_webhook_verification() {
    let app = create_test_app();

    // Matches Config::default()
    let response = app
        .router
        .oneshot(verify_request("test_verify_token"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["hub.challenge"], "test_challenge_123");
}

#[tokio::test]
async fn test_webhook_verification_wrong_token() {
    let app = create_test_app();

    let response = app
        .router
        .oneshot(verify_request("wrong_token"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = axum::body::to_bytes(response.into_body(), 1024)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["hub.challenge"], "");
}

#[tokio::test]
async fn test_webhook_event_create_activity_is_queued() {
    let app = create_test_app();

    let event = json!({
        "aspect_type": "create",
        "event_time": 1234567890,
        "object_id": 12345678901_u64,
        "object_type": "activity",
        "owner_id": 123456,
        "subscription_id": 12345
    });

    let response = app.router.oneshot(post_event(&event)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(app.queue.len().await, 1);
    let job = app
        .queue
        .reserve(Duration::from_millis(10))
        .await
        .unwrap()
        .expect("queued job");
    let update = ActivityUpdate::from_body(&job.body).unwrap();
    assert_eq!(
        update,
        ActivityUpdate {
            athlete_id: 123456,
            activity_id: 12345678901,
            operation: Operation::Create,
        }
    );
}

#[tokio::test]
async fn test_webhook_event_update_and_delete_are_queued() {
    let app = create_test_app();

    for aspect in ["update", "delete"] {
        let event = json!({
            "aspect_type": aspect,
            "event_time": 1234567890,
            "object_id": 42,
            "object_type": "activity",
            "owner_id": 123456,
            "subscription_id": 12345,
            "updates": {"title": "New Title"}
        });
        let response = app.router.clone().oneshot(post_event(&event)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let mut operations = Vec::new();
    while let Some(job) = app.queue.reserve(Duration::ZERO).await.unwrap() {
        operations.push(ActivityUpdate::from_body(&job.body).unwrap().operation);
        app.queue.delete(&job).await.unwrap();
    }
    operations.sort_by_key(|op| format!("{:?}", op));
    assert_eq!(operations, vec![Operation::Delete, Operation::Update]);
}

#[tokio::test]
async fn test_webhook_subscription_mismatch_rejected() {
    let app = create_test_app();

    let event = json!({
        "aspect_type": "create",
        "event_time": 1234567890,
        "object_id": 42,
        "object_type": "activity",
        "owner_id": 123456,
        "subscription_id": 99999
    });

    let response = app.router.oneshot(post_event(&event)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(app.queue.is_empty().await);
}

#[tokio::test]
async fn test_webhook_event_athlete_deauthorize() {
    let app = create_test_app();
    app.store.insert_athlete(athlete(123456)).await;

    let event = json!({
        "aspect_type": "update",
        "event_time": 1234567890,
        "object_id": 123456,
        "object_type": "athlete",
        "owner_id": 123456,
        "subscription_id": 12345,
        "updates": {"authorized": "false"}
    });

    let response = app.router.oneshot(post_event(&event)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = app.store.get_athlete(123456).await.unwrap().unwrap();
    assert!(stored.access_token.is_none());
    assert!(app.queue.is_empty().await);
}

#[tokio::test]
async fn test_webhook_event_unknown_type() {
    let app = create_test_app();

    let event = json!({
        "aspect_type": "unknown_aspect",
        "event_time": 1234567890,
        "object_id": 12345,
        "object_type": "unknown_object",
        "owner_id": 123456,
        "subscription_id": 12345
    });

    let response = app.router.oneshot(post_event(&event)).await.unwrap();

    // Should return 200 even for unknown event types
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.queue.is_empty().await);
}

#[tokio::test]
async fn test_webhook_unparsable_event_still_ok() {
    let app = create_test_app();

    let response = app
        .router
        .oneshot(post_event(&json!({"hello": "strava"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.queue.is_empty().await);
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app();

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    // The default window ended in March 2026.
    assert_eq!(json["window_open"], false);
}
