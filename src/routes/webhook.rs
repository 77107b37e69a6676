// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Webhook routes for Strava events.
//!
//! Activity events go onto the work queue for the subscriber; nothing is
//! fetched inline, so Strava always gets a fast 200.

use crate::services::queue::{ActivityUpdate, Operation};
use crate::AppState;
use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook", get(verify).post(handle_event))
}

/// Strava webhook verification query params.
#[derive(Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: String,
    #[serde(rename = "hub.challenge")]
    challenge: String,
    #[serde(rename = "hub.verify_token")]
    verify_token: String,
}

/// Verification response.
#[derive(Serialize, Default)]
struct VerifyResponse {
    #[serde(rename = "hub.challenge")]
    challenge: String,
}

/// Verify webhook subscription (GET).
async fn verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> impl IntoResponse {
    if params.mode == "subscribe" && params.verify_token == state.config.webhook_verify_token {
        tracing::info!("Webhook subscription verified");
        (
            StatusCode::OK,
            Json(VerifyResponse {
                challenge: params.challenge,
            }),
        )
    } else {
        tracing::warn!(mode = %params.mode, "Webhook verification failed: invalid token");
        (StatusCode::FORBIDDEN, Json(VerifyResponse::default()))
    }
}

/// Strava webhook event payload.
#[derive(Deserialize, Debug)]
struct WebhookEvent {
    object_type: String, // "activity" or "athlete"
    object_id: u64,
    aspect_type: String, // "create", "update", "delete"
    owner_id: u64,
    subscription_id: u64,
    /// For athlete events, contains {"authorized": "false"} on deauthorization
    #[serde(default)]
    updates: Option<std::collections::HashMap<String, serde_json::Value>>,
}

/// Strava sends: object_type="athlete", aspect_type="update", updates={"authorized": "false"}
fn is_deauthorization(event: &WebhookEvent) -> bool {
    event
        .updates
        .as_ref()
        .and_then(|u| u.get("authorized"))
        .is_some_and(|v| v == false || v == "false")
}

fn operation(aspect_type: &str) -> Option<Operation> {
    match aspect_type {
        "create" => Some(Operation::Create),
        "update" => Some(Operation::Update),
        "delete" => Some(Operation::Delete),
        _ => None,
    }
}

/// Handle incoming webhook events (POST).
async fn handle_event(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    tracing::info!(payload = %payload, "Webhook event received (raw)");

    let event: WebhookEvent = match serde_json::from_value(payload) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse webhook event");
            return StatusCode::OK; // Still return 200 to Strava to avoid retries
        }
    };

    if let Some(expected) = state.config.strava_subscription_id {
        if event.subscription_id != expected {
            tracing::warn!(
                received_id = event.subscription_id,
                expected_id = expected,
                "Webhook subscription ID mismatch"
            );
            return StatusCode::FORBIDDEN;
        }
    }

    match (event.object_type.as_str(), operation(&event.aspect_type)) {
        ("activity", Some(operation)) => {
            let update = ActivityUpdate {
                athlete_id: event.owner_id,
                activity_id: event.object_id,
                operation,
            };
            let queued = match update.to_body() {
                Ok(body) => state.queue.put(body, Duration::ZERO).await,
                Err(e) => Err(e),
            };
            match queued {
                Ok(()) => tracing::info!(
                    activity_id = event.object_id,
                    athlete_id = event.owner_id,
                    operation = ?operation,
                    "Activity update queued"
                ),
                Err(e) => {
                    tracing::error!(error = %e, activity_id = event.object_id, "Failed to queue activity update")
                }
            }
        }
        ("athlete", Some(Operation::Update)) if is_deauthorization(&event) => {
            match state.store.clear_access_token(event.owner_id).await {
                Ok(()) => tracing::info!(athlete_id = event.owner_id, "Athlete deauthorized, token cleared"),
                Err(e) => {
                    tracing::error!(error = %e, athlete_id = event.owner_id, "Failed to clear access token")
                }
            }
        }
        _ => {
            tracing::debug!(
                object_type = %event.object_type,
                aspect_type = %event.aspect_type,
                "Ignoring unhandled event type"
            );
        }
    }

    // Always return 200 OK quickly (Strava requirement)
    StatusCode::OK
}
