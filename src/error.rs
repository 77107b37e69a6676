// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types.
//!
//! The sync engine classifies failures by variant rather than by message:
//! authorization problems clear an athlete's token, terminal errors are
//! dropped from the queue, and everything else is retried.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Athlete has neither an access token nor a refresh token.
    #[error("No usable credentials: {0}")]
    Credential(String),

    /// Strava rejected the token (revoked or otherwise invalid).
    #[error("Authorization rejected by Strava: {0}")]
    Authorization(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Activity no longer exists upstream (terminal on the queue path).
    #[error("Activity not found: {0}")]
    ActivityNotFound(String),

    /// Activity exists but does not qualify (terminal on the queue path).
    #[error("Ineligible activity: {0}")]
    IneligibleActivity(String),

    /// Remote record is missing data we require.
    #[error("Invalid activity data: {0}")]
    DataEntry(String),

    #[error("Strava rate limit exceeded")]
    RateLimited,

    #[error("Strava API error: {0}")]
    StravaApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Queue error: {0}")]
    Queue(String),

    /// Operation refused by policy (e.g. competition already over).
    #[error("Command refused: {0}")]
    Command(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// True when the stored access token for the athlete should be cleared.
    pub fn is_authorization_error(&self) -> bool {
        matches!(self, AppError::Authorization(_))
    }

    /// Errors that retrying cannot fix. The queue subscriber acknowledges
    /// these instead of requeueing.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppError::ActivityNotFound(_) | AppError::IneligibleActivity(_)
        )
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) | AppError::ActivityNotFound(msg) => {
                (StatusCode::NOT_FOUND, "not_found", Some(msg.clone()))
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Credential(_) | AppError::Authorization(_) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", None)
            }
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited", None),
            AppError::StravaApi(msg) => {
                (StatusCode::BAD_GATEWAY, "strava_error", Some(msg.clone()))
            }
            AppError::Database(msg) | AppError::Queue(msg) => {
                tracing::error!(error = %msg, "Storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", None)
            }
            other => {
                tracing::error!(error = %other, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AppError>;
