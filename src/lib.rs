// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! ride-sync: keeps a team's Strava rides in sync with the competition store.
//!
//! Bulk jobs reconcile athlete listings and fill in detail, tracks and
//! photos; a queue subscriber applies webhook-driven single-activity
//! updates through the same write paths.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::SyncStore;
use services::WorkQueue;
use std::sync::Arc;

/// Shared application state for the webhook server.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn SyncStore>,
    pub queue: Arc<dyn WorkQueue>,
}
