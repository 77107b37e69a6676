// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use chrono::{Duration as ChronoDuration, Utc};
use ride_sync::config::Config;
use ride_sync::db::{FirestoreDb, MemoryStore, SyncStore};
use ride_sync::models::{Athlete, Ride};
use ride_sync::routes::create_router;
use ride_sync::services::rides::prepare_ride;
use ride_sync::services::strava::{AthleteClient, StravaActivity, StravaClient};
use ride_sync::services::{MemoryQueue, SyncServices, UpdateSubscriber, WorkQueue};
use ride_sync::AppState;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Athlete most tests sync for.
#[allow(dead_code)]
pub const ATHLETE_ID: u64 = 1001;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Config pointing Strava at the mock server and the cache at `cache_dir`.
#[allow(dead_code)]
pub fn test_config(strava: &MockServer, cache_dir: &Path) -> Config {
    Config {
        strava_api_url: format!("{}/api/v3", strava.uri()),
        strava_oauth_url: format!("{}/oauth/token", strava.uri()),
        cache_dir: cache_dir.to_path_buf(),
        requeue_delay: Duration::from_secs(30),
        throttle_delay: Duration::from_millis(10),
        reserve_timeout: Duration::from_secs(1),
        ..Config::default()
    }
}

/// Team athlete whose access token is good for hours.
#[allow(dead_code)]
pub fn athlete(id: u64) -> Athlete {
    Athlete {
        id,
        name: format!("Rider {}", id),
        display_name: None,
        team_id: Some(1),
        access_token: Some(format!("access-{}", id)),
        refresh_token: Some(format!("refresh-{}", id)),
        token_expiry: Some(Utc::now() + ChronoDuration::hours(6)),
    }
}

/// Strava activity JSON for a ride on 2026-02-10, `miles` long.
#[allow(dead_code)]
pub fn activity_json(id: u64, name: &str, miles: f64) -> Value {
    json!({
        "id": id,
        "athlete": {"id": ATHLETE_ID},
        "name": name,
        "type": "Ride",
        "private": false,
        "start_date_local": "2026-02-10T09:00:00Z",
        "distance": miles * 1609.344,
        "moving_time": 3600,
        "elapsed_time": 4000,
        "total_elevation_gain": 250.0,
        "average_speed": 4.5,
        "max_speed": 12.0,
        "manual": false,
        "trainer": false,
        "commute": false,
        "timezone": "(GMT-08:00) America/Los_Angeles",
        "location_city": "Palo Alto",
        "location_state": "CA",
        "start_latlng": [],
        "end_latlng": [],
        "photo_count": 0,
        "total_photo_count": 0
    })
}

#[allow(dead_code)]
pub fn parse_activity(value: &Value) -> StravaActivity {
    serde_json::from_value(value.clone()).expect("valid activity JSON")
}

/// The ride a first sync of `value` would store.
#[allow(dead_code)]
pub fn stored_ride(value: &Value) -> Ride {
    prepare_ride(None, &parse_activity(value), ATHLETE_ID)
        .expect("activity has the required fields")
        .ride
}

/// Stream set JSON with the given `[lat, lng]` points.
#[allow(dead_code)]
pub fn streams_json(latlng: &[[f64; 2]]) -> Value {
    let times: Vec<i64> = (0..latlng.len() as i64).map(|i| i * 5).collect();
    let altitude: Vec<f64> = (0..latlng.len()).map(|i| 10.0 + i as f64).collect();
    json!([
        {"type": "latlng", "data": latlng},
        {"type": "time", "data": times},
        {"type": "altitude", "data": altitude}
    ])
}

/// Mock Strava, a temporary cache directory, and sync services over a
/// [`MemoryStore`].
#[allow(dead_code)]
pub struct TestEnv {
    pub strava: MockServer,
    pub store: Arc<MemoryStore>,
    pub config: Config,
    pub services: SyncServices,
    cache: TempDir,
}

#[allow(dead_code)]
impl TestEnv {
    pub async fn start() -> Self {
        let strava = MockServer::start().await;
        let cache = TempDir::new().expect("Failed to create cache dir");
        let config = test_config(&strava, cache.path());
        let store = Arc::new(MemoryStore::new());
        let services = SyncServices::new(&config, store.clone());
        store.insert_athlete(athlete(ATHLETE_ID)).await;
        Self {
            strava,
            store,
            config,
            services,
            cache,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        self.cache.path()
    }

    pub fn store(&self) -> Arc<dyn SyncStore> {
        self.store.clone()
    }

    /// Client for `athlete_id` that talks to the mock server.
    pub fn athlete_client(&self, athlete_id: u64) -> AthleteClient {
        let client = StravaClient::from_config(&self.config);
        AthleteClient::new(client, athlete_id, format!("access-{}", athlete_id))
    }

    pub fn subscriber(&self, queue: Arc<dyn WorkQueue>) -> UpdateSubscriber {
        self.services.subscriber(&self.config, queue, self.store())
    }

    pub async fn mount_listing(&self, activities: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/api/v3/athlete/activities"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(activities)))
            .mount(&self.strava)
            .await;
    }

    pub async fn mount_detail(&self, detail: Value) {
        let id = detail["id"].as_u64().expect("activity id");
        Mock::given(method("GET"))
            .and(path(format!("/api/v3/activities/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(detail))
            .mount(&self.strava)
            .await;
    }

    pub async fn mount_streams(&self, activity_id: u64, latlng: &[[f64; 2]]) {
        Mock::given(method("GET"))
            .and(path(format!(
                "/api/v3/activities/{}/streams/latlng,time,altitude",
                activity_id
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(streams_json(latlng)))
            .mount(&self.strava)
            .await;
    }

    /// Answer every request for `url_path` with `status`.
    pub async fn mount_status(&self, url_path: &str, status: u16) {
        Mock::given(path(url_path.to_string()))
            .respond_with(ResponseTemplate::new(status).set_body_string("{}"))
            .mount(&self.strava)
            .await;
    }

    /// Requests the mock server has seen for `url_path`.
    pub async fn requests_to(&self, url_path: &str) -> usize {
        self.strava
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == url_path)
            .count()
    }

    pub async fn total_requests(&self) -> usize {
        self.strava
            .received_requests()
            .await
            .map(|r| r.len())
            .unwrap_or_default()
    }
}

/// Webhook app over in-memory store and queue.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryQueue>,
}

/// Create a test app with in-memory dependencies.
#[allow(dead_code)]
pub fn create_test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new(Duration::from_secs(120)));
    let state = Arc::new(AppState {
        config: Config::default(),
        store: store.clone(),
        queue: queue.clone(),
    });

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        queue,
    }
}
