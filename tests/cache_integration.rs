// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Integration tests for the on-disk fetch cache.

mod common;

use common::{activity_json, TestEnv, ATHLETE_ID};
use ride_sync::error::AppError;
use ride_sync::services::cache::{CacheLookup, CachingFetcher, FetchPolicy, ObjectKind};
use ride_sync::services::strava::{StravaActivity, StreamSet};

const DETAIL_PATH: &str = "/api/v3/activities/501";

#[tokio::test]
async fn test_cached_fetch_goes_remote_once() {
    let env = TestEnv::start().await;
    env.mount_detail(activity_json(501, "Morning Ride", 12.0)).await;
    let fetcher = CachingFetcher::new(env.cache_dir());
    let client = env.athlete_client(ATHLETE_ID);

    let first: StravaActivity = fetcher
        .fetch(&client, 501, FetchPolicy::cached())
        .await
        .unwrap()
        .expect("activity from Strava");
    assert_eq!(env.requests_to(DETAIL_PATH).await, 1);

    let path = fetcher.cache_path(ATHLETE_ID, 501, ObjectKind::Activity);
    assert!(path.is_file(), "response body persisted at {}", path.display());

    let second: StravaActivity = fetcher
        .fetch(&client, 501, FetchPolicy::cached())
        .await
        .unwrap()
        .expect("activity from cache");
    assert_eq!(env.requests_to(DETAIL_PATH).await, 1, "second fetch is local");
    assert_eq!(second.id, first.id);
    assert_eq!(second.name, first.name);
    assert_eq!(second.distance, first.distance);
}

#[tokio::test]
async fn test_remote_policy_refreshes_cache() {
    let env = TestEnv::start().await;
    env.mount_detail(activity_json(501, "Morning Ride", 12.0)).await;
    let fetcher = CachingFetcher::new(env.cache_dir());
    let client = env.athlete_client(ATHLETE_ID);

    for _ in 0..2 {
        let fetched: Option<StravaActivity> = fetcher
            .fetch(&client, 501, FetchPolicy::remote())
            .await
            .unwrap();
        assert!(fetched.is_some());
    }
    assert_eq!(env.requests_to(DETAIL_PATH).await, 2);
}

#[tokio::test]
async fn test_cache_only_miss_makes_no_calls() {
    let env = TestEnv::start().await;
    let fetcher = CachingFetcher::new(env.cache_dir());
    let client = env.athlete_client(ATHLETE_ID);

    let activity: Option<StravaActivity> = fetcher
        .fetch(&client, 501, FetchPolicy::cache_only())
        .await
        .unwrap();
    let streams: Option<StreamSet> = fetcher
        .fetch(&client, 501, FetchPolicy::cache_only())
        .await
        .unwrap();

    assert!(activity.is_none());
    assert!(streams.is_none());
    assert_eq!(env.total_requests().await, 0);
}

#[tokio::test]
async fn test_streams_cached_separately_from_detail() {
    let env = TestEnv::start().await;
    env.mount_streams(501, &[[37.0, -122.0], [37.1, -122.1]]).await;
    let fetcher = CachingFetcher::new(env.cache_dir());
    let client = env.athlete_client(ATHLETE_ID);

    let streams: StreamSet = fetcher
        .fetch(&client, 501, FetchPolicy::cached())
        .await
        .unwrap()
        .expect("streams");
    assert_eq!(streams.latlng().map(|p| p.len()), Some(2));

    assert!(fetcher
        .cache_path(ATHLETE_ID, 501, ObjectKind::Streams)
        .is_file());
    assert!(!fetcher
        .cache_path(ATHLETE_ID, 501, ObjectKind::Activity)
        .exists());
}

#[tokio::test]
async fn test_corrupt_cache_file_is_replaced() {
    let env = TestEnv::start().await;
    env.mount_detail(activity_json(501, "Morning Ride", 12.0)).await;
    let fetcher = CachingFetcher::new(env.cache_dir());
    let client = env.athlete_client(ATHLETE_ID);

    let path = fetcher.cache_path(ATHLETE_ID, 501, ObjectKind::Activity);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{\"id\": 501, \"name\": trunc").unwrap();

    let activity: StravaActivity = fetcher
        .fetch(&client, 501, FetchPolicy::cached())
        .await
        .unwrap()
        .expect("refetched activity");
    assert_eq!(activity.name, "Morning Ride");
    assert_eq!(env.requests_to(DETAIL_PATH).await, 1);

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(serde_json::from_str::<serde_json::Value>(&contents).is_ok());
}

#[tokio::test]
async fn test_corrupt_cache_file_removed_on_lookup() {
    let env = TestEnv::start().await;
    let fetcher = CachingFetcher::new(env.cache_dir());
    let path = fetcher.cache_path(ATHLETE_ID, 7, ObjectKind::Activity);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "not json").unwrap();

    assert!(matches!(
        fetcher.lookup::<StravaActivity>(&path).await,
        CacheLookup::Corrupt(_)
    ));
    assert!(!path.exists());
    assert!(matches!(
        fetcher.lookup::<StravaActivity>(&path).await,
        CacheLookup::Miss
    ));
}

#[tokio::test]
async fn test_cache_only_corrupt_file_is_an_error() {
    let env = TestEnv::start().await;
    let fetcher = CachingFetcher::new(env.cache_dir());
    let client = env.athlete_client(ATHLETE_ID);
    let path = fetcher.cache_path(ATHLETE_ID, 501, ObjectKind::Activity);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "[]").unwrap();

    let result = fetcher
        .fetch::<StravaActivity>(&client, 501, FetchPolicy::cache_only())
        .await;
    assert!(matches!(result, Err(AppError::Cache(_))));
    assert_eq!(env.total_requests().await, 0);
}

#[tokio::test]
async fn test_not_found_is_none_and_not_cached() {
    let env = TestEnv::start().await;
    env.mount_status(DETAIL_PATH, 404).await;
    let fetcher = CachingFetcher::new(env.cache_dir());
    let client = env.athlete_client(ATHLETE_ID);

    let activity: Option<StravaActivity> = fetcher
        .fetch(&client, 501, FetchPolicy::cached())
        .await
        .unwrap();
    assert!(activity.is_none());
    assert!(!fetcher
        .cache_path(ATHLETE_ID, 501, ObjectKind::Activity)
        .exists());
}

#[tokio::test]
async fn test_unauthorized_fetch_is_authorization_error() {
    let env = TestEnv::start().await;
    env.mount_status(DETAIL_PATH, 401).await;
    let fetcher = CachingFetcher::new(env.cache_dir());
    let client = env.athlete_client(ATHLETE_ID);

    let err = fetcher
        .fetch::<StravaActivity>(&client, 501, FetchPolicy::cached())
        .await
        .unwrap_err();
    assert!(err.is_authorization_error());
}
