// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! On-disk cache in front of Strava detail and stream fetches.
//!
//! Files live at `<root>/<athlete_id>/<object_id>[_streams].json` and hold
//! the response body exactly as Strava sent it, so cached data can be
//! replayed later without spending API quota.

use crate::error::{AppError, Result};
use crate::services::strava::{AthleteClient, StravaActivity, StreamSet};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Kind of remote object, which decides the endpoint and file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Activity,
    Streams,
}

impl ObjectKind {
    fn file_suffix(&self) -> &'static str {
        match self {
            ObjectKind::Activity => "",
            ObjectKind::Streams => "_streams",
        }
    }
}

/// A remote object that can go through the cache.
pub trait CachedObject: DeserializeOwned {
    const KIND: ObjectKind;
}

impl CachedObject for StravaActivity {
    const KIND: ObjectKind = ObjectKind::Activity;
}

impl CachedObject for StreamSet {
    const KIND: ObjectKind = ObjectKind::Streams;
}

/// Whether a fetch may read the cache and whether it may go remote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchPolicy {
    pub use_cache: bool,
    /// Never call Strava. Implies `use_cache`.
    pub only_cache: bool,
}

impl FetchPolicy {
    /// Always go to Strava (and refresh the cache file).
    pub fn remote() -> Self {
        Self::default()
    }

    /// Prefer the cache, fall back to Strava.
    pub fn cached() -> Self {
        Self {
            use_cache: true,
            only_cache: false,
        }
    }

    /// Cache or nothing.
    pub fn cache_only() -> Self {
        Self {
            use_cache: true,
            only_cache: true,
        }
    }

    fn reads_cache(&self) -> bool {
        self.use_cache || self.only_cache
    }
}

/// Result of looking in the cache.
#[derive(Debug)]
pub enum CacheLookup<T> {
    Hit(T),
    Miss,
    /// File existed but could not be used; it has been removed.
    Corrupt(String),
}

/// Cache-mediated fetcher for per-athlete Strava objects.
#[derive(Debug, Clone)]
pub struct CachingFetcher {
    cache_root: PathBuf,
}

impl CachingFetcher {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
        }
    }

    pub fn cache_path(&self, athlete_id: u64, object_id: u64, kind: ObjectKind) -> PathBuf {
        self.cache_root
            .join(athlete_id.to_string())
            .join(format!("{}{}.json", object_id, kind.file_suffix()))
    }

    /// Fetch an object, honoring `policy`. `Ok(None)` means "not available":
    /// Strava has no such object, or the cache is empty under `only_cache`.
    pub async fn fetch<T: CachedObject>(
        &self,
        client: &AthleteClient,
        object_id: u64,
        policy: FetchPolicy,
    ) -> Result<Option<T>> {
        let athlete_id = client.athlete_id();
        let path = self.cache_path(athlete_id, object_id, T::KIND);

        if policy.reads_cache() {
            match self.lookup::<T>(&path).await {
                CacheLookup::Hit(object) => {
                    tracing::debug!(athlete_id, object_id, kind = ?T::KIND, "Cache hit");
                    return Ok(Some(object));
                }
                CacheLookup::Miss => {}
                CacheLookup::Corrupt(reason) if policy.only_cache => {
                    return Err(AppError::Cache(format!(
                        "Corrupt cache file {} and remote fetch disabled: {}",
                        path.display(),
                        reason
                    )));
                }
                CacheLookup::Corrupt(_) => {}
            }
        }

        if policy.only_cache {
            tracing::debug!(athlete_id, object_id, kind = ?T::KIND, "Cache miss (cache only)");
            return Ok(None);
        }

        let body = match T::KIND {
            ObjectKind::Activity => client.get_activity_raw(object_id).await?,
            ObjectKind::Streams => client.get_streams_raw(object_id).await?,
        };
        let Some(body) = body else {
            tracing::info!(athlete_id, object_id, kind = ?T::KIND, "Not found on Strava");
            return Ok(None);
        };

        let object: T = serde_json::from_str(&body).map_err(|e| {
            AppError::DataEntry(format!("Unparsable {:?} {}: {}", T::KIND, object_id, e))
        })?;

        self.store(&path, &body).await;
        Ok(Some(object))
    }

    /// Read and parse a cache file. Unusable files are deleted.
    pub async fn lookup<T: CachedObject>(&self, path: &Path) -> CacheLookup<T> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CacheLookup::Miss,
            Err(e) => return self.discard(path, e.to_string()).await,
        };

        match serde_json::from_str(&contents) {
            Ok(object) => CacheLookup::Hit(object),
            Err(e) => self.discard(path, e.to_string()).await,
        }
    }

    async fn discard<T>(&self, path: &Path, reason: String) -> CacheLookup<T> {
        tracing::warn!(path = %path.display(), error = %reason, "Removing corrupt cache file");
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove cache file");
        }
        CacheLookup::Corrupt(reason)
    }

    /// Best-effort write; failures are logged only.
    async fn store(&self, path: &Path, body: &str) {
        if let Err(e) = write_file(path, body).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to write cache file");
        }
    }
}

async fn write_file(path: &Path, body: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, body).await
}
