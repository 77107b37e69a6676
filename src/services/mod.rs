// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - sync engine logic.

pub mod cache;
pub mod credentials;
pub mod detail;
pub mod photos;
pub mod queue;
pub mod reconcile;
pub mod rides;
pub mod scheduler;
pub mod streams;
pub mod strava;
pub mod subscriber;

pub use cache::{CachingFetcher, FetchPolicy};
pub use credentials::CredentialManager;
pub use detail::{DetailEnricher, EnrichOptions, EnrichReport};
pub use photos::PhotoSync;
pub use queue::{ActivityUpdate, MemoryQueue, Operation, WorkQueue};
pub use reconcile::{ActivityReconciler, ReconcileOptions, ReconcileReport};
pub use scheduler::SyncScheduler;
pub use streams::StreamEnricher;
pub use strava::StravaClient;
pub use subscriber::UpdateSubscriber;

use crate::config::Config;
use crate::db::SyncStore;
use std::sync::Arc;

/// The sync services, wired to one store and one Strava client.
#[derive(Clone)]
pub struct SyncServices {
    pub credentials: CredentialManager,
    pub reconciler: ActivityReconciler,
    pub detail: DetailEnricher,
    pub streams: StreamEnricher,
    pub photos: PhotoSync,
}

impl SyncServices {
    pub fn new(config: &Config, store: Arc<dyn SyncStore>) -> Self {
        let credentials = CredentialManager::new(StravaClient::from_config(config), store.clone());
        let fetcher = CachingFetcher::new(&config.cache_dir);

        Self {
            reconciler: ActivityReconciler::new(credentials.clone(), store.clone(), config),
            detail: DetailEnricher::new(credentials.clone(), store.clone(), fetcher.clone(), config),
            streams: StreamEnricher::new(credentials.clone(), store.clone(), fetcher),
            photos: PhotoSync::new(credentials.clone(), store),
            credentials,
        }
    }

    /// Queue subscriber sharing these services' write paths.
    pub fn subscriber(
        &self,
        config: &Config,
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn SyncStore>,
    ) -> UpdateSubscriber {
        UpdateSubscriber::new(
            queue,
            store,
            self.detail.clone(),
            self.streams.clone(),
            config,
        )
    }
}
