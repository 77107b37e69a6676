// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! ride-sync server and one-shot sync commands.
//!
//! `run` starts the Strava webhook receiver, the periodic bulk jobs and the
//! activity-update subscriber; the `sync-*` subcommands run one bulk job
//! and exit.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use ride_sync::{
    config::Config,
    db::{FirestoreDb, FirestoreQueue, SyncStore},
    services::{
        queue::DEFAULT_TIME_TO_RUN, EnrichOptions, FetchPolicy, ReconcileOptions, SyncScheduler,
        SyncServices, WorkQueue,
    },
    AppState,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ride-sync", version, about = "Strava ride sync for team competitions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve webhooks, run scheduled jobs and process queued updates (default)
    Run,
    /// Reconcile athletes' ride listings with the store
    SyncActivities {
        /// Only this athlete (repeatable)
        #[arg(long = "athlete-id")]
        athlete_ids: Vec<u64>,
        /// Rewrite rides already stored (no additional API calls)
        #[arg(long)]
        rewrite: bool,
        /// Run after the competition closed, without the end-time check
        #[arg(long)]
        force: bool,
    },
    /// Fetch activity detail for rides that need it
    SyncDetails(EnrichArgs),
    /// Fetch GPS tracks for rides that need them
    SyncStreams(EnrichArgs),
    /// Sync non-primary photos
    SyncPhotos {
        #[arg(long)]
        athlete_id: Option<u64>,
        #[arg(long)]
        activity_id: Option<u64>,
        /// Resync rides whose photos are already fetched
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct EnrichArgs {
    #[arg(long)]
    athlete_id: Option<u64>,
    /// Process rides regardless of their flag
    #[arg(long)]
    rewrite: bool,
    #[arg(long)]
    max_records: Option<usize>,
    /// Always fetch from Strava, ignoring cached copies
    #[arg(long, conflicts_with = "only_cache")]
    no_cache: bool,
    /// Never call Strava; skip rides without a cached copy
    #[arg(long)]
    only_cache: bool,
}

impl EnrichArgs {
    fn options(&self) -> EnrichOptions {
        EnrichOptions {
            athlete_id: self.athlete_id,
            rewrite: self.rewrite,
            max_records: self.max_records,
            policy: FetchPolicy {
                use_cache: !self.no_cache,
                only_cache: self.only_cache,
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging for GCP
    init_logging();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let db = FirestoreDb::new(&config.gcp_project_id)
        .await
        .context("Failed to connect to Firestore")?;
    let store: Arc<dyn SyncStore> = Arc::new(db.clone());
    let services = SyncServices::new(&config, store.clone());

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, db, store, services).await?,
        Command::SyncActivities {
            athlete_ids,
            rewrite,
            force,
        } => {
            let ids = (!athlete_ids.is_empty()).then_some(athlete_ids.as_slice());
            let report = services
                .reconciler
                .sync_rides(ids, ReconcileOptions { rewrite, force })
                .await?;
            tracing::info!(?report, "sync-activities complete");
        }
        Command::SyncDetails(args) => {
            let report = services.detail.sync_details(args.options()).await?;
            tracing::info!(?report, "sync-details complete");
        }
        Command::SyncStreams(args) => {
            let report = services.streams.sync_streams(args.options()).await?;
            tracing::info!(?report, "sync-streams complete");
        }
        Command::SyncPhotos {
            athlete_id,
            activity_id,
            force,
        } => {
            let report = services
                .photos
                .sync_photos(athlete_id, activity_id, force)
                .await?;
            tracing::info!(?report, "sync-photos complete");
        }
    }
    Ok(())
}

async fn run(
    config: Config,
    db: FirestoreDb,
    store: Arc<dyn SyncStore>,
    services: SyncServices,
) -> anyhow::Result<()> {
    tracing::info!(port = config.port, "Starting ride-sync");

    let queue: Arc<dyn WorkQueue> = Arc::new(FirestoreQueue::new(db, DEFAULT_TIME_TO_RUN));
    let shutdown = CancellationToken::new();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            tracing::info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    let mut scheduled = SyncScheduler::new(services.clone(), &config).spawn(shutdown.clone());

    let state = Arc::new(AppState {
        config: config.clone(),
        store: store.clone(),
        queue: queue.clone(),
    });
    let app = ride_sync::routes::create_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        }
    });

    // Foreground: the subscriber loop, until shutdown.
    services.subscriber(&config, queue, store).run(shutdown.clone()).await;

    server.await.context("Server task panicked")??;
    while let Some(result) = scheduled.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Scheduled job task failed");
        }
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ride_sync=debug,info"));

    tracing_subscriber::registry().with(filter).with(format).init();
}
