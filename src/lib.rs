pub mod blob;
pub mod config;
pub mod db;
pub mod detection;
pub mod error;
pub mod http;
pub mod migration;
pub mod payload;
pub mod pollination;
pub mod settings;
pub mod stores;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::{
    blob::{HttpBlobStore, LocalBlobStore},
    config::ServiceArgs,
    db::{SqliteArchiveStore, SqliteStagingStore},
    detection::{ContourStrategy, DetectionEngine, ModelStrategy},
    http::AppState,
    migration::{DrainConfig, DrainScheduler, Drainer},
    pollination::PollinationAggregator,
    settings::PipelineSettings,
    stores::{BlobStore, MigrationJournal, RoverDirectory},
};

/// Open the stores and wire every component the router needs.
pub fn build_state(args: &ServiceArgs, settings: &PipelineSettings) -> Result<AppState> {
    let staging = Arc::new(
        SqliteStagingStore::open(args.staging_db.clone())
            .context("failed to open staging store")?,
    );
    let archive = Arc::new(
        SqliteArchiveStore::open(args.archive_db.clone())
            .context("failed to open archive store")?,
    );

    let blobs: Arc<dyn BlobStore> = match &args.blob_container_url {
        Some(url) => {
            info!("uploading blobs to container {url}");
            Arc::new(HttpBlobStore::new(url.clone(), args.blob_sas_token.clone()))
        }
        None => {
            info!("storing blobs under {}", args.blob_dir.display());
            Arc::new(LocalBlobStore::new(args.blob_dir.clone())?)
        }
    };

    let journal: Option<Arc<dyn MigrationJournal>> = if args.unguarded_replay {
        None
    } else {
        Some(archive.clone())
    };

    let drainer = Arc::new(Drainer::new(
        staging.clone(),
        archive.clone(),
        blobs.clone(),
        journal,
        DrainConfig {
            upload_timeout: settings.upload_timeout(),
            default_extension: settings.blob_default_extension.clone(),
        },
    ));

    let engine = Arc::new(DetectionEngine::new(
        ContourStrategy::new(settings.contour.clone()),
        ModelStrategy::from_artifact(args.model_path.clone(), settings.model.clone()),
        settings.sort_axis,
        settings.detection_timeout(),
    ));

    let aggregator = Arc::new(PollinationAggregator::new(archive.clone(), staging.clone()));
    let rovers: Arc<dyn RoverDirectory> = staging.clone();

    Ok(AppState {
        engine,
        drainer,
        aggregator,
        staging,
        archive,
        rovers,
        blobs,
        upload_timeout: settings.upload_timeout(),
    })
}

pub async fn run(args: ServiceArgs) -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("bloomscan starting up...");

    let settings = PipelineSettings::load(&args.settings)?;
    let state = build_state(&args, &settings)?;

    let mut scheduler = DrainScheduler::new();
    if let Some(interval) = args.drain_interval() {
        scheduler.start(state.drainer.clone(), interval)?;
    }

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!("listening on http://{}", args.bind);

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    scheduler.stop().await?;
    info!("bloomscan stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
