use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use tokio::{
    task::JoinHandle,
    time::{Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::drainer::Drainer;

/// Periodic drains on a background task. The first drain runs immediately.
pub struct DrainScheduler {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl DrainScheduler {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start(&mut self, drainer: Arc<Drainer>, interval: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("drain scheduler already running");
        }
        if interval.is_zero() {
            bail!("drain interval must be positive");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(drain_loop(drainer, interval, cancel_token.clone()));

        info!("drain scheduler started, every {}s", interval.as_secs());
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("drain loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for DrainScheduler {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn drain_loop(drainer: Arc<Drainer>, interval: Duration, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match drainer.drain().await {
                    Ok(report) if report.migrated_count + report.quarantined_count > 0 => {
                        info!(
                            "scheduled drain migrated {} records, quarantined {}",
                            report.migrated_count, report.quarantined_count
                        );
                    }
                    Ok(_) => {}
                    Err(err) if err.status().is_server_error() => {
                        error!("scheduled drain failed ({}): {err}", err.kind());
                    }
                    Err(err) => warn!("scheduled drain failed ({}): {err}", err.kind()),
                }
            }
            _ = cancel_token.cancelled() => {
                info!("drain loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        blob::LocalBlobStore,
        db::{models::NewStagingRecord, SqliteArchiveStore, SqliteStagingStore},
        migration::DrainConfig,
        payload::png_data_uri,
        stores::StagingStore,
    };

    #[tokio::test]
    async fn first_tick_drains_and_stop_joins() {
        let dir = tempfile::tempdir().unwrap();
        let staging = Arc::new(SqliteStagingStore::open(dir.path().join("staging.db")).unwrap());
        let archive = Arc::new(SqliteArchiveStore::open(dir.path().join("archive.db")).unwrap());
        staging
            .insert_record(NewStagingRecord {
                rover_id: 1,
                random_id: 1,
                battery_status: 50.0,
                temp: 20.0,
                humidity: 0.5,
                result_image: png_data_uri(b"pixels"),
                image_data: Vec::new(),
                created_at: None,
            })
            .await
            .unwrap();
        let drainer = Arc::new(Drainer::new(
            staging.clone(),
            archive.clone(),
            Arc::new(LocalBlobStore::new(dir.path().join("blobs")).unwrap()),
            Some(archive.clone()),
            DrainConfig::default(),
        ));

        let mut scheduler = DrainScheduler::new();
        assert!(scheduler.start(drainer.clone(), Duration::ZERO).is_err());
        scheduler
            .start(drainer.clone(), Duration::from_secs(3600))
            .unwrap();
        assert!(scheduler.start(drainer, Duration::from_secs(3600)).is_err());

        for _ in 0..50 {
            if staging.database().list_operations().await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(staging.database().list_operations().await.unwrap().is_empty());
        scheduler.stop().await.unwrap();
    }
}
