use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::{
    blob::{blob_name, upload_within},
    db::models::{ArchiveRecord, StagingRecord},
    detection::DetectionPoint,
    error::PipelineError,
    payload,
    stores::{
        ArchiveStore, BlobStore, JournalKey, MigrationJournal, StagingBatch, StagingStore,
    },
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub migrated_count: u64,
    /// Records whose upload or archive insert was skipped because an earlier
    /// attempt had already done it.
    pub replayed_count: u64,
    /// Records that could not be unpacked and were moved out of staging
    /// instead of archived.
    pub quarantined_count: u64,
}

#[derive(Debug, Clone)]
pub struct DrainConfig {
    pub upload_timeout: Duration,
    pub default_extension: String,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            upload_timeout: Duration::from_secs(30),
            default_extension: "png".into(),
        }
    }
}

/// Moves every staged record into the archive, offloading its image to blob
/// storage on the way.
///
/// Staging deletions commit together; uploads and archive inserts are not
/// undone when a later record fails. With a journal attached, a retry reuses
/// what the failed attempt already finished instead of repeating it. The
/// journal must be the one `archive` writes its "archived" marks into.
///
/// A record whose payload or point list cannot be read is quarantined rather
/// than failing the batch.
pub struct Drainer {
    staging: Arc<dyn StagingStore>,
    archive: Arc<dyn ArchiveStore>,
    blobs: Arc<dyn BlobStore>,
    journal: Option<Arc<dyn MigrationJournal>>,
    config: DrainConfig,
    gate: Mutex<()>,
}

enum Outcome {
    Migrated { key: JournalKey, replayed: bool },
    Quarantined,
}

impl Drainer {
    pub fn new(
        staging: Arc<dyn StagingStore>,
        archive: Arc<dyn ArchiveStore>,
        blobs: Arc<dyn BlobStore>,
        journal: Option<Arc<dyn MigrationJournal>>,
        config: DrainConfig,
    ) -> Self {
        if journal.is_none() {
            warn!("drainer running without a migration journal; retries may duplicate archive records");
        }
        Self {
            staging,
            archive,
            blobs,
            journal,
            config,
            gate: Mutex::new(()),
        }
    }

    pub async fn drain(&self) -> Result<DrainReport, PipelineError> {
        let _single_flight = self.gate.lock().await;

        let mut batch = self
            .staging
            .begin_batch()
            .await
            .map_err(PipelineError::staging)?;

        let count = match batch.count_pending().await {
            Ok(count) => count,
            Err(err) => {
                abandon(batch).await;
                return Err(PipelineError::staging(err));
            }
        };

        if count == 0 {
            abandon(batch).await;
            debug!("drain found nothing staged");
            return Ok(DrainReport::default());
        }

        let mut outcomes = Vec::new();
        for _ in 0..count {
            match self.drain_one(&mut batch).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    warn!(
                        "drain aborted after {} of {count} records: {err}",
                        outcomes.len()
                    );
                    abandon(batch).await;
                    return Err(err);
                }
            }
        }

        batch.commit().await.map_err(PipelineError::staging)?;

        let mut report = DrainReport::default();
        let mut keys = Vec::new();
        for outcome in &outcomes {
            match outcome {
                Outcome::Migrated { key, replayed } => {
                    report.migrated_count += 1;
                    report.replayed_count += u64::from(*replayed);
                    keys.push(*key);
                }
                Outcome::Quarantined => report.quarantined_count += 1,
            }
        }

        if let Some(journal) = &self.journal {
            if let Err(err) = journal.settle(&keys).await {
                // Stale entries only matter for ids staging will never hand out again.
                warn!("failed to settle migration journal: {err:#}");
            }
        }

        info!(
            "drained {} records ({} replayed, {} quarantined)",
            report.migrated_count, report.replayed_count, report.quarantined_count
        );
        Ok(report)
    }

    async fn drain_one(&self, batch: &mut Box<dyn StagingBatch>) -> Result<Outcome, PipelineError> {
        let record = batch
            .fetch_oldest()
            .await
            .map_err(PipelineError::staging)?
            .ok_or_else(|| {
                PipelineError::StagingStore("staging emptied while the batch was open".into())
            })?;
        let key = JournalKey::of(&record);

        let (bytes, points) = match unpack(&record) {
            Ok(unpacked) => unpacked,
            Err(reason) => {
                warn!("quarantining operation {}: {reason}", record.id);
                batch
                    .quarantine(record.id, &reason)
                    .await
                    .map_err(PipelineError::staging)?;
                return Ok(Outcome::Quarantined);
            }
        };

        let entry = match &self.journal {
            Some(journal) => journal.lookup(key).await.map_err(PipelineError::staging)?,
            None => None,
        };
        let replayed = entry.is_some();

        let (blob_url, archived) = match entry {
            Some(entry) => {
                debug!("operation {} resumes from journal", record.id);
                (entry.blob_url, entry.archived)
            }
            None => {
                let url = self.upload(bytes).await?;
                if let Some(journal) = &self.journal {
                    journal
                        .record_upload(key, &url)
                        .await
                        .map_err(PipelineError::staging)?;
                }
                (url, false)
            }
        };

        if !archived {
            let document = ArchiveRecord::from_staging(&record, blob_url, points);
            let inserted = match &self.journal {
                Some(_) => self.archive.insert_journaled(&document, key).await,
                None => self.archive.insert(&document).await,
            };
            inserted.map_err(PipelineError::archive_write)?;
        }

        batch
            .delete(record.id)
            .await
            .map_err(PipelineError::staging)?;

        Ok(Outcome::Migrated { key, replayed })
    }

    async fn upload(&self, bytes: Vec<u8>) -> Result<String, PipelineError> {
        let name = blob_name(&bytes, &self.config.default_extension);
        upload_within(self.blobs.as_ref(), bytes, &name, self.config.upload_timeout).await
    }
}

/// Decode the inline image and the point list before touching anything
/// outside staging. The error is the quarantine reason.
fn unpack(record: &StagingRecord) -> Result<(Vec<u8>, Vec<DetectionPoint>), String> {
    let bytes = payload::decode_image(&record.result_image).map_err(|err| format!("{err:#}"))?;
    let points = record.points().map_err(|err| format!("{err:#}"))?;
    Ok((bytes, points))
}

async fn abandon(batch: Box<dyn StagingBatch>) {
    if let Err(err) = batch.rollback().await {
        warn!("failed to roll back staging batch: {err:#}");
    }
}
