//! Seams between the pipeline and its storage backends.
//!
//! Backends report `anyhow::Error`; the drainer and aggregator decide which
//! [`PipelineError`](crate::error::PipelineError) kind a failure becomes.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::db::models::{ArchiveRecord, NewRover, NewStagingRecord, Rover, StagingRecord};

#[async_trait]
pub trait StagingStore: Send + Sync {
    async fn begin_batch(&self) -> Result<Box<dyn StagingBatch>>;
    async fn insert_record(&self, record: NewStagingRecord) -> Result<StagingRecord>;
    async fn health(&self) -> StoreHealth;
}

/// A pending set of staging removals.
///
/// Reads see committed rows minus the ones this batch has already marked.
/// Nothing is written until [`commit`](Self::commit), which applies every
/// mark in one transaction; other writers are never blocked in between.
#[async_trait]
pub trait StagingBatch: Send {
    async fn count_pending(&mut self) -> Result<u64>;
    async fn fetch_oldest(&mut self) -> Result<Option<StagingRecord>>;
    /// Mark a row for deletion. Fails if the row is not staged.
    async fn delete(&mut self, id: i64) -> Result<()>;
    /// Mark a row to be moved into quarantine along with `reason`.
    async fn quarantine(&mut self, id: i64, reason: &str) -> Result<()>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveFilter {
    /// Empty matches every rover.
    pub rover_ids: Vec<i64>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl ArchiveFilter {
    pub fn rover(rover_id: i64) -> Self {
        Self {
            rover_ids: vec![rover_id],
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn insert(&self, record: &ArchiveRecord) -> Result<()>;
    /// Insert `record` and mark `key` archived in this store's journal, in one
    /// transaction.
    async fn insert_journaled(&self, record: &ArchiveRecord, key: JournalKey) -> Result<()>;
    async fn find(&self, filter: &ArchiveFilter) -> Result<Vec<ArchiveRecord>>;
    async fn health(&self) -> StoreHealth;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `name` and return a URL that resolves to them.
    async fn upload(&self, bytes: Vec<u8>, name: &str) -> Result<String>;
}

#[async_trait]
pub trait RoverDirectory: Send + Sync {
    async fn rover(&self, rover_id: i64) -> Result<Option<Rover>>;
    async fn register_rover(&self, rover: NewRover) -> Result<Rover>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JournalKey {
    pub staging_id: i64,
    pub random_id: i64,
}

impl JournalKey {
    pub fn of(record: &StagingRecord) -> Self {
        Self {
            staging_id: record.id,
            random_id: record.random_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub blob_url: String,
    pub archived: bool,
}

/// Progress of individual records across drain attempts, kept outside the
/// staging transaction so it survives a rollback.
///
/// The "archived" mark is written by [`ArchiveStore::insert_journaled`], so
/// the journal must live in the archive store it guards.
#[async_trait]
pub trait MigrationJournal: Send + Sync {
    async fn lookup(&self, key: JournalKey) -> Result<Option<JournalEntry>>;
    async fn record_upload(&self, key: JournalKey, blob_url: &str) -> Result<()>;
    /// Forget entries whose staging rows are gone for good.
    async fn settle(&self, keys: &[JournalKey]) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreHealth {
    Healthy,
    Unhealthy(String),
    NotConnected,
}

impl StoreHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, StoreHealth::Healthy)
    }
}

impl fmt::Display for StoreHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreHealth::Healthy => f.write_str("healthy"),
            StoreHealth::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
            StoreHealth::NotConnected => f.write_str("not connected"),
        }
    }
}

impl Serialize for StoreHealth {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
