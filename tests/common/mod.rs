#![allow(dead_code)]

use std::{
    io::Cursor,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bloomscan_lib::{
    db::{
        models::{ArchiveRecord, NewStagingRecord},
        SqliteArchiveStore, SqliteStagingStore,
    },
    detection::DetectionPoint,
    stores::{
        ArchiveFilter, ArchiveStore, BlobStore, JournalEntry, JournalKey, MigrationJournal,
        StoreHealth,
    },
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

pub const NEVER: usize = usize::MAX;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

pub fn png_bytes(width: u32, height: u32, squares: &[(u32, u32)]) -> Vec<u8> {
    let mut img = RgbImage::new(width, height);
    for &(x0, y0) in squares {
        for y in y0..y0 + 20 {
            for x in x0..x0 + 20 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
    }
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn png_data_uri() -> String {
    format!(
        "data:image/png;base64,{}",
        STANDARD.encode(png_bytes(8, 8, &[]))
    )
}

pub fn point(x: f64, y: f64) -> DetectionPoint {
    DetectionPoint {
        x,
        y,
        confidence: None,
    }
}

pub fn new_record(rover_id: i64, random_id: i64, minutes: i64, flowers: usize) -> NewStagingRecord {
    NewStagingRecord {
        rover_id,
        random_id,
        battery_status: 87.5,
        temp: 21.5,
        humidity: 0.55,
        result_image: png_data_uri(),
        image_data: vec![point(0.25, 0.75); flowers],
        created_at: Some(base_time() + ChronoDuration::minutes(minutes)),
    }
}

pub fn open_stores(dir: &Path) -> (Arc<SqliteStagingStore>, Arc<SqliteArchiveStore>) {
    let staging = SqliteStagingStore::open(dir.join("staging.db")).unwrap();
    let archive = SqliteArchiveStore::open(dir.join("archive.db")).unwrap();
    (Arc::new(staging), Arc::new(archive))
}

pub async fn archived(archive: &SqliteArchiveStore) -> Vec<ArchiveRecord> {
    archive.find(&ArchiveFilter::default()).await.unwrap()
}

/// Write a row the way an outside ingest process would, bypassing typed
/// validation.
pub async fn stage_raw(
    staging: &SqliteStagingStore,
    random_id: i64,
    minutes: i64,
    result_image: String,
    image_data: &str,
) {
    let image_data = image_data.to_string();
    let created_at = (base_time() + ChronoDuration::minutes(minutes))
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    staging
        .database()
        .execute(move |conn| {
            conn.execute(
                "INSERT INTO operations (
                    rover_id, random_id, battery_status, temp, humidity,
                    result_image, image_data, created_at
                 ) VALUES (1, ?1, 50.0, 20.0, 0.5, ?2, ?3, ?4)",
                rusqlite::params![random_id, result_image, image_data, created_at],
            )?;
            Ok(())
        })
        .await
        .unwrap();
}

pub async fn quarantined_ids(staging: &SqliteStagingStore) -> Vec<i64> {
    staging
        .database()
        .execute(|conn| {
            let mut stmt =
                conn.prepare("SELECT random_id FROM quarantined_operations ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
        .await
        .unwrap()
}

/// Records every upload; fails the attempt whose zero-based index is `fail_at`.
pub struct RecordingBlobs {
    names: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    fail_at: AtomicUsize,
    delay: Duration,
}

impl RecordingBlobs {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            names: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail_at: AtomicUsize::new(NEVER),
            delay,
        }
    }

    pub fn fail_at(&self, attempt: usize) {
        self.fail_at.store(attempt, Ordering::SeqCst);
    }

    pub fn uploads(&self) -> Vec<String> {
        self.names.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for RecordingBlobs {
    async fn upload(&self, _bytes: Vec<u8>, name: &str) -> Result<String> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if attempt == self.fail_at.load(Ordering::SeqCst) {
            bail!("injected upload failure on attempt {attempt}");
        }
        self.names.lock().unwrap().push(name.to_string());
        Ok(format!("https://blobs.test/images/{name}"))
    }
}

/// Delegates to a real archive; fails the insert whose zero-based index is
/// `fail_at`.
pub struct FlakyArchive {
    inner: Arc<SqliteArchiveStore>,
    attempts: AtomicUsize,
    fail_at: AtomicUsize,
}

impl FlakyArchive {
    pub fn new(inner: Arc<SqliteArchiveStore>) -> Self {
        Self {
            inner,
            attempts: AtomicUsize::new(0),
            fail_at: AtomicUsize::new(NEVER),
        }
    }

    pub fn fail_at(&self, attempt: usize) {
        self.attempts.store(0, Ordering::SeqCst);
        self.fail_at.store(attempt, Ordering::SeqCst);
    }

    fn next_attempt(&self) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt == self.fail_at.load(Ordering::SeqCst) {
            bail!("injected archive failure on attempt {attempt}");
        }
        Ok(())
    }
}

#[async_trait]
impl ArchiveStore for FlakyArchive {
    async fn insert(&self, record: &ArchiveRecord) -> Result<()> {
        self.next_attempt()?;
        self.inner.insert(record).await
    }

    async fn insert_journaled(&self, record: &ArchiveRecord, key: JournalKey) -> Result<()> {
        self.next_attempt()?;
        self.inner.insert_journaled(record, key).await
    }

    async fn find(&self, filter: &ArchiveFilter) -> Result<Vec<ArchiveRecord>> {
        self.inner.find(filter).await
    }

    async fn health(&self) -> StoreHealth {
        self.inner.health().await
    }
}

/// For paths that must not reach the archive at all.
pub struct UntouchableArchive;

#[async_trait]
impl ArchiveStore for UntouchableArchive {
    async fn insert(&self, _record: &ArchiveRecord) -> Result<()> {
        panic!("archive insert was not expected");
    }

    async fn insert_journaled(&self, _record: &ArchiveRecord, _key: JournalKey) -> Result<()> {
        panic!("archive insert was not expected");
    }

    async fn find(&self, _filter: &ArchiveFilter) -> Result<Vec<ArchiveRecord>> {
        panic!("archive find was not expected");
    }

    async fn health(&self) -> StoreHealth {
        StoreHealth::NotConnected
    }
}

/// A journal over the real archive that loses its first upload entry, so the
/// archive's "archived" mark for that record fails after the document insert.
pub struct ForgetfulJournal {
    inner: Arc<SqliteArchiveStore>,
    forgotten: AtomicUsize,
}

impl ForgetfulJournal {
    pub fn new(inner: Arc<SqliteArchiveStore>) -> Self {
        Self {
            inner,
            forgotten: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MigrationJournal for ForgetfulJournal {
    async fn lookup(&self, key: JournalKey) -> Result<Option<JournalEntry>> {
        self.inner.lookup(key).await
    }

    async fn record_upload(&self, key: JournalKey, blob_url: &str) -> Result<()> {
        if self.forgotten.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(());
        }
        self.inner.record_upload(key, blob_url).await
    }

    async fn settle(&self, keys: &[JournalKey]) -> Result<()> {
        self.inner.settle(keys).await
    }
}
