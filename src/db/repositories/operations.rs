use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::{
    db::{
        connection::Database,
        helpers::{conversion_error, format_timestamp, parse_datetime, to_u64},
        migrations::Schema,
        models::{NewRover, NewStagingRecord, Rover, StagingRecord},
        repositories::rovers::RoverRepository,
    },
    stores::{RoverDirectory, StagingBatch, StagingStore, StoreHealth},
};

const RECORD_COLUMNS: &str = "id, rover_id, random_id, battery_status, temp, humidity, \
                              result_image, image_data, created_at";

fn not_in(ids: &[i64]) -> String {
    if ids.is_empty() {
        String::new()
    } else {
        format!(" WHERE id NOT IN ({})", vec!["?"; ids.len()].join(", "))
    }
}

fn row_to_record(row: &Row) -> Result<StagingRecord, rusqlite::Error> {
    let created_at: String = row.get(8)?;

    Ok(StagingRecord {
        id: row.get(0)?,
        rover_id: row.get(1)?,
        random_id: row.get(2)?,
        battery_status: row.get(3)?,
        temp: row.get(4)?,
        humidity: row.get(5)?,
        result_image: row.get(6)?,
        image_data: row.get(7)?,
        created_at: parse_datetime(&created_at, "created_at")
            .map_err(|err| conversion_error(8, err))?,
    })
}

pub struct OperationRepository<'a> {
    conn: &'a Connection,
}

impl<'a> OperationRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, record: &NewStagingRecord) -> Result<StagingRecord> {
        let created_at = record.created_at.unwrap_or_else(Utc::now);
        let image_data =
            serde_json::to_string(&record.image_data).context("failed to encode image_data")?;

        self.conn.execute(
            "INSERT INTO operations (
                rover_id, random_id, battery_status, temp, humidity,
                result_image, image_data, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.rover_id,
                record.random_id,
                record.battery_status,
                record.temp,
                record.humidity,
                record.result_image,
                image_data,
                format_timestamp(&created_at),
            ],
        )?;

        Ok(StagingRecord {
            id: self.conn.last_insert_rowid(),
            rover_id: record.rover_id,
            random_id: record.random_id,
            battery_status: record.battery_status,
            temp: record.temp,
            humidity: record.humidity,
            result_image: record.result_image.clone(),
            image_data,
            created_at,
        })
    }

    pub fn count_excluding(&self, skip: &[i64]) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM operations{}", not_in(skip)),
            params_from_iter(skip.iter()),
            |row| row.get(0),
        )?;
        to_u64(count, "pending count")
    }

    pub fn oldest_excluding(&self, skip: &[i64]) -> Result<Option<StagingRecord>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM operations{}
                     ORDER BY created_at ASC, id ASC LIMIT 1",
                    not_in(skip)
                ),
                params_from_iter(skip.iter()),
                row_to_record,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn exists(&self, id: i64) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM operations WHERE id = ?1",
                params![id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let removed = self
            .conn
            .execute("DELETE FROM operations WHERE id = ?1", params![id])?;
        if removed == 0 {
            bail!("operation {id} is not staged");
        }
        Ok(())
    }

    /// Copy the row into `quarantined_operations`, then remove it.
    pub fn quarantine(&self, id: i64, reason: &str) -> Result<()> {
        let moved = self.conn.execute(
            "INSERT INTO quarantined_operations (
                id, rover_id, random_id, battery_status, temp, humidity,
                result_image, image_data, created_at, reason, quarantined_at
             )
             SELECT id, rover_id, random_id, battery_status, temp, humidity,
                    result_image, image_data, created_at, ?2, ?3
             FROM operations WHERE id = ?1",
            params![id, reason, format_timestamp(&Utc::now())],
        )?;
        if moved == 0 {
            bail!("operation {id} is not staged");
        }
        self.delete(id)
    }

    pub fn list(&self) -> Result<Vec<StagingRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM operations ORDER BY created_at ASC, id ASC"
        ))?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

impl Database {
    pub async fn insert_operation(&self, record: NewStagingRecord) -> Result<StagingRecord> {
        self.execute(move |conn| OperationRepository::new(conn).insert(&record))
            .await
    }

    pub async fn list_operations(&self) -> Result<Vec<StagingRecord>> {
        self.execute(|conn| OperationRepository::new(conn).list())
            .await
    }
}

/// Staging table plus the rover directory, both in one SQLite file.
#[derive(Clone)]
pub struct SqliteStagingStore {
    db: Database,
}

impl SqliteStagingStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        Ok(Self {
            db: Database::open(path, Schema::Staging)?,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl StagingStore for SqliteStagingStore {
    async fn begin_batch(&self) -> Result<Box<dyn StagingBatch>> {
        Ok(Box::new(SqliteStagingBatch {
            db: self.db.clone(),
            deletes: Vec::new(),
            quarantines: Vec::new(),
        }))
    }

    async fn insert_record(&self, record: NewStagingRecord) -> Result<StagingRecord> {
        self.db.insert_operation(record).await
    }

    async fn health(&self) -> StoreHealth {
        match self.db.ping().await {
            Ok(()) => StoreHealth::Healthy,
            Err(err) => StoreHealth::Unhealthy(format!("{err:#}")),
        }
    }
}

#[async_trait]
impl RoverDirectory for SqliteStagingStore {
    async fn rover(&self, rover_id: i64) -> Result<Option<Rover>> {
        self.db
            .execute(move |conn| RoverRepository::new(conn).get(rover_id))
            .await
    }

    async fn register_rover(&self, rover: NewRover) -> Result<Rover> {
        self.db
            .execute(move |conn| RoverRepository::new(conn).insert(&rover))
            .await
    }
}

/// Marks collected in memory and applied under one `BEGIN IMMEDIATE` on
/// commit, so ingest keeps writing while the drain uploads.
pub struct SqliteStagingBatch {
    db: Database,
    deletes: Vec<i64>,
    quarantines: Vec<(i64, String)>,
}

impl SqliteStagingBatch {
    fn marked(&self) -> Vec<i64> {
        self.deletes
            .iter()
            .copied()
            .chain(self.quarantines.iter().map(|(id, _)| *id))
            .collect()
    }

    async fn ensure_staged(&self, id: i64) -> Result<()> {
        if self.marked().contains(&id) {
            bail!("operation {id} is already marked in this batch");
        }
        let staged = self
            .db
            .execute(move |conn| OperationRepository::new(conn).exists(id))
            .await?;
        if !staged {
            bail!("operation {id} is not staged");
        }
        Ok(())
    }
}

#[async_trait]
impl StagingBatch for SqliteStagingBatch {
    async fn count_pending(&mut self) -> Result<u64> {
        let skip = self.marked();
        self.db
            .execute(move |conn| OperationRepository::new(conn).count_excluding(&skip))
            .await
    }

    async fn fetch_oldest(&mut self) -> Result<Option<StagingRecord>> {
        let skip = self.marked();
        self.db
            .execute(move |conn| OperationRepository::new(conn).oldest_excluding(&skip))
            .await
    }

    async fn delete(&mut self, id: i64) -> Result<()> {
        self.ensure_staged(id).await?;
        self.deletes.push(id);
        Ok(())
    }

    async fn quarantine(&mut self, id: i64, reason: &str) -> Result<()> {
        self.ensure_staged(id).await?;
        self.quarantines.push((id, reason.to_string()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let SqliteStagingBatch {
            db,
            deletes,
            quarantines,
        } = *self;
        if deletes.is_empty() && quarantines.is_empty() {
            return Ok(());
        }

        let (removed, set_aside) = (deletes.len(), quarantines.len());
        db.execute(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .context("failed to begin staging commit")?;
            {
                let repo = OperationRepository::new(&tx);
                for (id, reason) in &quarantines {
                    repo.quarantine(*id, reason)?;
                }
                for id in &deletes {
                    repo.delete(*id)?;
                }
            }
            tx.commit().context("failed to commit staging batch")
        })
        .await?;

        debug!("staging batch committed: {removed} removed, {set_aside} quarantined");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!(
            "staging batch rolled back; {} marks discarded",
            self.deletes.len() + self.quarantines.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::db::migrations::run_migrations;

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn, Schema::Staging).unwrap();
        conn
    }

    fn staged(repo: &OperationRepository, random_id: i64, hour: u32) -> StagingRecord {
        repo.insert(&NewStagingRecord {
            rover_id: 1,
            random_id,
            battery_status: 80.0,
            temp: 20.0,
            humidity: 0.4,
            result_image: "aGVsbG8=".into(),
            image_data: Vec::new(),
            created_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()),
        })
        .unwrap()
    }

    #[test]
    fn oldest_skips_excluded_rows() {
        let conn = conn();
        let repo = OperationRepository::new(&conn);
        let first = staged(&repo, 1, 8);
        let second = staged(&repo, 2, 9);

        assert_eq!(repo.count_excluding(&[]).unwrap(), 2);
        assert_eq!(repo.count_excluding(&[first.id]).unwrap(), 1);
        assert_eq!(
            repo.oldest_excluding(&[first.id]).unwrap().unwrap().id,
            second.id
        );
        assert!(repo
            .oldest_excluding(&[first.id, second.id])
            .unwrap()
            .is_none());
    }

    #[test]
    fn quarantine_moves_the_row_aside() {
        let conn = conn();
        let repo = OperationRepository::new(&conn);
        let record = staged(&repo, 7, 8);

        repo.quarantine(record.id, "malformed image_data").unwrap();

        assert!(!repo.exists(record.id).unwrap());
        let (random_id, reason): (i64, String) = conn
            .query_row(
                "SELECT random_id, reason FROM quarantined_operations WHERE id = ?1",
                params![record.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(random_id, 7);
        assert_eq!(reason, "malformed image_data");
        assert!(repo.quarantine(record.id, "again").is_err());
    }
}
