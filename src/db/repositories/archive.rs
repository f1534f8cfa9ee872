use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, types::Value, Connection};

use crate::{
    db::{
        connection::Database,
        helpers::{conversion_error, format_timestamp},
        migrations::Schema,
        models::ArchiveRecord,
        repositories::journal::JournalRepository,
    },
    stores::{ArchiveFilter, ArchiveStore, JournalEntry, JournalKey, MigrationJournal, StoreHealth},
};

/// Archive documents: indexed scalar columns for filtering, the full record
/// as a JSON body.
pub struct ArchiveRepository<'a> {
    conn: &'a Connection,
}

impl<'a> ArchiveRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, record: &ArchiveRecord) -> Result<i64> {
        let body = serde_json::to_string(record).context("failed to encode archive document")?;
        self.conn.execute(
            "INSERT INTO archive_documents (source_id, rover_id, created_at, body)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.id,
                record.rover_id,
                format_timestamp(&record.created_at),
                body
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert the document and mark it archived in the journal; neither
    /// persists without the other.
    pub fn insert_journaled(&self, record: &ArchiveRecord, key: JournalKey) -> Result<i64> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("failed to begin journaled archive insert")?;
        let doc_id = ArchiveRepository::new(&tx).insert(record)?;
        JournalRepository::new(&tx).record_archived(key)?;
        tx.commit().context("failed to commit journaled archive insert")?;
        Ok(doc_id)
    }

    pub fn find(&self, filter: &ArchiveFilter) -> Result<Vec<ArchiveRecord>> {
        let mut sql = String::from("SELECT body FROM archive_documents WHERE 1 = 1");
        let mut values: Vec<Value> = Vec::new();

        if !filter.rover_ids.is_empty() {
            let placeholders = vec!["?"; filter.rover_ids.len()].join(", ");
            sql.push_str(&format!(" AND rover_id IN ({placeholders})"));
            values.extend(filter.rover_ids.iter().map(|id| Value::Integer(*id)));
        }
        if let Some(from) = &filter.created_from {
            sql.push_str(" AND created_at >= ?");
            values.push(Value::Text(format_timestamp(from)));
        }
        if let Some(to) = &filter.created_to {
            sql.push_str(" AND created_at <= ?");
            values.push(Value::Text(format_timestamp(to)));
        }
        sql.push_str(" ORDER BY created_at ASC, doc_id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                let body: String = row.get(0)?;
                serde_json::from_str::<ArchiveRecord>(&body)
                    .map_err(|err| conversion_error(0, err.into()))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }
}

#[derive(Clone)]
pub struct SqliteArchiveStore {
    db: Database,
}

impl SqliteArchiveStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        Ok(Self {
            db: Database::open(path, Schema::Archive)?,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl ArchiveStore for SqliteArchiveStore {
    async fn insert(&self, record: &ArchiveRecord) -> Result<()> {
        let record = record.clone();
        self.db
            .execute(move |conn| ArchiveRepository::new(conn).insert(&record))
            .await?;
        Ok(())
    }

    async fn insert_journaled(&self, record: &ArchiveRecord, key: JournalKey) -> Result<()> {
        let record = record.clone();
        self.db
            .execute(move |conn| ArchiveRepository::new(conn).insert_journaled(&record, key))
            .await?;
        Ok(())
    }

    async fn find(&self, filter: &ArchiveFilter) -> Result<Vec<ArchiveRecord>> {
        let filter = filter.clone();
        self.db
            .execute(move |conn| ArchiveRepository::new(conn).find(&filter))
            .await
    }

    async fn health(&self) -> StoreHealth {
        match self.db.ping().await {
            Ok(()) => StoreHealth::Healthy,
            Err(err) => StoreHealth::Unhealthy(format!("{err:#}")),
        }
    }
}

// The journal shares the archive file so it outlives staging rollbacks.
#[async_trait]
impl MigrationJournal for SqliteArchiveStore {
    async fn lookup(&self, key: JournalKey) -> Result<Option<JournalEntry>> {
        self.db
            .execute(move |conn| JournalRepository::new(conn).lookup(key))
            .await
    }

    async fn record_upload(&self, key: JournalKey, blob_url: &str) -> Result<()> {
        let blob_url = blob_url.to_string();
        self.db
            .execute(move |conn| JournalRepository::new(conn).record_upload(key, &blob_url))
            .await
    }

    async fn settle(&self, keys: &[JournalKey]) -> Result<()> {
        let keys = keys.to_vec();
        self.db
            .execute(move |conn| JournalRepository::new(conn).settle(&keys))
            .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{db::migrations::run_migrations, detection::DetectionPoint};

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn, Schema::Archive).unwrap();
        conn
    }

    fn record(id: i64, rover_id: i64, hour: u32, flowers: usize) -> ArchiveRecord {
        ArchiveRecord {
            id,
            rover_id,
            random_id: id * 10,
            battery_status: 90.0,
            temp: 21.0,
            humidity: 0.5,
            blob_url: format!("file:///blobs/{id}.png"),
            image_data: vec![
                DetectionPoint {
                    x: 0.5,
                    y: 0.5,
                    confidence: Some(0.8),
                };
                flowers
            ],
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn find_filters_by_rover_and_inclusive_window() {
        let conn = conn();
        let repo = ArchiveRepository::new(&conn);
        repo.insert(&record(1, 1, 8, 2)).unwrap();
        repo.insert(&record(2, 1, 10, 3)).unwrap();
        repo.insert(&record(3, 2, 10, 1)).unwrap();
        repo.insert(&record(4, 3, 10, 5)).unwrap();

        let filter = ArchiveFilter {
            rover_ids: vec![1, 2],
            created_from: Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()),
            created_to: Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()),
        };
        let found = repo.find(&filter).unwrap();
        let ids: Vec<i64> = found.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn documents_keep_typed_points() {
        let conn = conn();
        let repo = ArchiveRepository::new(&conn);
        let original = record(7, 4, 12, 2);
        repo.insert(&original).unwrap();

        let found = repo.find(&ArchiveFilter::rover(4)).unwrap();
        assert_eq!(found, vec![original]);
    }

    #[test]
    fn journaled_insert_marks_the_journal() {
        let conn = conn();
        let key = JournalKey {
            staging_id: 3,
            random_id: 30,
        };
        JournalRepository::new(&conn)
            .record_upload(key, "file:///blobs/3.png")
            .unwrap();

        ArchiveRepository::new(&conn)
            .insert_journaled(&record(3, 1, 9, 1), key)
            .unwrap();

        assert!(JournalRepository::new(&conn).lookup(key).unwrap().unwrap().archived);
        assert_eq!(ArchiveRepository::new(&conn).find(&ArchiveFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn failed_journal_mark_discards_the_document() {
        let conn = conn();
        let key = JournalKey {
            staging_id: 3,
            random_id: 30,
        };

        // no upload was journaled, so the mark fails after the insert ran
        assert!(ArchiveRepository::new(&conn)
            .insert_journaled(&record(3, 1, 9, 1), key)
            .is_err());

        assert!(ArchiveRepository::new(&conn)
            .find(&ArchiveFilter::default())
            .unwrap()
            .is_empty());
    }
}
