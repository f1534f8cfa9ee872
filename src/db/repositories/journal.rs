use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::{
    db::helpers::format_timestamp,
    stores::{JournalEntry, JournalKey},
};

pub struct JournalRepository<'a> {
    conn: &'a Connection,
}

impl<'a> JournalRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn lookup(&self, key: JournalKey) -> Result<Option<JournalEntry>> {
        self.conn
            .query_row(
                "SELECT blob_url, archived_at FROM migration_journal
                 WHERE staging_id = ?1 AND random_id = ?2",
                params![key.staging_id, key.random_id],
                |row| {
                    Ok(JournalEntry {
                        blob_url: row.get(0)?,
                        archived: row.get::<_, Option<String>>(1)?.is_some(),
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn record_upload(&self, key: JournalKey, blob_url: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO migration_journal (staging_id, random_id, blob_url, recorded_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(staging_id, random_id) DO UPDATE SET
                 blob_url = excluded.blob_url,
                 recorded_at = excluded.recorded_at",
            params![
                key.staging_id,
                key.random_id,
                blob_url,
                format_timestamp(&Utc::now())
            ],
        )?;
        Ok(())
    }

    pub fn record_archived(&self, key: JournalKey) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE migration_journal SET archived_at = ?1
             WHERE staging_id = ?2 AND random_id = ?3",
            params![format_timestamp(&Utc::now()), key.staging_id, key.random_id],
        )?;
        if updated == 0 {
            bail!(
                "no upload journaled for operation {} (random_id {})",
                key.staging_id,
                key.random_id
            );
        }
        Ok(())
    }

    pub fn settle(&self, keys: &[JournalKey]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "DELETE FROM migration_journal WHERE staging_id = ?1 AND random_id = ?2",
            )?;
            for key in keys {
                stmt.execute(params![key.staging_id, key.random_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
