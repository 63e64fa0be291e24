//! Synced record snapshot repository implementation

use libsql::{params, Connection, Row};

use super::{from_json, to_json};
use crate::error::Result;
use crate::models::SyncedRecord;

/// Trait for synced record snapshot operations (async)
#[allow(async_fn_in_trait)]
pub trait RecordRepository {
    /// Get the snapshot of a record
    async fn get(&self, table_name: &str, record_id: &str) -> Result<Option<SyncedRecord>>;

    /// Insert or replace a snapshot
    async fn upsert(&self, record: &SyncedRecord) -> Result<()>;

    /// Delete a snapshot; returns whether a row was removed
    async fn remove(&self, table_name: &str, record_id: &str) -> Result<bool>;

    /// List snapshots of one table ordered by record id
    async fn list(&self, table_name: &str) -> Result<Vec<SyncedRecord>>;
}

/// libSQL implementation of `RecordRepository`
pub struct LibSqlRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_record(row: &Row) -> Result<SyncedRecord> {
        let payload: String = row.get(2)?;
        Ok(SyncedRecord {
            table_name: row.get(0)?,
            record_id: row.get(1)?,
            payload: from_json(&payload)?,
            version: row.get(3)?,
            synced_at: row.get(4)?,
        })
    }
}

impl RecordRepository for LibSqlRecordRepository<'_> {
    async fn get(&self, table_name: &str, record_id: &str) -> Result<Option<SyncedRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT table_name, record_id, payload, version, synced_at
                 FROM synced_records WHERE table_name = ? AND record_id = ?",
                params![table_name, record_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, record: &SyncedRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO synced_records
                    (table_name, record_id, payload, version, synced_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    record.table_name.as_str(),
                    record.record_id.as_str(),
                    to_json(&record.payload)?,
                    record.version,
                    record.synced_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, table_name: &str, record_id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM synced_records WHERE table_name = ? AND record_id = ?",
                params![table_name, record_id],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn list(&self, table_name: &str) -> Result<Vec<SyncedRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT table_name, record_id, payload, version, synced_at
                 FROM synced_records WHERE table_name = ? ORDER BY record_id ASC",
                params![table_name],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }
}
