//! Pending mutation repository implementation

use libsql::{params, Connection, Row};

use super::{from_json, sql_in_list, to_json, to_u32, to_u64};
use crate::error::{Error, Result};
use crate::models::{MutationId, Payload, PendingMutation, SyncStats, SyncStatus};

const MUTATION_COLUMNS: &str = "id, table_name, record_id, payload, operation, sync_status,
    created_at, last_modified, last_sync_attempt, error_message, retry_count,
    base_version, metadata";

/// Trait for pending mutation storage operations (async)
#[allow(async_fn_in_trait)]
pub trait MutationRepository {
    /// Insert a mutation, replacing any row for the same `(table_name, record_id)`
    async fn upsert(&self, mutation: &PendingMutation) -> Result<()>;

    /// Get a mutation by ID
    async fn get(&self, id: &MutationId) -> Result<Option<PendingMutation>>;

    /// Get the mutation queued for a record
    async fn get_for_record(
        &self,
        table_name: &str,
        record_id: &str,
    ) -> Result<Option<PendingMutation>>;

    /// List mutations with one of `statuses`, oldest first
    async fn list(&self, statuses: &[SyncStatus]) -> Result<Vec<PendingMutation>>;

    /// Partially update the sync status of a mutation
    async fn update_status(
        &self,
        id: &MutationId,
        status: SyncStatus,
        error_message: Option<&str>,
        retry_count: Option<u32>,
    ) -> Result<()>;

    /// Re-queue a mutation with a merged payload against a newer remote version.
    ///
    /// The record exists remotely at that point, so the operation becomes `Update`.
    async fn update_payload(
        &self,
        id: &MutationId,
        payload: &Payload,
        base_version: Option<i64>,
        status: SyncStatus,
    ) -> Result<()>;

    /// Delete a mutation; returns whether a row was removed
    async fn remove(&self, id: &MutationId) -> Result<bool>;

    /// Delete every `Synced` mutation
    async fn remove_synced(&self) -> Result<u64>;

    /// Move `from` rows to `PendingUpload`, optionally bounded by retry count
    async fn requeue(&self, from: SyncStatus, max_retries: Option<u32>) -> Result<u64>;

    /// Reset failed mutations (all, or one) for a manual retry
    async fn reset_failed(&self, id: Option<&MutationId>) -> Result<u64>;

    /// Aggregate counts by status
    async fn stats(&self) -> Result<SyncStats>;
}

/// libSQL implementation of `MutationRepository`
pub struct LibSqlMutationRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMutationRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a mutation from a database row
    fn parse_mutation(row: &Row) -> Result<PendingMutation> {
        let id: String = row.get(0)?;
        let payload: String = row.get(3)?;
        let operation: String = row.get(4)?;
        let sync_status: String = row.get(5)?;
        let metadata: String = row.get(12)?;

        Ok(PendingMutation {
            id: id
                .parse()
                .map_err(|_| Error::InvalidInput(format!("Invalid mutation ID: {id}")))?,
            table_name: row.get(1)?,
            record_id: row.get(2)?,
            payload: from_json(&payload)?,
            operation: operation.parse()?,
            sync_status: sync_status.parse()?,
            created_at: row.get(6)?,
            last_modified: row.get(7)?,
            last_sync_attempt: row.get(8)?,
            error_message: row.get(9)?,
            retry_count: to_u32(row.get(10)?),
            base_version: row.get(11)?,
            metadata: from_json(&metadata)?,
        })
    }

    async fn query_one(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Option<PendingMutation>> {
        let mut rows = self.conn.query(sql, params).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_mutation(&row)?)),
            None => Ok(None),
        }
    }
}

impl MutationRepository for LibSqlMutationRepository<'_> {
    async fn upsert(&self, mutation: &PendingMutation) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO pending_mutations ({MUTATION_COLUMNS})
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    mutation.id.as_str(),
                    mutation.table_name.as_str(),
                    mutation.record_id.as_str(),
                    to_json(&mutation.payload)?,
                    mutation.operation.as_str(),
                    mutation.sync_status.as_str(),
                    mutation.created_at,
                    mutation.last_modified,
                    mutation.last_sync_attempt,
                    mutation.error_message.clone(),
                    i64::from(mutation.retry_count),
                    mutation.base_version,
                    to_json(&mutation.metadata)?,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &MutationId) -> Result<Option<PendingMutation>> {
        self.query_one(
            &format!("SELECT {MUTATION_COLUMNS} FROM pending_mutations WHERE id = ?"),
            params![id.as_str()],
        )
        .await
    }

    async fn get_for_record(
        &self,
        table_name: &str,
        record_id: &str,
    ) -> Result<Option<PendingMutation>> {
        self.query_one(
            &format!(
                "SELECT {MUTATION_COLUMNS} FROM pending_mutations
                 WHERE table_name = ? AND record_id = ?"
            ),
            params![table_name, record_id],
        )
        .await
    }

    async fn list(&self, statuses: &[SyncStatus]) -> Result<Vec<PendingMutation>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let filter = sql_in_list(statuses.iter().map(|status| status.as_str()));
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {MUTATION_COLUMNS} FROM pending_mutations
                     WHERE sync_status IN {filter}
                     ORDER BY created_at ASC, id ASC"
                ),
                (),
            )
            .await?;

        let mut mutations = Vec::new();
        while let Some(row) = rows.next().await? {
            mutations.push(Self::parse_mutation(&row)?);
        }
        Ok(mutations)
    }

    async fn update_status(
        &self,
        id: &MutationId,
        status: SyncStatus,
        error_message: Option<&str>,
        retry_count: Option<u32>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();

        let rows = self
            .conn
            .execute(
                "UPDATE pending_mutations SET
                    sync_status = ?1,
                    error_message = CASE WHEN ?1 = 'synced' THEN NULL
                                         ELSE COALESCE(?2, error_message) END,
                    retry_count = COALESCE(?3, retry_count),
                    last_sync_attempt = CASE WHEN ?1 = 'syncing' THEN ?4
                                             ELSE last_sync_attempt END
                 WHERE id = ?5",
                params![
                    status.as_str(),
                    error_message,
                    retry_count.map(i64::from),
                    now,
                    id.as_str(),
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("mutation {id}")));
        }
        Ok(())
    }

    async fn update_payload(
        &self,
        id: &MutationId,
        payload: &Payload,
        base_version: Option<i64>,
        status: SyncStatus,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();

        let rows = self
            .conn
            .execute(
                "UPDATE pending_mutations SET
                    payload = ?, base_version = ?, sync_status = ?, operation = 'update',
                    last_modified = ?, error_message = NULL, retry_count = 0
                 WHERE id = ?",
                params![
                    to_json(payload)?,
                    base_version,
                    status.as_str(),
                    now,
                    id.as_str(),
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("mutation {id}")));
        }
        Ok(())
    }

    async fn remove(&self, id: &MutationId) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM pending_mutations WHERE id = ?",
                params![id.as_str()],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn remove_synced(&self) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM pending_mutations WHERE sync_status = 'synced'",
                (),
            )
            .await?;
        Ok(rows)
    }

    async fn requeue(&self, from: SyncStatus, max_retries: Option<u32>) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "UPDATE pending_mutations SET sync_status = 'pending_upload'
                 WHERE sync_status = ?1 AND (?2 IS NULL OR retry_count < ?2)",
                params![from.as_str(), max_retries.map(i64::from)],
            )
            .await?;
        Ok(rows)
    }

    async fn reset_failed(&self, id: Option<&MutationId>) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "UPDATE pending_mutations
                 SET sync_status = 'pending_upload', retry_count = 0, error_message = NULL
                 WHERE sync_status = 'failed' AND (?1 IS NULL OR id = ?1)",
                params![id.map(MutationId::as_str)],
            )
            .await?;
        Ok(rows)
    }

    async fn stats(&self) -> Result<SyncStats> {
        let mut rows = self
            .conn
            .query(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN sync_status IN ('offline_only', 'pending_upload') THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN sync_status = 'syncing' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN sync_status = 'conflict' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN sync_status = 'failed' THEN 1 ELSE 0 END), 0)
                 FROM pending_mutations
                 WHERE sync_status != 'synced'",
                (),
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(SyncStats::default());
        };

        Ok(SyncStats {
            total: to_u64(row.get(0)?),
            pending: to_u64(row.get(1)?),
            syncing: to_u64(row.get(2)?),
            conflicted: to_u64(row.get(3)?),
            failed: to_u64(row.get(4)?),
        })
    }
}
