//! Sync conflict repository implementation

use libsql::{params, Connection, Row};

use super::{from_json, to_json};
use crate::error::{Error, Result};
use crate::models::{ConflictId, Payload, ResolutionStrategy, SyncConflict};

const CONFLICT_COLUMNS: &str = "id, table_name, record_id, local_data, remote_data, base_data,
    remote_version, conflicting_fields, detected_at, resolution_strategy, resolved_at,
    resolved_data";

/// Trait for sync conflict storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ConflictRepository {
    /// Persist a conflict
    async fn save(&self, conflict: &SyncConflict) -> Result<()>;

    /// Get a conflict by ID
    async fn get(&self, id: &ConflictId) -> Result<Option<SyncConflict>>;

    /// List unresolved conflicts, oldest first, optionally for one table
    async fn list_unresolved(&self, table_name: Option<&str>) -> Result<Vec<SyncConflict>>;

    /// Record the applied resolution
    async fn mark_resolved(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        resolved_data: &Payload,
    ) -> Result<()>;

    /// Drop open conflicts for a record; returns how many were removed
    async fn remove_unresolved_for_record(&self, table_name: &str, record_id: &str)
        -> Result<u64>;
}

/// libSQL implementation of `ConflictRepository`
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a conflict from a database row
    fn parse_conflict(row: &Row) -> Result<SyncConflict> {
        let id: String = row.get(0)?;
        let local_data: String = row.get(3)?;
        let remote_data: String = row.get(4)?;
        let base_data: String = row.get(5)?;
        let conflicting_fields: String = row.get(7)?;
        let strategy: Option<String> = row.get(9)?;
        let resolved_data: Option<String> = row.get(11)?;

        Ok(SyncConflict {
            id: id
                .parse()
                .map_err(|_| Error::InvalidInput(format!("Invalid conflict ID: {id}")))?,
            table_name: row.get(1)?,
            record_id: row.get(2)?,
            local_data: from_json(&local_data)?,
            remote_data: from_json(&remote_data)?,
            base_data: from_json(&base_data)?,
            remote_version: row.get(6)?,
            conflicting_fields: from_json(&conflicting_fields)?,
            detected_at: row.get(8)?,
            resolution_strategy: strategy
                .as_deref()
                .map(str::parse::<ResolutionStrategy>)
                .transpose()?,
            resolved_at: row.get(10)?,
            resolved_data: resolved_data
                .as_deref()
                .map(from_json::<Payload>)
                .transpose()?,
        })
    }
}

impl ConflictRepository for LibSqlConflictRepository<'_> {
    async fn save(&self, conflict: &SyncConflict) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO sync_conflicts ({CONFLICT_COLUMNS})
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    conflict.id.as_str(),
                    conflict.table_name.as_str(),
                    conflict.record_id.as_str(),
                    to_json(&conflict.local_data)?,
                    to_json(&conflict.remote_data)?,
                    to_json(&conflict.base_data)?,
                    conflict.remote_version,
                    to_json(&conflict.conflicting_fields)?,
                    conflict.detected_at,
                    conflict.resolution_strategy.map(ResolutionStrategy::as_str),
                    conflict.resolved_at,
                    conflict.resolved_data.as_ref().map(to_json).transpose()?,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &ConflictId) -> Result<Option<SyncConflict>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE id = ?"),
                params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_conflict(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_unresolved(&self, table_name: Option<&str>) -> Result<Vec<SyncConflict>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
                     WHERE resolved_at IS NULL AND (?1 IS NULL OR table_name = ?1)
                     ORDER BY detected_at ASC, id ASC"
                ),
                params![table_name],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }

    async fn mark_resolved(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        resolved_data: &Payload,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();

        let rows = self
            .conn
            .execute(
                "UPDATE sync_conflicts
                 SET resolution_strategy = ?, resolved_at = ?, resolved_data = ?
                 WHERE id = ? AND resolved_at IS NULL",
                params![
                    strategy.as_str(),
                    now,
                    to_json(resolved_data)?,
                    id.as_str(),
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("unresolved conflict {id}")));
        }
        Ok(())
    }

    async fn remove_unresolved_for_record(
        &self,
        table_name: &str,
        record_id: &str,
    ) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM sync_conflicts
                 WHERE table_name = ? AND record_id = ? AND resolved_at IS NULL",
                params![table_name, record_id],
            )
            .await?;
        Ok(rows)
    }
}
