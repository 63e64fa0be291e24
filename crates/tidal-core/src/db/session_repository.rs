//! Sync session repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use libsql::{params, Connection, Row};

use super::{from_json, to_json, to_u32};
use crate::error::{Error, Result};
use crate::models::{SessionId, SyncSession};

const SESSION_COLUMNS: &str = "id, started_at, completed_at, status, records_processed,
    records_total, conflicts_detected, errors_encountered, error_messages";

/// Trait for sync session storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SessionRepository {
    /// Insert a new session
    async fn create(&self, session: &SyncSession) -> Result<()>;

    /// Overwrite the progress and outcome of an existing session
    async fn update(&self, session: &SyncSession) -> Result<()>;

    /// Get a session by ID
    async fn get(&self, id: &SessionId) -> Result<Option<SyncSession>>;

    /// List sessions, newest first
    async fn list_recent(&self, limit: usize) -> Result<Vec<SyncSession>>;
}

/// libSQL implementation of `SessionRepository`
pub struct LibSqlSessionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSessionRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a session from a database row
    fn parse_session(row: &Row) -> Result<SyncSession> {
        let id: String = row.get(0)?;
        let status: String = row.get(3)?;
        let error_messages: String = row.get(8)?;

        Ok(SyncSession {
            id: id
                .parse()
                .map_err(|_| Error::InvalidInput(format!("Invalid session ID: {id}")))?,
            started_at: row.get(1)?,
            completed_at: row.get(2)?,
            status: status.parse()?,
            records_processed: to_u32(row.get(4)?),
            records_total: to_u32(row.get(5)?),
            conflicts_detected: to_u32(row.get(6)?),
            errors_encountered: to_u32(row.get(7)?),
            error_messages: from_json(&error_messages)?,
        })
    }
}

impl SessionRepository for LibSqlSessionRepository<'_> {
    async fn create(&self, session: &SyncSession) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO sync_sessions ({SESSION_COLUMNS})
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    session.id.as_str(),
                    session.started_at,
                    session.completed_at,
                    session.status.as_str(),
                    i64::from(session.records_processed),
                    i64::from(session.records_total),
                    i64::from(session.conflicts_detected),
                    i64::from(session.errors_encountered),
                    to_json(&session.error_messages)?,
                ],
            )
            .await?;
        Ok(())
    }

    async fn update(&self, session: &SyncSession) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE sync_sessions SET
                    completed_at = ?, status = ?, records_processed = ?, records_total = ?,
                    conflicts_detected = ?, errors_encountered = ?, error_messages = ?
                 WHERE id = ?",
                params![
                    session.completed_at,
                    session.status.as_str(),
                    i64::from(session.records_processed),
                    i64::from(session.records_total),
                    i64::from(session.conflicts_detected),
                    i64::from(session.errors_encountered),
                    to_json(&session.error_messages)?,
                    session.id.as_str(),
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("session {}", session.id)));
        }
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Option<SyncSession>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM sync_sessions WHERE id = ?"),
                params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_session(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<SyncSession>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sync_sessions
                     ORDER BY started_at DESC, id DESC
                     LIMIT ?"
                ),
                params![limit as i64],
            )
            .await?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await? {
            sessions.push(Self::parse_session(&row)?);
        }
        Ok(sessions)
    }
}
