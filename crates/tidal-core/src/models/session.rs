//! Sync session model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::uuid_id;
use crate::error::Error;

uuid_id! {
    /// A unique identifier for a sync session
    SessionId
}

/// Outcome of a sync session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Syncing,
    Synced,
    Failed,
}

impl SessionStatus {
    /// Stable string form used in the database
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!(
                "Unknown session status: {other}"
            ))),
        }
    }
}

/// One end-to-end synchronization run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: SessionId,
    /// Start timestamp (Unix ms)
    pub started_at: i64,
    /// Completion timestamp (Unix ms)
    pub completed_at: Option<i64>,
    pub status: SessionStatus,
    pub records_processed: u32,
    pub records_total: u32,
    pub conflicts_detected: u32,
    pub errors_encountered: u32,
    pub error_messages: Vec<String>,
}

impl SyncSession {
    /// Start a new session
    #[must_use]
    pub fn start() -> Self {
        Self {
            id: SessionId::new(),
            started_at: chrono::Utc::now().timestamp_millis(),
            completed_at: None,
            status: SessionStatus::Syncing,
            records_processed: 0,
            records_total: 0,
            conflicts_detected: 0,
            errors_encountered: 0,
            error_messages: Vec::new(),
        }
    }

    /// Fraction of records processed, 1.0 for an empty session
    pub fn progress(&self) -> f64 {
        if self.records_total == 0 {
            return 1.0;
        }
        f64::from(self.records_processed) / f64::from(self.records_total)
    }

    /// Record a per-mutation failure
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors_encountered += 1;
        self.error_messages.push(message.into());
    }

    /// Finalize as `Synced` when no errors were recorded, `Failed` otherwise
    pub fn finish(&mut self) {
        self.completed_at = Some(chrono::Utc::now().timestamp_millis());
        self.status = if self.errors_encountered == 0 {
            SessionStatus::Synced
        } else {
            SessionStatus::Failed
        };
    }

    /// Whether the session is still running
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Syncing
    }
}

/// Aggregate mutation counts for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub total: u64,
    pub pending: u64,
    pub syncing: u64,
    pub conflicted: u64,
    pub failed: u64,
}
