//! Pending mutation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{uuid_id, Payload};
use crate::error::Error;

uuid_id! {
    /// A unique identifier for a pending mutation
    MutationId
}

/// Kind of local change queued for upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Stable string form used in the database
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("Unknown operation: {other}"))),
        }
    }
}

/// Sync state of a pending mutation
///
/// `Synced` and a `Failed` mutation past its retry ceiling are the only
/// absorbing states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Recorded while no remote backend is active
    OfflineOnly,
    /// Waiting for the next sync session
    PendingUpload,
    /// Being applied by the running session
    Syncing,
    /// Remote confirmed the write
    Synced,
    /// Remote diverged; an unresolved conflict exists for the record
    Conflict,
    /// Remote call failed
    Failed,
}

impl SyncStatus {
    /// Statuses a new session picks up.
    pub const UPLOADABLE: [Self; 2] = [Self::OfflineOnly, Self::PendingUpload];

    /// Every status except `Synced`.
    pub const UNSYNCED: [Self; 5] = [
        Self::OfflineOnly,
        Self::PendingUpload,
        Self::Syncing,
        Self::Conflict,
        Self::Failed,
    ];

    /// Stable string form used in the database
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OfflineOnly => "offline_only",
            Self::PendingUpload => "pending_upload",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline_only" => Ok(Self::OfflineOnly),
            "pending_upload" => Ok(Self::PendingUpload),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "conflict" => Ok(Self::Conflict),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("Unknown sync status: {other}"))),
        }
    }
}

/// A queued local change awaiting remote application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// Unique identifier
    pub id: MutationId,
    /// Logical table the record belongs to
    pub table_name: String,
    /// Application-level record identifier
    pub record_id: String,
    /// Latest local payload (id-only is enough for deletes)
    pub payload: Payload,
    /// Change kind
    pub operation: Operation,
    /// Current sync state
    pub sync_status: SyncStatus,
    /// First local write (Unix ms), kept across coalescing for FIFO order
    pub created_at: i64,
    /// Latest local write (Unix ms)
    pub last_modified: i64,
    /// Last time a session tried to push this mutation (Unix ms)
    pub last_sync_attempt: Option<i64>,
    /// Last failure message
    pub error_message: Option<String>,
    /// Consecutive failed attempts
    pub retry_count: u32,
    /// Remote version the local change was based on
    pub base_version: Option<i64>,
    /// Free-form metadata
    pub metadata: Payload,
}

impl PendingMutation {
    /// Create a new mutation for a record
    #[must_use]
    pub fn new(
        table_name: impl Into<String>,
        record_id: impl Into<String>,
        payload: Payload,
        operation: Operation,
        sync_status: SyncStatus,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: MutationId::new(),
            table_name: table_name.into(),
            record_id: record_id.into(),
            payload,
            operation,
            sync_status,
            created_at: now,
            last_modified: now,
            last_sync_attempt: None,
            error_message: None,
            retry_count: 0,
            base_version: None,
            metadata: Payload::new(),
        }
    }

    /// Set the remote version this change is based on
    #[must_use]
    pub const fn with_base_version(mut self, base_version: Option<i64>) -> Self {
        self.base_version = base_version;
        self
    }

    /// Attach metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: Payload) -> Self {
        self.metadata = metadata;
        self
    }

    /// Fold a newer local write for the same record into this mutation.
    ///
    /// Returns `None` when the two cancel out (a record created and deleted
    /// before it ever reached the remote). A create that is already being
    /// pushed cannot cancel; it turns into a delete instead.
    #[must_use]
    pub fn coalesce(self, incoming: Self) -> Option<Self> {
        if self.sync_status == SyncStatus::Synced {
            return Some(incoming);
        }

        let operation = match (self.operation, incoming.operation) {
            (Operation::Create, Operation::Delete)
                if self.base_version.is_none() && self.sync_status != SyncStatus::Syncing =>
            {
                return None;
            }
            (Operation::Create, Operation::Create | Operation::Update) => Operation::Create,
            (_, Operation::Delete) => Operation::Delete,
            (_, Operation::Create | Operation::Update) => Operation::Update,
        };

        let mut metadata = self.metadata;
        metadata.extend(incoming.metadata);

        Some(Self {
            id: self.id,
            table_name: self.table_name,
            record_id: self.record_id,
            payload: incoming.payload,
            operation,
            sync_status: incoming.sync_status,
            created_at: self.created_at,
            last_modified: incoming.last_modified.max(self.last_modified),
            last_sync_attempt: self.last_sync_attempt,
            error_message: None,
            retry_count: 0,
            base_version: self.base_version,
            metadata,
        })
    }

    /// Whether the retry ceiling has been reached
    pub const fn retries_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }
}
