//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{uuid_id, Payload};
use crate::error::Error;

uuid_id! {
    /// A unique identifier for a sync conflict
    ConflictId
}

/// How a conflict gets resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Keep local values for conflicting fields
    LocalWins,
    /// Keep remote values for conflicting fields
    RemoteWins,
    /// Type-aware per-field merge
    #[default]
    AutomaticMerge,
    /// Caller supplies the final payload
    ManualMerge,
    /// Leave the conflict open
    Defer,
}

impl ResolutionStrategy {
    /// Stable string form used in the database
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalWins => "local_wins",
            Self::RemoteWins => "remote_wins",
            Self::AutomaticMerge => "automatic_merge",
            Self::ManualMerge => "manual_merge",
            Self::Defer => "defer",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "local_wins" | "local-wins" => Ok(Self::LocalWins),
            "remote" | "remote_wins" | "remote-wins" => Ok(Self::RemoteWins),
            "merge" | "auto" | "automatic_merge" | "automatic-merge" => Ok(Self::AutomaticMerge),
            "manual" | "manual_merge" | "manual-merge" => Ok(Self::ManualMerge),
            "defer" | "skip" => Ok(Self::Defer),
            other => Err(Error::InvalidInput(format!(
                "Unknown resolution strategy: {other}"
            ))),
        }
    }
}

/// Evidence that local and remote diverged from a shared ancestor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict identifier
    pub id: ConflictId,
    /// Logical table of the record
    pub table_name: String,
    /// Record involved in the conflict
    pub record_id: String,
    /// Local payload at detection time
    pub local_data: Payload,
    /// Remote payload at detection time
    pub remote_data: Payload,
    /// Last mutually synced payload (empty when unknown)
    pub base_data: Payload,
    /// Remote version of `remote_data`
    pub remote_version: i64,
    /// Fields changed independently on both sides, sorted
    pub conflicting_fields: Vec<String>,
    /// Detection timestamp (Unix ms)
    pub detected_at: i64,
    /// Strategy used once resolved
    pub resolution_strategy: Option<ResolutionStrategy>,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: Option<i64>,
    /// Final payload once resolved
    pub resolved_data: Option<Payload>,
}

impl SyncConflict {
    /// Record a freshly detected conflict
    #[must_use]
    pub fn new(
        table_name: impl Into<String>,
        record_id: impl Into<String>,
        local_data: Payload,
        remote_data: Payload,
        base_data: Payload,
        remote_version: i64,
        conflicting_fields: Vec<String>,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            table_name: table_name.into(),
            record_id: record_id.into(),
            local_data,
            remote_data,
            base_data,
            remote_version,
            conflicting_fields,
            detected_at: chrono::Utc::now().timestamp_millis(),
            resolution_strategy: None,
            resolved_at: None,
            resolved_data: None,
        }
    }

    /// Whether a resolution has been applied
    pub const fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}
