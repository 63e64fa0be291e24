//! Synced record snapshot model

use serde::{Deserialize, Serialize};

use super::Payload;

/// Last payload both sides agreed on for a record.
///
/// Serves as the base snapshot of the three-way diff and as the local copy of
/// synced data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedRecord {
    pub table_name: String,
    pub record_id: String,
    pub payload: Payload,
    /// Remote version of `payload`
    pub version: i64,
    /// When the snapshot was recorded (Unix ms)
    pub synced_at: i64,
}

impl SyncedRecord {
    /// Snapshot a payload confirmed by the remote at `version`
    #[must_use]
    pub fn new(
        table_name: impl Into<String>,
        record_id: impl Into<String>,
        payload: Payload,
        version: i64,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            record_id: record_id.into(),
            payload,
            version,
            synced_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
