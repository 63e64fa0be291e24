//! Remote endpoint abstraction the orchestrator pushes mutations to.

mod http;
mod memory;

pub use http::HttpRemote;
pub use memory::InMemoryRemote;

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::models::{Payload, SyncedRecord};
use crate::Result;

/// A record as the remote currently holds it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub record_id: String,
    /// Monotonic per-record version assigned by the remote
    pub version: i64,
    pub payload: Payload,
}

impl RemoteRecord {
    /// Local snapshot of this record
    #[must_use]
    pub fn into_synced(self, table_name: &str) -> SyncedRecord {
        SyncedRecord::new(table_name, self.record_id, self.payload, self.version)
    }
}

/// Acknowledgement of an accepted write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAck {
    /// Version the remote assigned to the written payload
    pub version: i64,
}

/// Server-side store of records.
///
/// Writes based on a stale version fail with [`crate::Error::VersionConflict`]
/// carrying the remote's current record. Transport failures map to
/// [`crate::Error::Transport`].
pub trait RemoteEndpoint: Send + Sync {
    /// Create a record the remote has never seen
    fn create(
        &self,
        table: &str,
        record_id: &str,
        payload: &Payload,
    ) -> impl Future<Output = Result<RemoteAck>> + Send;

    /// Replace a record, expecting the remote to still be at `base_version`
    fn update(
        &self,
        table: &str,
        record_id: &str,
        payload: &Payload,
        base_version: Option<i64>,
    ) -> impl Future<Output = Result<RemoteAck>> + Send;

    /// Delete a record; deleting an absent record succeeds
    fn delete(
        &self,
        table: &str,
        record_id: &str,
        base_version: Option<i64>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Every record of a table
    fn list(&self, table: &str) -> impl Future<Output = Result<Vec<RemoteRecord>>> + Send;
}
