//! In-process remote with per-record versions and failure injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{RemoteAck, RemoteEndpoint, RemoteRecord};
use crate::models::Payload;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, BTreeMap<String, RemoteRecord>>,
    failures_left: u32,
    offline: bool,
    calls: u64,
}

impl MemoryState {
    fn enter(&mut self) -> Result<()> {
        self.calls += 1;
        if self.offline {
            return Err(Error::Transport("remote unreachable".to_string()));
        }
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(Error::Transport("injected failure".to_string()));
        }
        Ok(())
    }

    fn table(&mut self, table: &str) -> &mut BTreeMap<String, RemoteRecord> {
        self.tables.entry(table.to_string()).or_default()
    }
}

/// Versioned remote kept in memory.
///
/// Clones share state, so a test can hold one handle while the engine owns
/// another and play the part of a second replica.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRemote {
    state: Arc<Mutex<MemoryState>>,
    latency: Option<Duration>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Write a record as another replica would, bumping its version.
    pub fn put(&self, table: &str, record_id: &str, payload: Payload) -> i64 {
        let mut state = self.lock();
        let records = state.table(table);
        let version = records.get(record_id).map_or(1, |record| record.version + 1);
        records.insert(
            record_id.to_string(),
            RemoteRecord {
                record_id: record_id.to_string(),
                version,
                payload,
            },
        );
        version
    }

    /// Remove a record as another replica would.
    pub fn remove(&self, table: &str, record_id: &str) -> bool {
        self.lock().table(table).remove(record_id).is_some()
    }

    /// Current remote copy of a record
    pub fn get(&self, table: &str, record_id: &str) -> Option<RemoteRecord> {
        self.lock().table(table).get(record_id).cloned()
    }

    /// Fail the next `count` calls with a transport error
    pub fn fail_next(&self, count: u32) {
        self.lock().failures_left = count;
    }

    /// Fail every call until switched back
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Number of calls received so far
    pub fn call_count(&self) -> u64 {
        self.lock().calls
    }

    fn conflict(table: &str, current: &RemoteRecord) -> Error {
        Error::VersionConflict {
            table: table.to_string(),
            record_id: current.record_id.clone(),
            remote: Box::new(current.clone()),
        }
    }
}

impl RemoteEndpoint for InMemoryRemote {
    async fn create(&self, table: &str, record_id: &str, payload: &Payload) -> Result<RemoteAck> {
        self.pause().await;
        let mut state = self.lock();
        state.enter()?;

        let records = state.table(table);
        if let Some(current) = records.get(record_id) {
            return Err(Self::conflict(table, current));
        }
        records.insert(
            record_id.to_string(),
            RemoteRecord {
                record_id: record_id.to_string(),
                version: 1,
                payload: payload.clone(),
            },
        );
        Ok(RemoteAck { version: 1 })
    }

    async fn update(
        &self,
        table: &str,
        record_id: &str,
        payload: &Payload,
        base_version: Option<i64>,
    ) -> Result<RemoteAck> {
        self.pause().await;
        let mut state = self.lock();
        state.enter()?;

        let records = state.table(table);
        let Some(current) = records.get_mut(record_id) else {
            return Err(Error::NotFound(format!("remote record {table}/{record_id}")));
        };
        if base_version != Some(current.version) {
            return Err(Self::conflict(table, current));
        }

        current.version += 1;
        current.payload = payload.clone();
        Ok(RemoteAck {
            version: current.version,
        })
    }

    /// Without a `base_version` the delete is unconditional.
    async fn delete(&self, table: &str, record_id: &str, base_version: Option<i64>) -> Result<()> {
        self.pause().await;
        let mut state = self.lock();
        state.enter()?;

        let records = state.table(table);
        if let (Some(current), Some(expected)) = (records.get(record_id), base_version) {
            if current.version != expected {
                return Err(Self::conflict(table, current));
            }
        }
        records.remove(record_id);
        Ok(())
    }

    async fn list(&self, table: &str) -> Result<Vec<RemoteRecord>> {
        self.pause().await;
        let mut state = self.lock();
        state.enter()?;
        Ok(state.table(table).values().cloned().collect())
    }
}
