//! Application-facing sync facade.
//!
//! `SyncEngine` records local writes durably and hands them to whichever
//! backend it was built with: a local-only backend that keeps everything
//! queued, or a remote backend that syncs through a `SyncOrchestrator`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::conflict::{self, Resolution};
use crate::models::{
    ConflictId, Operation, Payload, PendingMutation, ResolutionStrategy, SyncConflict,
    SyncSession, SyncStatus,
};
use crate::remote::{HttpRemote, RemoteEndpoint};
use crate::store::Store;
use crate::sync::{SyncOrchestrator, SyncScheduler};
use crate::util::require_identifier;
use crate::{Error, Result};

/// Keeps every write queued as `OfflineOnly`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalBackend;

/// Where queued writes go
pub enum SyncBackend<R> {
    Local(LocalBackend),
    Remote(Arc<SyncOrchestrator<R>>),
}

impl<R: RemoteEndpoint> SyncBackend<R> {
    /// Remote backend over `remote`, sharing `store` with the engine.
    pub fn remote(store: Store, remote: R, config: SyncConfig) -> Self {
        Self::Remote(Arc::new(SyncOrchestrator::new(store, remote, config)))
    }

    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Local(_) => BackendKind::Local,
            Self::Remote(_) => BackendKind::Remote,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Remote,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Remote => "remote",
        })
    }
}

/// Snapshot of queue and session state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusReport {
    pub is_syncing: bool,
    pub pending_count: u64,
    pub conflict_count: u64,
    pub failed_count: u64,
    pub last_session: Option<SyncSession>,
    pub backend: BackendKind,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Offline-first write path plus sync controls.
pub struct SyncEngine<R: RemoteEndpoint + 'static> {
    store: Store,
    config: SyncConfig,
    backend: SyncBackend<R>,
    scheduler: Mutex<Option<SyncScheduler<SyncOrchestrator<R>>>>,
    auto_sync: AtomicBool,
}

impl SyncEngine<HttpRemote> {
    /// Build an engine from configuration: remote when `remote_url` is set,
    /// local-only otherwise.
    pub async fn from_config(store: Store, config: SyncConfig) -> Result<Self> {
        let backend = match config.remote_url.as_deref() {
            Some(url) => SyncBackend::remote(
                store.clone(),
                HttpRemote::new(url, config.remote_token.clone(), config.request_timeout())?,
                config.clone(),
            ),
            None => SyncBackend::Local(LocalBackend),
        };
        Self::new(store, backend, config).await
    }
}

impl<R: RemoteEndpoint + 'static> SyncEngine<R> {
    /// Build an engine. With a remote backend, offline-only writes are queued
    /// for upload and, when auto-sync is on, the scheduler starts.
    ///
    /// Must be called within a Tokio runtime.
    pub async fn new(store: Store, backend: SyncBackend<R>, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let engine = Self {
            store,
            auto_sync: AtomicBool::new(config.auto_sync),
            config,
            backend: SyncBackend::Local(LocalBackend),
            scheduler: Mutex::new(None),
        };
        engine.install(backend).await
    }

    async fn install(mut self, backend: SyncBackend<R>) -> Result<Self> {
        if let SyncBackend::Remote(orchestrator) = &backend {
            let promoted = self.store.promote_offline().await?;
            if promoted > 0 {
                tracing::info!("Queued {promoted} offline change(s) for upload");
            }
            let scheduler = SyncScheduler::new(
                Arc::clone(orchestrator),
                self.config.sync_interval(),
                self.config.debounce_delay(),
            );
            if self.is_auto_sync() {
                scheduler.start();
            }
            *lock(&self.scheduler) = Some(scheduler);
        }
        tracing::info!("Sync engine using the {} backend", backend.kind());
        self.backend = backend;
        Ok(self)
    }

    pub const fn store(&self) -> &Store {
        &self.store
    }

    pub const fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn is_auto_sync(&self) -> bool {
        self.auto_sync.load(Ordering::SeqCst)
    }

    const fn orchestrator(&self) -> Option<&Arc<SyncOrchestrator<R>>> {
        match &self.backend {
            SyncBackend::Local(_) => None,
            SyncBackend::Remote(orchestrator) => Some(orchestrator),
        }
    }

    /// Record a local write. Returns once it is durable; the returned
    /// mutation is `None` when the write cancelled an unsent create.
    pub async fn save_for_sync(
        &self,
        table: &str,
        record_id: &str,
        payload: Payload,
        operation: Operation,
    ) -> Result<Option<PendingMutation>> {
        let table = require_identifier(table, "table")?;
        let record_id = require_identifier(record_id, "record id")?;
        let status = match self.backend {
            SyncBackend::Local(_) => SyncStatus::OfflineOnly,
            SyncBackend::Remote(_) => SyncStatus::PendingUpload,
        };

        let queued = self
            .store
            .enqueue(PendingMutation::new(
                table.as_str(),
                record_id.as_str(),
                payload,
                operation,
                status,
            ))
            .await?;
        tracing::debug!("Queued {operation} for {table}/{record_id}");

        if self.is_auto_sync() {
            if let Some(scheduler) = lock(&self.scheduler).as_ref() {
                scheduler.schedule_debounced(&table, &record_id);
            }
        }
        Ok(queued)
    }

    pub async fn update_for_sync(
        &self,
        table: &str,
        record_id: &str,
        payload: Payload,
    ) -> Result<Option<PendingMutation>> {
        self.save_for_sync(table, record_id, payload, Operation::Update)
            .await
    }

    pub async fn delete_for_sync(
        &self,
        table: &str,
        record_id: &str,
    ) -> Result<Option<PendingMutation>> {
        let mut payload = Payload::new();
        payload.insert("id".to_string(), record_id.trim().into());
        self.save_for_sync(table, record_id, payload, Operation::Delete)
            .await
    }

    /// Run a session now. The local backend records an empty session.
    pub async fn sync_now(&self) -> Result<SyncSession> {
        match &self.backend {
            SyncBackend::Local(_) => {
                let mut session = SyncSession::start();
                session.finish();
                self.store.create_session(&session).await?;
                tracing::debug!("Local backend: nothing to sync");
                Ok(session)
            }
            SyncBackend::Remote(orchestrator) => orchestrator.sync_now().await,
        }
    }

    pub async fn get_sync_status(&self) -> Result<SyncStatusReport> {
        let stats = self.store.get_stats().await?;
        let conflicts = self.store.list_unresolved_conflicts(None).await?;
        let last_session = self.store.list_recent_sessions(1).await?.into_iter().next();

        Ok(SyncStatusReport {
            is_syncing: self
                .orchestrator()
                .is_some_and(|orchestrator| orchestrator.is_syncing()),
            pending_count: stats.pending,
            conflict_count: conflicts.len() as u64,
            failed_count: stats.failed,
            last_session,
            backend: self.backend.kind(),
        })
    }

    /// Most recent sessions first
    pub async fn get_sync_history(&self, limit: usize) -> Result<Vec<SyncSession>> {
        self.store.list_recent_sessions(limit).await
    }

    pub async fn get_unresolved_conflicts(&self) -> Result<Vec<SyncConflict>> {
        self.store.list_unresolved_conflicts(None).await
    }

    pub async fn get_conflicts_for_table(&self, table: &str) -> Result<Vec<SyncConflict>> {
        self.store.list_unresolved_conflicts(Some(table)).await
    }

    /// Resolve one conflict. `Defer` changes nothing.
    pub async fn resolve_conflict(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        manual: Option<&Payload>,
    ) -> Result<Resolution> {
        if let Some(orchestrator) = self.orchestrator() {
            return orchestrator.resolve_conflict(id, strategy, manual).await;
        }

        let conflict = self
            .store
            .get_conflict(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {id}")))?;
        if conflict.is_resolved() {
            return Err(Error::InvalidInput(format!(
                "conflict {id} is already resolved"
            )));
        }
        let resolution = conflict::resolve(&conflict, strategy, manual)?;
        if let Resolution::Resolved(payload) = &resolution {
            self.store
                .apply_resolution(&conflict, strategy, payload)
                .await?;
        }
        Ok(resolution)
    }

    /// Turn periodic and debounced syncing on or off. A running session is
    /// never interrupted.
    pub fn set_auto_sync(&self, enabled: bool) {
        self.auto_sync.store(enabled, Ordering::SeqCst);
        if let Some(scheduler) = lock(&self.scheduler).as_ref() {
            if enabled {
                scheduler.start();
            } else {
                scheduler.stop();
            }
        }
        tracing::info!("Auto-sync {}", if enabled { "enabled" } else { "disabled" });
    }

    pub async fn refresh_from_server(&self, tables: &[String]) -> Result<u64> {
        match self.orchestrator() {
            Some(orchestrator) => orchestrator.refresh_from_server(tables).await,
            None => Err(Error::InvalidInput(
                "refresh requires a remote backend".to_string(),
            )),
        }
    }

    /// Local read-through: queued payload, else the synced snapshot.
    pub async fn get_record(&self, table: &str, record_id: &str) -> Result<Option<Payload>> {
        self.store.read_record(table, record_id).await
    }

    pub async fn retry_failed(&self) -> Result<u64> {
        match self.orchestrator() {
            Some(orchestrator) => orchestrator.retry_failed().await,
            None => self.store.reset_failed(None).await,
        }
    }

    /// Swap the backend. Queued mutations stay in the store.
    ///
    /// Stops the scheduler and closes the old backend, then waits for a
    /// running session to finish. Triggers already fired against the old
    /// backend find it closed and do nothing.
    pub async fn switch_backend(self, backend: SyncBackend<R>) -> Result<Self> {
        let mut engine = self;
        if let Some(scheduler) = lock(&engine.scheduler).take() {
            scheduler.stop();
        }
        if let Some(orchestrator) = engine.orchestrator() {
            orchestrator.close();
            orchestrator.wait_idle().await;
        }
        engine.backend = SyncBackend::Local(LocalBackend);
        engine.install(backend).await
    }
}

impl<R: RemoteEndpoint + 'static> Drop for SyncEngine<R> {
    fn drop(&mut self) {
        if let Some(scheduler) = lock(&self.scheduler).take() {
            scheduler.stop();
        }
        if let Some(orchestrator) = self.orchestrator() {
            orchestrator.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionStatus;
    use crate::remote::InMemoryRemote;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn quiet_config() -> SyncConfig {
        SyncConfig {
            auto_sync: false,
            ..SyncConfig::default()
        }
    }

    async fn local_engine() -> SyncEngine<InMemoryRemote> {
        let store = Store::open_in_memory().await.unwrap();
        SyncEngine::new(store, SyncBackend::Local(LocalBackend), quiet_config())
            .await
            .unwrap()
    }

    async fn remote_engine(config: SyncConfig) -> (SyncEngine<InMemoryRemote>, InMemoryRemote) {
        let store = Store::open_in_memory().await.unwrap();
        let remote = InMemoryRemote::new();
        let backend = SyncBackend::remote(store.clone(), remote.clone(), config.clone());
        (SyncEngine::new(store, backend, config).await.unwrap(), remote)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_blank_identifiers_are_rejected() {
        let engine = local_engine().await;
        let result = engine
            .save_for_sync(" ", "n1", Payload::new(), Operation::Create)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(matches!(
            engine.delete_for_sync("notes", "").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_backend_keeps_writes_offline() {
        let engine = local_engine().await;
        let queued = engine
            .save_for_sync("notes", "n1", payload(json!({"a": 1})), Operation::Create)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queued.sync_status, SyncStatus::OfflineOnly);

        let session = engine.sync_now().await.unwrap();
        assert_eq!(session.status, SessionStatus::Synced);
        assert_eq!(session.records_total, 0);

        let status = engine.get_sync_status().await.unwrap();
        assert_eq!(status.backend, BackendKind::Local);
        assert_eq!(status.pending_count, 1);
        assert_eq!(status.last_session.map(|last| last.id), Some(session.id));

        assert!(matches!(
            engine.refresh_from_server(&["notes".to_string()]).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_record_reads_through_queue() {
        let engine = local_engine().await;
        engine
            .save_for_sync("notes", "n1", payload(json!({"a": 1})), Operation::Create)
            .await
            .unwrap();
        engine
            .update_for_sync("notes", "n1", payload(json!({"a": 2})))
            .await
            .unwrap();
        assert_eq!(
            engine.get_record("notes", "n1").await.unwrap(),
            Some(payload(json!({"a": 2})))
        );

        // Deleting an unsent create cancels it outright
        assert!(engine.delete_for_sync("notes", "n1").await.unwrap().is_none());
        assert_eq!(engine.get_record("notes", "n1").await.unwrap(), None);
        assert_eq!(engine.get_sync_status().await.unwrap().pending_count, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_switch_backend_keeps_pending_mutations() {
        let engine = local_engine().await;
        engine
            .save_for_sync("notes", "n1", payload(json!({"a": 1})), Operation::Create)
            .await
            .unwrap();

        let remote = InMemoryRemote::new();
        let backend = SyncBackend::remote(engine.store().clone(), remote.clone(), quiet_config());
        let engine = engine.switch_backend(backend).await.unwrap();
        assert_eq!(engine.backend_kind(), BackendKind::Remote);

        let queued = engine
            .store()
            .get_mutation_for_record("notes", "n1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queued.sync_status, SyncStatus::PendingUpload);

        let session = engine.sync_now().await.unwrap();
        assert_eq!(session.records_processed, 1);
        assert_eq!(
            remote.get("notes", "n1").unwrap().payload,
            payload(json!({"a": 1}))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_auto_sync_pushes_after_debounce() {
        let config = SyncConfig {
            debounce_delay_ms: 50,
            ..SyncConfig::default()
        };
        let (engine, remote) = remote_engine(config).await;

        engine
            .save_for_sync("notes", "n1", payload(json!({"a": 1})), Operation::Create)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(remote.get("notes", "n1").is_some());

        engine.set_auto_sync(false);
        engine
            .update_for_sync("notes", "n1", payload(json!({"a": 2})))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(remote.get("notes", "n1").unwrap().version, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_conflicts_are_listed_and_resolved() {
        let config = SyncConfig {
            manual_resolution: true,
            ..quiet_config()
        };
        let (engine, remote) = remote_engine(config).await;
        engine
            .save_for_sync("notes", "n1", payload(json!({"title": "a"})), Operation::Create)
            .await
            .unwrap();
        engine.sync_now().await.unwrap();

        remote.put("notes", "n1", payload(json!({"title": "remote"})));
        engine
            .update_for_sync("notes", "n1", payload(json!({"title": "local"})))
            .await
            .unwrap();
        engine.sync_now().await.unwrap();

        let conflicts = engine.get_conflicts_for_table("notes").await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert!(engine.get_conflicts_for_table("tasks").await.unwrap().is_empty());
        assert_eq!(engine.get_sync_status().await.unwrap().conflict_count, 1);

        let resolution = engine
            .resolve_conflict(&conflicts[0].id, ResolutionStrategy::RemoteWins, None)
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Resolved(payload(json!({"title": "remote"})))
        );
        assert!(engine.get_unresolved_conflicts().await.unwrap().is_empty());
        assert_eq!(
            engine.get_record("notes", "n1").await.unwrap(),
            Some(payload(json!({"title": "remote"})))
        );
        assert!(matches!(
            engine
                .resolve_conflict(&conflicts[0].id, ResolutionStrategy::RemoteWins, None)
                .await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(engine.get_sync_history(10).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_switch_backend_drains_the_old_remote() {
        let config = SyncConfig {
            debounce_delay_ms: 10,
            ..SyncConfig::default()
        };
        let store = Store::open_in_memory().await.unwrap();
        let old_remote = InMemoryRemote::new().with_latency(Duration::from_millis(150));
        let backend = SyncBackend::remote(store.clone(), old_remote.clone(), config.clone());
        let engine = SyncEngine::new(store, backend, config.clone()).await.unwrap();

        engine
            .save_for_sync("notes", "n1", payload(json!({"a": 1})), Operation::Create)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        // n1 is mid-push; this debounce fires while that session still runs
        engine
            .save_for_sync("notes", "n2", payload(json!({"b": 1})), Operation::Create)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let new_remote = InMemoryRemote::new();
        let backend =
            SyncBackend::remote(engine.store().clone(), new_remote.clone(), config.clone());
        let engine = engine.switch_backend(backend).await.unwrap();
        let calls_at_switch = old_remote.call_count();
        assert!(old_remote.get("notes", "n1").is_some());

        let session = engine.sync_now().await.unwrap();
        assert_eq!(session.status, SessionStatus::Synced);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(old_remote.call_count(), calls_at_switch);
        assert!(old_remote.get("notes", "n2").is_none());
        assert!(new_remote.get("notes", "n2").is_some());
        assert!(engine
            .store()
            .list_pending_mutations(None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_zero_sync_interval_is_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        let config = SyncConfig {
            sync_interval_secs: 0,
            ..SyncConfig::default()
        };
        let backend = SyncBackend::remote(store.clone(), InMemoryRemote::new(), config.clone());
        let result = SyncEngine::new(store, backend, config).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
