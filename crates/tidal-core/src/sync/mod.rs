//! Sync orchestration: pushes queued mutations to the remote, routes version
//! conflicts through the detector and keeps a session history.

mod scheduler;

pub use scheduler::{SyncScheduler, SyncTrigger};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::config::SyncConfig;
use crate::conflict::{self, Resolution};
use crate::models::{
    ConflictId, Operation, Payload, PendingMutation, ResolutionStrategy, SyncConflict,
    SyncSession, SyncStatus,
};
use crate::remote::{RemoteEndpoint, RemoteRecord};
use crate::store::Store;
use crate::{Error, Result};

/// Resolutions kept in the in-memory audit log.
pub const MAX_AUDIT_ENTRIES: usize = 100;

/// One applied conflict resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub conflict_id: ConflictId,
    pub table_name: String,
    pub record_id: String,
    pub strategy: ResolutionStrategy,
    /// Unix ms
    pub resolved_at: i64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the active-session slot when the session ends, however it ends.
struct SessionGuard<'a> {
    slot: &'a Mutex<Option<SyncSession>>,
    finished: &'a Notify,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = None;
        self.finished.notify_waiters();
    }
}

/// Drives sync sessions against one remote.
pub struct SyncOrchestrator<R> {
    store: Store,
    remote: R,
    config: SyncConfig,
    active: Mutex<Option<SyncSession>>,
    closed: AtomicBool,
    finished: Notify,
    audit: Mutex<VecDeque<ResolutionRecord>>,
}

impl<R: RemoteEndpoint> SyncOrchestrator<R> {
    pub fn new(store: Store, remote: R, config: SyncConfig) -> Self {
        Self {
            store,
            remote,
            config,
            active: Mutex::new(None),
            closed: AtomicBool::new(false),
            finished: Notify::new(),
            audit: Mutex::new(VecDeque::new()),
        }
    }

    pub const fn store(&self) -> &Store {
        &self.store
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether a session is running
    pub fn is_syncing(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Snapshot of the running session, if any
    pub fn current_session(&self) -> Option<SyncSession> {
        lock(&self.active).clone()
    }

    /// Wait until no session is running.
    pub async fn wait_idle(&self) {
        loop {
            let finished = self.finished.notified();
            if !self.is_syncing() {
                return;
            }
            finished.await;
        }
    }

    /// Stop admitting sessions. A session already running is left to finish,
    /// so `close` followed by `wait_idle` drains the orchestrator.
    pub fn close(&self) {
        let _slot = lock(&self.active);
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Applied resolutions, oldest first
    pub fn audit_log(&self) -> Vec<ResolutionRecord> {
        lock(&self.audit).iter().cloned().collect()
    }

    /// Claim the session slot, or hand back the session already holding it.
    fn begin(
        &self,
        session: &SyncSession,
    ) -> Result<std::result::Result<SessionGuard<'_>, SyncSession>> {
        let mut slot = lock(&self.active);
        if let Some(in_flight) = slot.as_ref() {
            return Ok(Err(in_flight.clone()));
        }
        if self.is_closed() {
            return Err(Error::InvalidInput(
                "sync backend has been shut down".to_string(),
            ));
        }
        *slot = Some(session.clone());
        Ok(Ok(SessionGuard {
            slot: &self.active,
            finished: &self.finished,
        }))
    }

    fn publish(&self, session: &SyncSession) {
        let mut slot = lock(&self.active);
        if slot.as_ref().is_some_and(|active| active.id == session.id) {
            *slot = Some(session.clone());
        }
    }

    /// Run one sync session.
    ///
    /// If a session is already running, returns a snapshot of it instead of
    /// starting another. Per-mutation remote failures are recorded on the
    /// session; storage failures abort the session and propagate. Fails with
    /// `InvalidInput` once the orchestrator is closed.
    pub async fn sync_now(&self) -> Result<SyncSession> {
        let mut session = SyncSession::start();
        let _guard = match self.begin(&session)? {
            Ok(guard) => guard,
            Err(in_flight) => {
                tracing::debug!("Sync session {} already running", in_flight.id);
                return Ok(in_flight);
            }
        };

        match self.run_session(&mut session).await {
            Ok(()) => Ok(session),
            Err(error) => {
                tracing::warn!("Sync session {} aborted: {error}", session.id);
                session.record_error(format!("session aborted: {error}"));
                session.finish();
                if let Err(persist_error) = self.store.update_session(&session).await {
                    tracing::warn!("Failed to record aborted session: {persist_error}");
                }
                Err(error)
            }
        }
    }

    async fn run_session(&self, session: &mut SyncSession) -> Result<()> {
        let interrupted = self.store.requeue_interrupted().await?;
        if interrupted > 0 {
            tracing::warn!("Re-queued {interrupted} mutation(s) from an interrupted session");
        }
        let retried = self
            .store
            .requeue_failed(self.config.max_sync_retries)
            .await?;
        if retried > 0 {
            tracing::debug!("Re-queued {retried} failed mutation(s) for retry");
        }

        self.store.create_session(session).await?;
        let batch = self
            .store
            .list_pending_mutations(Some(&SyncStatus::UPLOADABLE))
            .await?;
        session.records_total = u32::try_from(batch.len()).unwrap_or(u32::MAX);
        self.store.update_session(session).await?;
        self.publish(session);
        tracing::info!(
            "Sync session {} started with {} mutation(s)",
            session.id,
            batch.len()
        );

        for mutation in batch {
            match self
                .store
                .update_mutation_status(&mutation.id, SyncStatus::Syncing, None, None)
                .await
            {
                Ok(()) => self.push(session, &mutation).await?,
                // Cancelled by a local write since the batch was listed
                Err(Error::NotFound(_)) => {}
                Err(error) => return Err(error),
            }

            session.records_processed += 1;
            self.store.update_session(session).await?;
            self.publish(session);
        }

        if !self.config.manual_resolution {
            self.resolve_open_conflicts().await?;
        }

        self.store.remove_synced_mutations().await?;
        session.finish();
        self.store.update_session(session).await?;
        tracing::info!(
            "Sync session {} finished as {}: {}/{} processed, {} conflict(s), {} error(s)",
            session.id,
            session.status,
            session.records_processed,
            session.records_total,
            session.conflicts_detected,
            session.errors_encountered
        );
        Ok(())
    }

    /// Push one mutation. Only storage errors are returned.
    async fn push(&self, session: &mut SyncSession, mutation: &PendingMutation) -> Result<()> {
        let table = mutation.table_name.as_str();
        let record_id = mutation.record_id.as_str();

        let outcome = match mutation.operation {
            Operation::Create => self
                .remote
                .create(table, record_id, &mutation.payload)
                .await
                .map(Some),
            Operation::Update => self
                .remote
                .update(table, record_id, &mutation.payload, mutation.base_version)
                .await
                .map(Some),
            Operation::Delete => self
                .remote
                .delete(table, record_id, mutation.base_version)
                .await
                .map(|()| None),
        };

        match outcome {
            Ok(Some(ack)) => {
                self.store
                    .confirm_write(mutation, &mutation.payload, ack.version)
                    .await?;
                tracing::debug!("Pushed {table}/{record_id} at version {}", ack.version);
                Ok(())
            }
            Ok(None) => {
                self.store.confirm_delete(mutation).await?;
                tracing::debug!("Deleted {table}/{record_id} remotely");
                Ok(())
            }
            Err(Error::VersionConflict { remote, .. }) => {
                self.handle_version_conflict(session, mutation, *remote)
                    .await
            }
            Err(error) if error.is_storage() => Err(error),
            Err(error) => self.record_failure(session, mutation, &error).await,
        }
    }

    async fn record_failure(
        &self,
        session: &mut SyncSession,
        mutation: &PendingMutation,
        error: &Error,
    ) -> Result<()> {
        let retry_count = mutation.retry_count + 1;
        let message = error.to_string();
        let recorded = self
            .store
            .record_failure(mutation, &message, retry_count)
            .await?;

        session.record_error(format!(
            "{}/{}: {message}",
            mutation.table_name, mutation.record_id
        ));
        if recorded && retry_count >= self.config.max_sync_retries {
            tracing::warn!(
                "Giving up on {}/{} after {retry_count} attempt(s): {message}",
                mutation.table_name,
                mutation.record_id
            );
        } else {
            tracing::warn!(
                "Push of {}/{} failed (attempt {retry_count}): {message}",
                mutation.table_name,
                mutation.record_id
            );
        }
        Ok(())
    }

    /// Route a stale write through the three-way diff.
    async fn handle_version_conflict(
        &self,
        session: &mut SyncSession,
        mutation: &PendingMutation,
        remote: RemoteRecord,
    ) -> Result<()> {
        let table = mutation.table_name.as_str();
        let record_id = mutation.record_id.as_str();

        if mutation.operation == Operation::Delete {
            // An explicit local delete wins over remote edits
            return match self
                .remote
                .delete(table, record_id, Some(remote.version))
                .await
            {
                Ok(()) => self.store.confirm_delete(mutation).await,
                Err(error) if error.is_storage() => Err(error),
                Err(error) => self.record_failure(session, mutation, &error).await,
            };
        }

        let base = self
            .store
            .get_synced_record(table, record_id)
            .await?
            .map(|record| record.payload)
            .unwrap_or_default();
        let report = conflict::detect(&mutation.payload, &remote.payload, &base);

        if report.has_conflicts() {
            let conflict = SyncConflict::new(
                table,
                record_id,
                mutation.payload.clone(),
                remote.payload,
                base,
                remote.version,
                report.conflicting_fields,
            );
            if self.store.record_conflict(mutation, &conflict).await? {
                session.conflicts_detected += 1;
                tracing::info!(
                    "Conflict on {table}/{record_id} in field(s): {}",
                    conflict.conflicting_fields.join(", ")
                );
            }
            return Ok(());
        }

        if report.merged == remote.payload {
            return self
                .store
                .confirm_write(mutation, &remote.payload, remote.version)
                .await;
        }

        match self
            .remote
            .update(table, record_id, &report.merged, Some(remote.version))
            .await
        {
            Ok(ack) => {
                self.store
                    .confirm_write(mutation, &report.merged, ack.version)
                    .await?;
                tracing::debug!(
                    "Auto-merged {table}/{record_id} at version {}",
                    ack.version
                );
                Ok(())
            }
            Err(Error::VersionConflict { .. }) => {
                self.store
                    .requeue_merged(mutation, &report.merged, remote.into_synced(table))
                    .await?;
                tracing::debug!("Remote moved again for {table}/{record_id}; re-queued merge");
                Ok(())
            }
            Err(error) if error.is_storage() => Err(error),
            Err(error) => self.record_failure(session, mutation, &error).await,
        }
    }

    async fn resolve_open_conflicts(&self) -> Result<()> {
        let strategy = self.config.default_strategy;
        for conflict in self.store.list_unresolved_conflicts(None).await? {
            match self.apply_resolution(&conflict, strategy, None).await {
                Ok(_) => {}
                Err(error) if error.is_storage() => return Err(error),
                Err(error) => tracing::warn!(
                    "Could not resolve conflict {} with {strategy}: {error}",
                    conflict.id
                ),
            }
        }
        Ok(())
    }

    async fn apply_resolution(
        &self,
        conflict: &SyncConflict,
        strategy: ResolutionStrategy,
        manual: Option<&Payload>,
    ) -> Result<Resolution> {
        let resolution = conflict::resolve(conflict, strategy, manual)?;
        let Resolution::Resolved(payload) = &resolution else {
            return Ok(resolution);
        };

        let in_sync = self
            .store
            .apply_resolution(conflict, strategy, payload)
            .await?;
        self.record_audit(ResolutionRecord {
            conflict_id: conflict.id,
            table_name: conflict.table_name.clone(),
            record_id: conflict.record_id.clone(),
            strategy,
            resolved_at: chrono::Utc::now().timestamp_millis(),
        });
        tracing::info!(
            "Resolved conflict on {}/{} with {strategy}{}",
            conflict.table_name,
            conflict.record_id,
            if in_sync { "" } else { "; re-queued merged payload" }
        );
        Ok(resolution)
    }

    fn record_audit(&self, record: ResolutionRecord) {
        let mut audit = lock(&self.audit);
        audit.push_back(record);
        while audit.len() > MAX_AUDIT_ENTRIES {
            audit.pop_front();
        }
    }

    /// Resolve one conflict with an explicit strategy.
    ///
    /// `Defer` leaves everything unchanged. On error the conflict stays open.
    pub async fn resolve_conflict(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        manual: Option<&Payload>,
    ) -> Result<Resolution> {
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
        self.apply_resolution(&conflict, strategy, manual).await
    }

    /// Pull every remote record of `tables` into the local snapshots.
    ///
    /// Records with queued local writes are left alone. Returns how many
    /// snapshots changed.
    pub async fn refresh_from_server(&self, tables: &[String]) -> Result<u64> {
        let mut refreshed = 0;
        for table in tables {
            let records = self.remote.list(table).await?;
            let snapshots = records
                .into_iter()
                .map(|record| record.into_synced(table))
                .collect();
            let changed = self.store.apply_remote_snapshot(table, snapshots).await?;
            tracing::debug!("Refreshed {changed} record(s) of {table}");
            refreshed += changed;
        }
        Ok(refreshed)
    }

    /// Reset every failed mutation for another round of attempts.
    pub async fn retry_failed(&self) -> Result<u64> {
        self.store.reset_failed(None).await
    }
}

impl<R: RemoteEndpoint + 'static> SyncTrigger for SyncOrchestrator<R> {
    async fn trigger_sync(&self) {
        self.wait_idle().await;
        if self.is_closed() {
            tracing::debug!("Skipping scheduled sync on a closed backend");
            return;
        }
        match self.sync_now().await {
            Ok(_) => {}
            Err(_) if self.is_closed() => {
                tracing::debug!("Backend closed before the scheduled sync started");
            }
            Err(error) => tracing::warn!("Scheduled sync failed: {error}"),
        }
    }
}
