//! Shared record store service used by the orchestrator, media cache and facade.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    in_transaction, ConflictRepository, Database, LibSqlConflictRepository,
    LibSqlMediaRepository, LibSqlMutationRepository, LibSqlRecordRepository,
    LibSqlSessionRepository, MediaRepository, MutationRepository, RecordRepository,
    SessionRepository,
};
use crate::models::{
    ConflictId, MediaCacheEntry, MediaEntryId, MutationId, Operation, Payload, PendingMutation,
    ResolutionStrategy, SessionId, SyncConflict, SyncSession, SyncStats, SyncStatus,
    SyncedRecord,
};
use crate::Result;

/// Whether a queued mutation still holds the write a session picked up.
fn unchanged(current: &PendingMutation, snapshot: &PendingMutation) -> bool {
    current.operation == snapshot.operation && current.payload == snapshot.payload
}

/// Thread-safe service over the local database and its repositories.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl Store {
    /// Open a store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Location of the database file, `None` when in memory.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    // ---- pending mutations ----

    /// Durably record a local write, folding it into any queued mutation for
    /// the same record.
    ///
    /// A write against a record that is already synced becomes an update
    /// based on the synced version. Open conflicts for the record are
    /// superseded by the new write. Returns the queued mutation, or `None`
    /// when the write cancelled an unsent create.
    pub async fn enqueue(&self, mutation: PendingMutation) -> Result<Option<PendingMutation>> {
        let db = self.db.lock().await;
        let conn = db.connection();

        in_transaction(conn, || async move {
            let mutations = LibSqlMutationRepository::new(conn);
            let records = LibSqlRecordRepository::new(conn);
            let conflicts = LibSqlConflictRepository::new(conn);

            let mut incoming = mutation;
            if let Some(record) = records
                .get(&incoming.table_name, &incoming.record_id)
                .await?
            {
                incoming.base_version = Some(record.version);
                if incoming.operation == Operation::Create {
                    incoming.operation = Operation::Update;
                }
            }

            let superseded = conflicts
                .remove_unresolved_for_record(&incoming.table_name, &incoming.record_id)
                .await?;
            if superseded > 0 {
                tracing::debug!(
                    "Local write to {}/{} superseded {superseded} open conflict(s)",
                    incoming.table_name,
                    incoming.record_id
                );
            }

            let queued = match mutations
                .get_for_record(&incoming.table_name, &incoming.record_id)
                .await?
            {
                Some(existing) => {
                    let existing_id = existing.id;
                    let merged = existing.coalesce(incoming);
                    if merged.is_none() {
                        mutations.remove(&existing_id).await?;
                    }
                    merged
                }
                None => Some(incoming),
            };

            if let Some(mutation) = &queued {
                mutations.upsert(mutation).await?;
            }
            Ok(queued)
        })
        .await
    }

    /// Insert or replace the mutation for a record.
    pub async fn upsert_pending_mutation(&self, mutation: &PendingMutation) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMutationRepository::new(db.connection())
            .upsert(mutation)
            .await
    }

    /// List mutations oldest first; `None` selects every status except `Synced`.
    pub async fn list_pending_mutations(
        &self,
        filter: Option<&[SyncStatus]>,
    ) -> Result<Vec<PendingMutation>> {
        let db = self.db.lock().await;
        LibSqlMutationRepository::new(db.connection())
            .list(filter.unwrap_or(&SyncStatus::UNSYNCED))
            .await
    }

    pub async fn get_mutation(&self, id: &MutationId) -> Result<Option<PendingMutation>> {
        let db = self.db.lock().await;
        LibSqlMutationRepository::new(db.connection()).get(id).await
    }

    pub async fn get_mutation_for_record(
        &self,
        table_name: &str,
        record_id: &str,
    ) -> Result<Option<PendingMutation>> {
        let db = self.db.lock().await;
        LibSqlMutationRepository::new(db.connection())
            .get_for_record(table_name, record_id)
            .await
    }

    /// Partially update the sync state of a mutation.
    pub async fn update_mutation_status(
        &self,
        id: &MutationId,
        status: SyncStatus,
        error_message: Option<&str>,
        retry_count: Option<u32>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMutationRepository::new(db.connection())
            .update_status(id, status, error_message, retry_count)
            .await
    }

    pub async fn update_mutation_payload(
        &self,
        id: &MutationId,
        payload: &Payload,
        base_version: Option<i64>,
        status: SyncStatus,
    ) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMutationRepository::new(db.connection())
            .update_payload(id, payload, base_version, status)
            .await
    }

    pub async fn remove_mutation(&self, id: &MutationId) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlMutationRepository::new(db.connection())
            .remove(id)
            .await
    }

    pub async fn remove_synced_mutations(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlMutationRepository::new(db.connection())
            .remove_synced()
            .await
    }

    /// Move failed mutations still under the retry ceiling back to the queue.
    pub async fn requeue_failed(&self, max_retries: u32) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlMutationRepository::new(db.connection())
            .requeue(SyncStatus::Failed, Some(max_retries))
            .await
    }

    /// Return mutations left mid-push by an interrupted session to the queue.
    pub async fn requeue_interrupted(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlMutationRepository::new(db.connection())
            .requeue(SyncStatus::Syncing, None)
            .await
    }

    /// Queue every offline-only mutation for upload.
    pub async fn promote_offline(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlMutationRepository::new(db.connection())
            .requeue(SyncStatus::OfflineOnly, None)
            .await
    }

    /// Reset failed mutations (one or all) regardless of their retry count.
    pub async fn reset_failed(&self, id: Option<&MutationId>) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlMutationRepository::new(db.connection())
            .reset_failed(id)
            .await
    }

    pub async fn get_stats(&self) -> Result<SyncStats> {
        let db = self.db.lock().await;
        LibSqlMutationRepository::new(db.connection()).stats().await
    }

    // ---- session outcomes ----

    /// Record that the remote accepted `pushed` for a mutation at `version`.
    ///
    /// The pushed payload becomes the synced snapshot. If the record was
    /// edited while the push was in flight, the newer write stays queued
    /// against the new version instead of being marked synced.
    pub async fn confirm_write(
        &self,
        snapshot: &PendingMutation,
        pushed: &Payload,
        version: i64,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();

        in_transaction(conn, || async move {
            let mutations = LibSqlMutationRepository::new(conn);
            LibSqlRecordRepository::new(conn)
                .upsert(&SyncedRecord::new(
                    snapshot.table_name.as_str(),
                    snapshot.record_id.as_str(),
                    pushed.clone(),
                    version,
                ))
                .await?;

            match mutations.get(&snapshot.id).await? {
                Some(current) if unchanged(&current, snapshot) => {
                    mutations
                        .update_status(&snapshot.id, SyncStatus::Synced, None, None)
                        .await
                }
                Some(mut current) => {
                    current.base_version = Some(version);
                    if current.operation == Operation::Create {
                        current.operation = Operation::Update;
                    }
                    mutations.upsert(&current).await
                }
                None => Ok(()),
            }
        })
        .await
    }

    /// Record that the remote applied a delete.
    pub async fn confirm_delete(&self, snapshot: &PendingMutation) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();

        in_transaction(conn, || async move {
            let mutations = LibSqlMutationRepository::new(conn);
            LibSqlRecordRepository::new(conn)
                .remove(&snapshot.table_name, &snapshot.record_id)
                .await?;

            match mutations.get(&snapshot.id).await? {
                Some(current)
                    if unchanged(&current, snapshot) || current.operation == Operation::Delete =>
                {
                    mutations.remove(&snapshot.id).await?;
                }
                Some(mut current) => {
                    // Recreated while the delete was in flight
                    current.operation = Operation::Create;
                    current.base_version = None;
                    mutations.upsert(&current).await?;
                }
                None => {}
            }
            Ok(())
        })
        .await
    }

    /// Mark a pushed mutation failed. Returns `false` when a newer local
    /// write replaced it mid-flight (the newer write stays queued).
    pub async fn record_failure(
        &self,
        snapshot: &PendingMutation,
        message: &str,
        retry_count: u32,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let mutations = LibSqlMutationRepository::new(db.connection());

        match mutations.get(&snapshot.id).await? {
            Some(current) if unchanged(&current, snapshot) => {
                mutations
                    .update_status(
                        &snapshot.id,
                        SyncStatus::Failed,
                        Some(message),
                        Some(retry_count),
                    )
                    .await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Store a detected conflict and park its mutation. Returns `false` when
    /// a newer local write replaced the mutation mid-flight; that write will
    /// be diffed on the next session.
    pub async fn record_conflict(
        &self,
        snapshot: &PendingMutation,
        conflict: &SyncConflict,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let conn = db.connection();

        in_transaction(conn, || async move {
            let mutations = LibSqlMutationRepository::new(conn);
            match mutations.get(&snapshot.id).await? {
                Some(current) if unchanged(&current, snapshot) => {
                    let conflicts = LibSqlConflictRepository::new(conn);
                    conflicts
                        .remove_unresolved_for_record(&conflict.table_name, &conflict.record_id)
                        .await?;
                    conflicts.save(conflict).await?;
                    mutations
                        .update_status(&snapshot.id, SyncStatus::Conflict, None, None)
                        .await?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
        .await
    }

    /// Re-queue a pushed mutation with an auto-merged payload.
    ///
    /// `remote` is the record the payload was merged against; it becomes the
    /// new base so the next push diffs against it.
    pub async fn requeue_merged(
        &self,
        snapshot: &PendingMutation,
        merged: &Payload,
        remote: SyncedRecord,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let conn = db.connection();

        in_transaction(conn, || async move {
            let mutations = LibSqlMutationRepository::new(conn);
            match mutations.get(&snapshot.id).await? {
                Some(current) if unchanged(&current, snapshot) => {
                    let version = remote.version;
                    LibSqlRecordRepository::new(conn).upsert(&remote).await?;
                    mutations
                        .update_payload(
                            &snapshot.id,
                            merged,
                            Some(version),
                            SyncStatus::PendingUpload,
                        )
                        .await?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
        .await
    }

    // ---- conflicts ----

    /// Persist a conflict, replacing older open conflicts for the same record.
    pub async fn save_conflict(&self, conflict: &SyncConflict) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();

        in_transaction(conn, || async move {
            let conflicts = LibSqlConflictRepository::new(conn);
            conflicts
                .remove_unresolved_for_record(&conflict.table_name, &conflict.record_id)
                .await?;
            conflicts.save(conflict).await
        })
        .await
    }

    pub async fn get_conflict(&self, id: &ConflictId) -> Result<Option<SyncConflict>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .get(id)
            .await
    }

    /// Unresolved conflicts, oldest first, optionally for one table.
    pub async fn list_unresolved_conflicts(
        &self,
        table_name: Option<&str>,
    ) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .list_unresolved(table_name)
            .await
    }

    pub async fn mark_conflict_resolved(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        resolved_data: &Payload,
    ) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .mark_resolved(id, strategy, resolved_data)
            .await
    }

    /// Apply a conflict resolution in one transaction.
    ///
    /// The remote side becomes the synced snapshot. When the resolution equals
    /// the remote payload the record is in sync and its mutation is dropped;
    /// otherwise the mutation is re-queued with the resolved payload against
    /// the remote version. Returns `true` when the record ended up in sync.
    pub async fn apply_resolution(
        &self,
        conflict: &SyncConflict,
        strategy: ResolutionStrategy,
        resolved: &Payload,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let conn = db.connection();

        in_transaction(conn, || async move {
            let mutations = LibSqlMutationRepository::new(conn);
            LibSqlConflictRepository::new(conn)
                .mark_resolved(&conflict.id, strategy, resolved)
                .await?;
            LibSqlRecordRepository::new(conn)
                .upsert(&SyncedRecord::new(
                    conflict.table_name.as_str(),
                    conflict.record_id.as_str(),
                    conflict.remote_data.clone(),
                    conflict.remote_version,
                ))
                .await?;

            let existing = mutations
                .get_for_record(&conflict.table_name, &conflict.record_id)
                .await?;
            let in_sync = *resolved == conflict.remote_data;

            match (existing, in_sync) {
                (Some(mutation), true) => {
                    mutations.remove(&mutation.id).await?;
                }
                (Some(mutation), false) => {
                    mutations
                        .update_payload(
                            &mutation.id,
                            resolved,
                            Some(conflict.remote_version),
                            SyncStatus::PendingUpload,
                        )
                        .await?;
                }
                (None, false) => {
                    let requeued = PendingMutation::new(
                        conflict.table_name.as_str(),
                        conflict.record_id.as_str(),
                        resolved.clone(),
                        Operation::Update,
                        SyncStatus::PendingUpload,
                    )
                    .with_base_version(Some(conflict.remote_version));
                    mutations.upsert(&requeued).await?;
                }
                (None, true) => {}
            }
            Ok(in_sync)
        })
        .await
    }

    // ---- sessions ----

    pub async fn create_session(&self, session: &SyncSession) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .create(session)
            .await
    }

    pub async fn update_session(&self, session: &SyncSession) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .update(session)
            .await
    }

    pub async fn get_session(&self, id: &SessionId) -> Result<Option<SyncSession>> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection()).get(id).await
    }

    /// Most recent sessions, newest first.
    pub async fn list_recent_sessions(&self, limit: usize) -> Result<Vec<SyncSession>> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .list_recent(limit)
            .await
    }

    // ---- synced records ----

    pub async fn get_synced_record(
        &self,
        table_name: &str,
        record_id: &str,
    ) -> Result<Option<SyncedRecord>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .get(table_name, record_id)
            .await
    }

    pub async fn upsert_synced_record(&self, record: &SyncedRecord) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .upsert(record)
            .await
    }

    pub async fn remove_synced_record(&self, table_name: &str, record_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .remove(table_name, record_id)
            .await
    }

    pub async fn list_synced_records(&self, table_name: &str) -> Result<Vec<SyncedRecord>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .list(table_name)
            .await
    }

    /// Current local value of a record: the queued payload if any, else the
    /// synced snapshot. `None` when the record is absent or a delete is queued.
    pub async fn read_record(&self, table_name: &str, record_id: &str) -> Result<Option<Payload>> {
        let db = self.db.lock().await;
        let conn = db.connection();

        if let Some(mutation) = LibSqlMutationRepository::new(conn)
            .get_for_record(table_name, record_id)
            .await?
        {
            if mutation.sync_status != SyncStatus::Synced {
                return Ok((mutation.operation != Operation::Delete).then_some(mutation.payload));
            }
        }

        Ok(LibSqlRecordRepository::new(conn)
            .get(table_name, record_id)
            .await?
            .map(|record| record.payload))
    }

    /// Replace the synced snapshots of one table with the remote's listing.
    ///
    /// Records with a queued local mutation are left alone. Returns how many
    /// snapshots were written or removed.
    pub async fn apply_remote_snapshot(
        &self,
        table_name: &str,
        remote: Vec<SyncedRecord>,
    ) -> Result<u64> {
        let db = self.db.lock().await;
        let conn = db.connection();

        in_transaction(conn, || async move {
            let mutations = LibSqlMutationRepository::new(conn);
            let records = LibSqlRecordRepository::new(conn);
            let mut pending = HashSet::new();
            for mutation in mutations.list(&SyncStatus::UNSYNCED).await? {
                if mutation.table_name == table_name {
                    pending.insert(mutation.record_id);
                }
            }

            let mut changed = 0;
            let mut seen = HashSet::new();
            for record in remote {
                seen.insert(record.record_id.clone());
                if pending.contains(&record.record_id) {
                    continue;
                }
                records.upsert(&record).await?;
                changed += 1;
            }

            for local in records.list(table_name).await? {
                if !seen.contains(&local.record_id) && !pending.contains(&local.record_id) {
                    records.remove(table_name, &local.record_id).await?;
                    changed += 1;
                }
            }
            Ok(changed)
        })
        .await
    }

    // ---- media cache index ----

    pub async fn get_media_by_url(&self, url: &str) -> Result<Option<MediaCacheEntry>> {
        let db = self.db.lock().await;
        LibSqlMediaRepository::new(db.connection())
            .get_by_url(url)
            .await
    }

    pub async fn insert_media_entry(&self, entry: &MediaCacheEntry) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMediaRepository::new(db.connection())
            .insert(entry)
            .await
    }

    pub async fn touch_media_entry(&self, id: &MediaEntryId, now: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMediaRepository::new(db.connection())
            .touch(id, now)
            .await
    }

    pub async fn remove_media_entry(&self, id: &MediaEntryId) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlMediaRepository::new(db.connection())
            .remove(id)
            .await
    }

    pub async fn list_media_entries(&self) -> Result<Vec<MediaCacheEntry>> {
        let db = self.db.lock().await;
        LibSqlMediaRepository::new(db.connection())
            .list_all()
            .await
    }

    pub async fn total_media_size(&self) -> Result<i64> {
        let db = self.db.lock().await;
        LibSqlMediaRepository::new(db.connection())
            .total_size()
            .await
    }

    pub async fn list_expired_media(&self, now: i64) -> Result<Vec<MediaCacheEntry>> {
        let db = self.db.lock().await;
        LibSqlMediaRepository::new(db.connection())
            .list_expired(now)
            .await
    }

    pub async fn list_temporary_media(&self) -> Result<Vec<MediaCacheEntry>> {
        let db = self.db.lock().await;
        LibSqlMediaRepository::new(db.connection())
            .list_temporary()
            .await
    }

    pub async fn list_media_by_owner(&self, owner_id: &str) -> Result<Vec<MediaCacheEntry>> {
        let db = self.db.lock().await;
        LibSqlMediaRepository::new(db.connection())
            .list_by_owner(owner_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn write(record_id: &str, operation: Operation, body: serde_json::Value) -> PendingMutation {
        PendingMutation::new(
            "notes",
            record_id,
            payload(body),
            operation,
            SyncStatus::PendingUpload,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_path_creates_parent_directories() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("tidal.db");

        let store = Store::open_path(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.db_path(), Some(path.as_path()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_same_write_twice_keeps_one_mutation() {
        let store = Store::open_in_memory().await.unwrap();

        let first = store
            .enqueue(write("n1", Operation::Create, json!({"title": "a"})))
            .await
            .unwrap()
            .unwrap();
        let second = store
            .enqueue(write("n1", Operation::Create, json!({"title": "a"})))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.id, second.id);
        let queued = store.list_pending_mutations(None).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].payload, payload(json!({"title": "a"})));
        assert_eq!(queued[0].operation, Operation::Create);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_create_then_delete_cancels() {
        let store = Store::open_in_memory().await.unwrap();

        store
            .enqueue(write("n1", Operation::Create, json!({"title": "a"})))
            .await
            .unwrap();
        let dropped = store
            .enqueue(write("n1", Operation::Delete, json!({})))
            .await
            .unwrap();

        assert!(dropped.is_none());
        assert!(store.list_pending_mutations(None).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_on_synced_record_is_update_with_base_version() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .upsert_synced_record(&SyncedRecord::new("notes", "n1", payload(json!({"a": 1})), 4))
            .await
            .unwrap();

        let queued = store
            .enqueue(write("n1", Operation::Create, json!({"a": 2})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queued.operation, Operation::Update);
        assert_eq!(queued.base_version, Some(4));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_supersedes_open_conflict() {
        let store = Store::open_in_memory().await.unwrap();
        let conflict = SyncConflict::new(
            "notes",
            "n1",
            payload(json!({"a": 2})),
            payload(json!({"a": 3})),
            payload(json!({"a": 1})),
            2,
            vec!["a".to_string()],
        );
        store.save_conflict(&conflict).await.unwrap();

        store
            .enqueue(write("n1", Operation::Update, json!({"a": 4})))
            .await
            .unwrap();
        assert!(store.list_unresolved_conflicts(None).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_confirm_write_marks_synced_and_snapshots_payload() {
        let store = Store::open_in_memory().await.unwrap();
        let queued = store
            .enqueue(write("n1", Operation::Create, json!({"a": 1})))
            .await
            .unwrap()
            .unwrap();

        store.confirm_write(&queued, &queued.payload, 1).await.unwrap();

        let mutation = store.get_mutation(&queued.id).await.unwrap().unwrap();
        assert_eq!(mutation.sync_status, SyncStatus::Synced);
        let record = store.get_synced_record("notes", "n1").await.unwrap().unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.payload, payload(json!({"a": 1})));

        assert_eq!(store.remove_synced_mutations().await.unwrap(), 1);
        assert_eq!(
            store.read_record("notes", "n1").await.unwrap(),
            Some(payload(json!({"a": 1})))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_confirm_write_keeps_edit_made_mid_flight() {
        let store = Store::open_in_memory().await.unwrap();
        let snapshot = store
            .enqueue(write("n1", Operation::Create, json!({"a": 1})))
            .await
            .unwrap()
            .unwrap();
        store
            .update_mutation_status(&snapshot.id, SyncStatus::Syncing, None, None)
            .await
            .unwrap();

        store
            .enqueue(write("n1", Operation::Update, json!({"a": 2})))
            .await
            .unwrap();
        store.confirm_write(&snapshot, &snapshot.payload, 1).await.unwrap();

        let current = store.get_mutation(&snapshot.id).await.unwrap().unwrap();
        assert_eq!(current.sync_status, SyncStatus::PendingUpload);
        assert_eq!(current.operation, Operation::Update);
        assert_eq!(current.base_version, Some(1));
        assert_eq!(current.payload, payload(json!({"a": 2})));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_confirm_delete_removes_mutation_and_snapshot() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .upsert_synced_record(&SyncedRecord::new("notes", "n1", payload(json!({"a": 1})), 1))
            .await
            .unwrap();
        let queued = store
            .enqueue(write("n1", Operation::Delete, json!({})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.read_record("notes", "n1").await.unwrap(), None);

        store.confirm_delete(&queued).await.unwrap();

        assert!(store.get_mutation(&queued.id).await.unwrap().is_none());
        assert!(store.get_synced_record("notes", "n1").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_record_conflict_parks_mutation() {
        let store = Store::open_in_memory().await.unwrap();
        let queued = store
            .enqueue(write("n1", Operation::Update, json!({"a": 2})))
            .await
            .unwrap()
            .unwrap();
        let conflict = SyncConflict::new(
            "notes",
            "n1",
            payload(json!({"a": 2})),
            payload(json!({"a": 3})),
            payload(json!({"a": 1})),
            2,
            vec!["a".to_string()],
        );

        assert!(store.record_conflict(&queued, &conflict).await.unwrap());

        let mutation = store.get_mutation(&queued.id).await.unwrap().unwrap();
        assert_eq!(mutation.sync_status, SyncStatus::Conflict);
        assert_eq!(store.get_stats().await.unwrap().conflicted, 1);
        assert_eq!(store.list_unresolved_conflicts(None).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_apply_resolution_requeues_or_drops_mutation() {
        let store = Store::open_in_memory().await.unwrap();
        let queued = store
            .enqueue(write("n1", Operation::Update, json!({"a": 2})))
            .await
            .unwrap()
            .unwrap();
        let conflict = SyncConflict::new(
            "notes",
            "n1",
            payload(json!({"a": 2})),
            payload(json!({"a": 3})),
            payload(json!({"a": 1})),
            2,
            vec!["a".to_string()],
        );
        store.record_conflict(&queued, &conflict).await.unwrap();

        let merged = payload(json!({"a": 5}));
        let in_sync = store
            .apply_resolution(&conflict, ResolutionStrategy::AutomaticMerge, &merged)
            .await
            .unwrap();
        assert!(!in_sync);

        let requeued = store.get_mutation(&queued.id).await.unwrap().unwrap();
        assert_eq!(requeued.sync_status, SyncStatus::PendingUpload);
        assert_eq!(requeued.payload, merged);
        assert_eq!(requeued.base_version, Some(2));
        let base = store.get_synced_record("notes", "n1").await.unwrap().unwrap();
        assert_eq!(base.payload, payload(json!({"a": 3})));

        let resolved = store.get_conflict(&conflict.id).await.unwrap().unwrap();
        assert!(resolved.is_resolved());

        // Remote wins leaves nothing to push
        let second = SyncConflict::new(
            "notes",
            "n1",
            payload(json!({"a": 5})),
            payload(json!({"a": 6})),
            payload(json!({"a": 3})),
            3,
            vec!["a".to_string()],
        );
        store.save_conflict(&second).await.unwrap();
        let in_sync = store
            .apply_resolution(&second, ResolutionStrategy::RemoteWins, &second.remote_data)
            .await
            .unwrap();
        assert!(in_sync);
        assert!(store.get_mutation(&queued.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_apply_remote_snapshot_skips_pending_records() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .upsert_synced_record(&SyncedRecord::new("notes", "gone", Payload::new(), 1))
            .await
            .unwrap();
        store
            .enqueue(write("mine", Operation::Create, json!({"local": true})))
            .await
            .unwrap();

        let changed = store
            .apply_remote_snapshot(
                "notes",
                vec![
                    SyncedRecord::new("notes", "fresh", payload(json!({"r": 1})), 3),
                    SyncedRecord::new("notes", "mine", payload(json!({"r": 2})), 9),
                ],
            )
            .await
            .unwrap();

        assert_eq!(changed, 2);
        let ids = store
            .list_synced_records("notes")
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.record_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["fresh".to_string()]);
        assert_eq!(
            store.read_record("notes", "mine").await.unwrap(),
            Some(payload(json!({"local": true})))
        );
    }
}
