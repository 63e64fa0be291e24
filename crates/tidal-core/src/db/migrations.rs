//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Execute a migration's statements in one transaction
async fn apply(conn: &Connection, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    Ok(())
}

/// Migration to version 1: sync queue, conflicts, sessions and snapshots
async fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        &[
            // Schema version tracking
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            // Pending mutations, one per record
            "CREATE TABLE IF NOT EXISTS pending_mutations (
                id TEXT PRIMARY KEY,
                table_name TEXT NOT NULL,
                record_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                operation TEXT NOT NULL,
                sync_status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_modified INTEGER NOT NULL,
                last_sync_attempt INTEGER,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                base_version INTEGER,
                metadata TEXT NOT NULL DEFAULT '{}',
                UNIQUE (table_name, record_id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_pending_mutations_status ON pending_mutations(sync_status)",
            "CREATE INDEX IF NOT EXISTS idx_pending_mutations_created ON pending_mutations(created_at ASC)",
            // Conflicts detected by three-way diff
            "CREATE TABLE IF NOT EXISTS sync_conflicts (
                id TEXT PRIMARY KEY,
                table_name TEXT NOT NULL,
                record_id TEXT NOT NULL,
                local_data TEXT NOT NULL,
                remote_data TEXT NOT NULL,
                base_data TEXT NOT NULL,
                remote_version INTEGER NOT NULL,
                conflicting_fields TEXT NOT NULL,
                detected_at INTEGER NOT NULL,
                resolution_strategy TEXT,
                resolved_at INTEGER,
                resolved_data TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_table ON sync_conflicts(table_name)",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record ON sync_conflicts(table_name, record_id)",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at ON sync_conflicts(resolved_at)",
            // Sync session history
            "CREATE TABLE IF NOT EXISTS sync_sessions (
                id TEXT PRIMARY KEY,
                started_at INTEGER NOT NULL,
                completed_at INTEGER,
                status TEXT NOT NULL,
                records_processed INTEGER NOT NULL DEFAULT 0,
                records_total INTEGER NOT NULL DEFAULT 0,
                conflicts_detected INTEGER NOT NULL DEFAULT 0,
                errors_encountered INTEGER NOT NULL DEFAULT 0,
                error_messages TEXT NOT NULL DEFAULT '[]'
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_sessions_started ON sync_sessions(started_at DESC)",
            // Last agreed payload per record (three-way diff base)
            "CREATE TABLE IF NOT EXISTS synced_records (
                table_name TEXT NOT NULL,
                record_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                version INTEGER NOT NULL,
                synced_at INTEGER NOT NULL,
                PRIMARY KEY (table_name, record_id)
            )",
            // Record migration version
            "INSERT INTO schema_version (version) VALUES (1)",
        ],
    )
    .await?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: media cache entries
async fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        &[
            "CREATE TABLE IF NOT EXISTS media_cache (
                id TEXT PRIMARY KEY,
                original_url TEXT NOT NULL UNIQUE,
                local_path TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                cached_at INTEGER NOT NULL,
                last_accessed INTEGER NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                is_temporary INTEGER NOT NULL DEFAULT 0,
                expires_at INTEGER,
                priority TEXT NOT NULL DEFAULT 'normal',
                is_essential INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '{}'
            )",
            "CREATE INDEX IF NOT EXISTS idx_media_cache_expires ON media_cache(expires_at)",
            "CREATE INDEX IF NOT EXISTS idx_media_cache_temporary ON media_cache(is_temporary)",
            "INSERT INTO schema_version (version) VALUES (2)",
        ],
    )
    .await?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, name: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM sqlite_master
                    WHERE type = 'table' AND name = ?
                )",
                [name],
            )
            .await
            .unwrap();

        rows.next()
            .await
            .unwrap()
            .is_some_and(|row| row.get::<i32>(0).unwrap() != 0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap(); // Should not fail

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_create_all_tables() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        for table in [
            "pending_mutations",
            "sync_conflicts",
            "sync_sessions",
            "synced_records",
            "media_cache",
        ] {
            assert!(table_exists(&conn, table).await, "missing table {table}");
        }
    }
}
