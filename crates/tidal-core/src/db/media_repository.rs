//! Media cache entry repository implementation

use libsql::{params, Connection, Row};

use super::{from_json, to_json};
use crate::error::{Error, Result};
use crate::models::{MediaCacheEntry, MediaEntryId, OWNER_ID_KEY};

const MEDIA_COLUMNS: &str = "id, original_url, local_path, mime_type, file_size, cached_at,
    last_accessed, access_count, is_temporary, expires_at, priority, is_essential, metadata";

/// Trait for media cache index operations (async)
#[allow(async_fn_in_trait)]
pub trait MediaRepository {
    /// Look up an entry by its source URL
    async fn get_by_url(&self, url: &str) -> Result<Option<MediaCacheEntry>>;

    /// Insert an entry, replacing any entry for the same URL
    async fn insert(&self, entry: &MediaCacheEntry) -> Result<()>;

    /// Record a cache hit
    async fn touch(&self, id: &MediaEntryId, now: i64) -> Result<()>;

    /// Delete an entry; returns whether a row was removed
    async fn remove(&self, id: &MediaEntryId) -> Result<bool>;

    /// List every entry
    async fn list_all(&self) -> Result<Vec<MediaCacheEntry>>;

    /// Sum of all entry sizes in bytes
    async fn total_size(&self) -> Result<i64>;

    /// Entries whose expiry is at or before `now`
    async fn list_expired(&self, now: i64) -> Result<Vec<MediaCacheEntry>>;

    /// Entries flagged temporary
    async fn list_temporary(&self) -> Result<Vec<MediaCacheEntry>>;

    /// Entries whose metadata names `owner_id`
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<MediaCacheEntry>>;
}

/// libSQL implementation of `MediaRepository`
pub struct LibSqlMediaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMediaRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &Row) -> Result<MediaCacheEntry> {
        let id: String = row.get(0)?;
        let priority: String = row.get(10)?;
        let metadata: String = row.get(12)?;

        Ok(MediaCacheEntry {
            id: id
                .parse()
                .map_err(|_| Error::InvalidInput(format!("Invalid media entry ID: {id}")))?,
            original_url: row.get(1)?,
            local_path: row.get(2)?,
            mime_type: row.get(3)?,
            file_size: row.get(4)?,
            cached_at: row.get(5)?,
            last_accessed: row.get(6)?,
            access_count: row.get(7)?,
            is_temporary: row.get::<i64>(8)? != 0,
            expires_at: row.get(9)?,
            priority: priority.parse()?,
            is_essential: row.get::<i64>(11)? != 0,
            metadata: from_json(&metadata)?,
        })
    }

    async fn query_entries(
        &self,
        filter: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<MediaCacheEntry>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {MEDIA_COLUMNS} FROM media_cache {filter}
                     ORDER BY cached_at ASC, id ASC"
                ),
                params,
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }
}

impl MediaRepository for LibSqlMediaRepository<'_> {
    async fn get_by_url(&self, url: &str) -> Result<Option<MediaCacheEntry>> {
        let mut entries = self
            .query_entries("WHERE original_url = ?", params![url])
            .await?;
        Ok(entries.pop())
    }

    async fn insert(&self, entry: &MediaCacheEntry) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO media_cache ({MEDIA_COLUMNS})
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    entry.id.as_str(),
                    entry.original_url.as_str(),
                    entry.local_path.as_str(),
                    entry.mime_type.as_str(),
                    entry.file_size,
                    entry.cached_at,
                    entry.last_accessed,
                    entry.access_count,
                    i64::from(entry.is_temporary),
                    entry.expires_at,
                    entry.priority.as_str(),
                    i64::from(entry.is_essential),
                    to_json(&entry.metadata)?,
                ],
            )
            .await?;
        Ok(())
    }

    async fn touch(&self, id: &MediaEntryId, now: i64) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE media_cache
                 SET last_accessed = ?, access_count = access_count + 1
                 WHERE id = ?",
                params![now, id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("media entry {id}")));
        }
        Ok(())
    }

    async fn remove(&self, id: &MediaEntryId) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM media_cache WHERE id = ?", params![id.as_str()])
            .await?;
        Ok(rows > 0)
    }

    async fn list_all(&self) -> Result<Vec<MediaCacheEntry>> {
        self.query_entries("", ()).await
    }

    async fn total_size(&self) -> Result<i64> {
        let mut rows = self
            .conn
            .query("SELECT COALESCE(SUM(file_size), 0) FROM media_cache", ())
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    async fn list_expired(&self, now: i64) -> Result<Vec<MediaCacheEntry>> {
        self.query_entries(
            "WHERE expires_at IS NOT NULL AND expires_at <= ?",
            params![now],
        )
        .await
    }

    async fn list_temporary(&self) -> Result<Vec<MediaCacheEntry>> {
        self.query_entries("WHERE is_temporary = 1", ()).await
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<MediaCacheEntry>> {
        let path = format!("$.{OWNER_ID_KEY}");
        self.query_entries(
            "WHERE json_extract(metadata, ?) = ?",
            params![path, owner_id],
        )
        .await
    }
}
