//! Bounded local cache for remote binary assets.
//!
//! Files live under the cache directory as `<entry id>.<ext>`; the index lives
//! in the `media_cache` table. Usage is tracked in memory and eviction removes
//! the lowest-priority entries first.

mod fetcher;

pub use fetcher::{AssetFetcher, FetchedAsset, HttpAssetFetcher};

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::MediaCacheConfig;
use crate::models::{CachePriority, MediaCacheEntry, MediaEntryId, Payload, OWNER_ID_KEY};
use crate::store::Store;
use crate::util::now_millis;
use crate::{Error, Result};

const ACCESS_WEIGHT: f64 = 5.0;
const ACCESS_COUNT_CAP: i64 = 50;
const RECENCY_WEIGHT: f64 = 100.0;
const ESSENTIAL_BONUS: f64 = 10_000.0;
const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// How a fetched asset should be cached
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    pub priority: CachePriority,
    pub is_essential: bool,
    /// Wiped by `clear_temporary`
    pub is_temporary: bool,
    /// Overrides the configured default lifetime
    pub ttl: Option<Duration>,
    pub owner_id: Option<String>,
    pub metadata: Payload,
}

/// Cache usage summary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MediaCacheStats {
    pub entry_count: u64,
    pub total_size: i64,
    pub max_size: i64,
    pub usage_ratio: f64,
    pub expired_count: u64,
    pub temporary_count: u64,
    pub essential_count: u64,
}

/// Eviction priority of an entry at `now`; lower scores go first.
#[allow(clippy::cast_precision_loss)]
pub fn priority_score(entry: &MediaCacheEntry, now: i64) -> f64 {
    let accesses = entry.access_count.clamp(0, ACCESS_COUNT_CAP) as f64;
    let hours_idle = (now - entry.last_accessed).max(0) as f64 / MILLIS_PER_HOUR;
    let essential = if entry.is_essential { ESSENTIAL_BONUS } else { 0.0 };

    entry.priority.weight() + ACCESS_WEIGHT * accesses + RECENCY_WEIGHT / (1.0 + hours_idle)
        + essential
}

#[derive(Debug)]
struct CacheState {
    current_size: i64,
}

/// Size-bounded asset cache.
pub struct MediaCache<F> {
    store: Store,
    fetcher: F,
    config: MediaCacheConfig,
    cache_dir: PathBuf,
    state: Mutex<CacheState>,
}

impl<F: AssetFetcher> MediaCache<F> {
    /// Open the cache, creating its directory and recomputing usage.
    ///
    /// Without a configured `cache_dir`, files go to `media/` next to the
    /// database file.
    pub async fn open(store: Store, fetcher: F, config: MediaCacheConfig) -> Result<Self> {
        let cache_dir = match &config.cache_dir {
            Some(dir) => dir.clone(),
            None => store
                .db_path()
                .and_then(Path::parent)
                .map(|parent| parent.join("media"))
                .ok_or_else(|| {
                    Error::InvalidInput("media cache directory is not configured".to_string())
                })?,
        };
        tokio::fs::create_dir_all(&cache_dir).await?;

        let current_size = store.total_media_size().await?;
        tracing::debug!(
            "Media cache opened at {} with {current_size} byte(s) in use",
            cache_dir.display()
        );

        Ok(Self {
            store,
            fetcher,
            config,
            cache_dir,
            state: Mutex::new(CacheState { current_size }),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub const fn config(&self) -> &MediaCacheConfig {
        &self.config
    }

    /// Bytes currently in use
    pub async fn current_size(&self) -> i64 {
        self.state.lock().await.current_size
    }

    /// Return a cached copy of `url`, fetching it on a miss.
    ///
    /// The download runs without holding the cache lock. When two callers
    /// miss on the same URL, the first to finish caches it and the other
    /// gets that entry.
    pub async fn get(&self, url: &str, options: FetchOptions) -> Result<MediaCacheEntry> {
        if let Some(entry) = self.lookup(url).await? {
            return Ok(entry);
        }

        let asset = self.fetcher.fetch(url).await?;
        let file_size = i64::try_from(asset.bytes.len()).unwrap_or(i64::MAX);
        let max_file_size = self.config.max_file_bytes();
        if file_size > max_file_size {
            return Err(Error::QuotaExceeded(format!(
                "{url} is {file_size} bytes, limit is {max_file_size}"
            )));
        }

        let mut state = self.state.lock().await;
        if let Some(entry) = self.hit(&mut state, url).await? {
            tracing::debug!("{url} was cached while downloading; discarding the copy");
            return Ok(entry);
        }

        let id = MediaEntryId::new();
        let local_path = self.cache_dir.join(format!(
            "{id}.{}",
            fetcher::extension_for(url, &asset.mime_type)
        ));
        tokio::fs::write(&local_path, &asset.bytes).await?;

        let now = now_millis();
        let expires_at = options
            .ttl
            .or_else(|| self.config.default_ttl())
            .map(|ttl| now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)));
        let mut metadata = options.metadata;
        if let Some(owner_id) = options.owner_id {
            metadata.insert(OWNER_ID_KEY.to_string(), owner_id.into());
        }

        let entry = MediaCacheEntry {
            id,
            original_url: url.to_string(),
            local_path: local_path.to_string_lossy().into_owned(),
            mime_type: asset.mime_type,
            file_size,
            cached_at: now,
            last_accessed: now,
            access_count: 1,
            is_temporary: options.is_temporary,
            expires_at,
            priority: options.priority,
            is_essential: options.is_essential,
            metadata,
        };
        if let Err(error) = self.store.insert_media_entry(&entry).await {
            remove_file(&local_path).await?;
            return Err(error);
        }
        state.current_size += file_size;
        tracing::debug!("Cached {url} ({file_size} bytes)");

        let budget = self.config.max_cache_bytes();
        if state.current_size > budget {
            self.evict_to(&mut state, self.config.target_bytes(), Some(&entry.id))
                .await?;
            if state.current_size > budget {
                self.remove_entry(&mut state, &entry).await?;
                return Err(Error::QuotaExceeded(format!(
                    "cannot fit {url} in a {budget} byte cache"
                )));
            }
        }

        Ok(entry)
    }

    /// Return a cached copy of `url` without fetching.
    pub async fn lookup(&self, url: &str) -> Result<Option<MediaCacheEntry>> {
        let mut state = self.state.lock().await;
        self.hit(&mut state, url).await
    }

    async fn hit(&self, state: &mut CacheState, url: &str) -> Result<Option<MediaCacheEntry>> {
        let Some(mut entry) = self.store.get_media_by_url(url).await? else {
            return Ok(None);
        };

        let now = now_millis();
        let file_present = tokio::fs::try_exists(&entry.local_path)
            .await
            .unwrap_or(false);
        if entry.is_expired(now) || !file_present {
            tracing::debug!("Dropping stale cache entry for {url}");
            self.remove_entry(state, &entry).await?;
            return Ok(None);
        }

        self.store.touch_media_entry(&entry.id, now).await?;
        entry.last_accessed = now;
        entry.access_count += 1;
        tracing::debug!("Cache hit for {url}");
        Ok(Some(entry))
    }

    /// Purge expired entries, then evict down to the target usage.
    /// Returns the number of entries removed.
    pub async fn optimize(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        let expired = self.remove_expired(&mut state).await?;
        let evicted = self
            .evict_to(&mut state, self.config.target_bytes(), None)
            .await?;
        Ok(expired + evicted)
    }

    pub async fn cleanup_expired(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        self.remove_expired(&mut state).await
    }

    /// Remove every temporary entry.
    pub async fn clear_temporary(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        let entries = self.store.list_temporary_media().await?;
        self.remove_all(&mut state, &entries).await
    }

    /// Remove the entry for `url`. Returns whether one existed.
    pub async fn evict_url(&self, url: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        match self.store.get_media_by_url(url).await? {
            Some(entry) => {
                self.remove_entry(&mut state, &entry).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove every entry recorded for `owner_id`.
    pub async fn evict_owner(&self, owner_id: &str) -> Result<u64> {
        let mut state = self.state.lock().await;
        let entries = self.store.list_media_by_owner(owner_id).await?;
        self.remove_all(&mut state, &entries).await
    }

    pub async fn clear_all(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        let entries = self.store.list_media_entries().await?;
        let removed = self.remove_all(&mut state, &entries).await?;
        state.current_size = self.store.total_media_size().await?;
        Ok(removed)
    }

    #[allow(clippy::cast_precision_loss)]
    pub async fn stats(&self) -> Result<MediaCacheStats> {
        let state = self.state.lock().await;
        let entries = self.store.list_media_entries().await?;
        let now = now_millis();
        let count = |predicate: &dyn Fn(&MediaCacheEntry) -> bool| {
            entries.iter().filter(|entry| predicate(entry)).count() as u64
        };

        let max_size = self.config.max_cache_bytes();
        Ok(MediaCacheStats {
            entry_count: entries.len() as u64,
            total_size: state.current_size,
            max_size,
            usage_ratio: if max_size > 0 {
                state.current_size as f64 / max_size as f64
            } else {
                0.0
            },
            expired_count: count(&|entry| entry.is_expired(now)),
            temporary_count: count(&|entry| entry.is_temporary),
            essential_count: count(&|entry| entry.is_essential),
        })
    }

    async fn remove_expired(&self, state: &mut CacheState) -> Result<u64> {
        let entries = self.store.list_expired_media(now_millis()).await?;
        self.remove_all(state, &entries).await
    }

    /// Evict lowest-score entries until usage is at most `target`.
    ///
    /// Essential entries are only considered when `evict_essential` is set,
    /// and then only once every other entry is gone.
    async fn evict_to(
        &self,
        state: &mut CacheState,
        target: i64,
        protect: Option<&MediaEntryId>,
    ) -> Result<u64> {
        if state.current_size <= target {
            return Ok(0);
        }

        let now = now_millis();
        let mut candidates = self
            .store
            .list_media_entries()
            .await?
            .into_iter()
            .filter(|entry| Some(&entry.id) != protect)
            .filter(|entry| self.config.evict_essential || !entry.is_essential)
            .map(|entry| (priority_score(&entry, now), entry))
            .collect::<Vec<_>>();
        candidates.sort_by(|(a_score, a), (b_score, b)| {
            a.is_essential
                .cmp(&b.is_essential)
                .then_with(|| a_score.partial_cmp(b_score).unwrap_or(Ordering::Equal))
        });

        let mut evicted = 0;
        for (score, entry) in candidates {
            if state.current_size <= target {
                break;
            }
            tracing::debug!(
                "Evicting {} (score {score:.1}, {} bytes)",
                entry.original_url,
                entry.file_size
            );
            self.remove_entry(state, &entry).await?;
            evicted += 1;
        }

        if state.current_size > target {
            tracing::warn!(
                "Media cache still at {} bytes after eviction (target {target})",
                state.current_size
            );
        }
        Ok(evicted)
    }

    async fn remove_all(&self, state: &mut CacheState, entries: &[MediaCacheEntry]) -> Result<u64> {
        for entry in entries {
            self.remove_entry(state, entry).await?;
        }
        Ok(entries.len() as u64)
    }

    async fn remove_entry(&self, state: &mut CacheState, entry: &MediaCacheEntry) -> Result<()> {
        remove_file(Path::new(&entry.local_path)).await?;
        if self.store.remove_media_entry(&entry.id).await? {
            state.current_size = (state.current_size - entry.file_size).max(0);
        }
        Ok(())
    }
}

async fn remove_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;
    use std::time::Instant;
    use tempfile::{tempdir, TempDir};

    const KB: usize = 1024;

    #[derive(Default)]
    struct FakeFetcher {
        assets: HashMap<String, usize>,
        delays: HashMap<String, Duration>,
        calls: AtomicUsize,
    }

    impl FakeFetcher {
        fn with(assets: &[(&str, usize)]) -> Self {
            Self {
                assets: assets
                    .iter()
                    .map(|(url, size)| ((*url).to_string(), *size))
                    .collect(),
                delays: HashMap::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn with_delay(mut self, url: &str, delay: Duration) -> Self {
            self.delays.insert(url.to_string(), delay);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(AtomicOrdering::SeqCst)
        }
    }

    impl AssetFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedAsset> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if let Some(delay) = self.delays.get(url) {
                tokio::time::sleep(*delay).await;
            }
            let size = self
                .assets
                .get(url)
                .ok_or_else(|| Error::Transport(format!("404 for {url}")))?;
            Ok(FetchedAsset {
                bytes: vec![7; *size],
                mime_type: "image/png".to_string(),
            })
        }
    }

    fn url(name: &str) -> String {
        format!("https://cdn.example.com/{name}.png")
    }

    async fn open_cache(
        assets: &[(&str, usize)],
        config: MediaCacheConfig,
    ) -> (MediaCache<FakeFetcher>, TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let config = MediaCacheConfig {
            cache_dir: Some(dir.path().join("media")),
            ..config
        };
        let owned = assets
            .iter()
            .map(|(name, size)| (url(name), *size))
            .collect::<Vec<_>>();
        let borrowed = owned
            .iter()
            .map(|(url, size)| (url.as_str(), *size))
            .collect::<Vec<_>>();
        let cache = MediaCache::open(store, FakeFetcher::with(&borrowed), config)
            .await
            .unwrap();
        (cache, dir)
    }

    fn one_mb_budget() -> MediaCacheConfig {
        MediaCacheConfig {
            max_cache_size_mb: 1,
            ..MediaCacheConfig::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_miss_then_hit() {
        let (cache, _dir) = open_cache(&[("a", 10)], MediaCacheConfig::default()).await;

        let fetched = cache.get(&url("a"), FetchOptions::default()).await.unwrap();
        assert_eq!(fetched.file_size, 10);
        assert!(fetched.local_path.ends_with(".png"));
        assert!(Path::new(&fetched.local_path).exists());

        let hit = cache.get(&url("a"), FetchOptions::default()).await.unwrap();
        assert_eq!(hit.id, fetched.id);
        assert_eq!(hit.access_count, 2);
        assert_eq!(cache.fetcher.calls(), 1);
        assert_eq!(cache.current_size().await, 10);

        assert!(cache.lookup(&url("missing")).await.unwrap().is_none());
        assert_eq!(cache.fetcher.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_expired_and_dangling_entries_are_refetched() {
        let (cache, _dir) = open_cache(&[("a", 10), ("b", 10)], MediaCacheConfig::default()).await;

        let expiring = FetchOptions {
            ttl: Some(Duration::ZERO),
            ..FetchOptions::default()
        };
        let first = cache.get(&url("a"), expiring).await.unwrap();
        let second = cache.get(&url("a"), FetchOptions::default()).await.unwrap();
        assert_ne!(first.id, second.id);
        assert!(!Path::new(&first.local_path).exists());

        let b = cache.get(&url("b"), FetchOptions::default()).await.unwrap();
        std::fs::remove_file(&b.local_path).unwrap();
        assert!(cache.lookup(&url("b")).await.unwrap().is_none());

        assert_eq!(cache.fetcher.calls(), 3);
        assert_eq!(cache.current_size().await, 10);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_oversized_asset_is_rejected_before_writing() {
        let config = MediaCacheConfig {
            max_cache_size_mb: 4,
            max_file_size_mb: 1,
            ..MediaCacheConfig::default()
        };
        let (cache, _dir) = open_cache(&[("big", 2 * KB * KB)], config).await;

        let result = cache.get(&url("big"), FetchOptions::default()).await;
        assert!(matches!(result, Err(Error::QuotaExceeded(_))));
        assert_eq!(std::fs::read_dir(cache.cache_dir()).unwrap().count(), 0);
        assert_eq!(cache.current_size().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_eviction_skips_essential_entries() {
        let (cache, _dir) = open_cache(
            &[("essential", 400 * KB), ("normal", 400 * KB), ("new", 400 * KB)],
            one_mb_budget(),
        )
        .await;

        cache
            .get(
                &url("essential"),
                FetchOptions {
                    is_essential: true,
                    priority: CachePriority::Low,
                    ..FetchOptions::default()
                },
            )
            .await
            .unwrap();
        cache
            .get(
                &url("normal"),
                FetchOptions {
                    priority: CachePriority::Critical,
                    ..FetchOptions::default()
                },
            )
            .await
            .unwrap();
        cache.get(&url("new"), FetchOptions::default()).await.unwrap();

        let mut remaining = cache
            .store
            .list_media_entries()
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.original_url)
            .collect::<Vec<_>>();
        remaining.sort();
        assert_eq!(remaining, vec![url("essential"), url("new")]);
        assert_eq!(cache.current_size().await, (800 * KB) as i64);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_quota_exceeded_when_only_essentials_remain() {
        let (cache, _dir) = open_cache(&[("keep", 600 * KB), ("new", 600 * KB)], one_mb_budget()).await;

        let essential = FetchOptions {
            is_essential: true,
            ..FetchOptions::default()
        };
        cache.get(&url("keep"), essential).await.unwrap();

        let result = cache.get(&url("new"), FetchOptions::default()).await;
        assert!(matches!(result, Err(Error::QuotaExceeded(_))));
        assert!(cache.lookup(&url("new")).await.unwrap().is_none());
        assert!(cache.lookup(&url("keep")).await.unwrap().is_some());
        assert_eq!(cache.current_size().await, (600 * KB) as i64);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_essential_entries_go_last_when_allowed() {
        let config = MediaCacheConfig {
            evict_essential: true,
            ..one_mb_budget()
        };
        let (cache, _dir) = open_cache(
            &[("keep", 300 * KB), ("plain", 300 * KB), ("big", 700 * KB)],
            config,
        )
        .await;

        let essential = FetchOptions {
            is_essential: true,
            ..FetchOptions::default()
        };
        cache.get(&url("keep"), essential).await.unwrap();
        cache.get(&url("plain"), FetchOptions::default()).await.unwrap();
        cache.get(&url("big"), FetchOptions::default()).await.unwrap();

        // 1300 KB over a 1024 KB budget: dropping "plain" reaches 1000 KB,
        // still above the 819 KB target, so "keep" goes too
        assert!(cache.lookup(&url("plain")).await.unwrap().is_none());
        assert!(cache.lookup(&url("keep")).await.unwrap().is_none());
        assert!(cache.lookup(&url("big")).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bulk_removals() {
        let (cache, _dir) = open_cache(
            &[("t1", 10), ("t2", 10), ("o1", 20), ("o2", 20), ("x", 5)],
            MediaCacheConfig::default(),
        )
        .await;

        let temporary = FetchOptions {
            is_temporary: true,
            ..FetchOptions::default()
        };
        let owned = FetchOptions {
            owner_id: Some("note-1".to_string()),
            ..FetchOptions::default()
        };
        cache.get(&url("t1"), temporary.clone()).await.unwrap();
        cache.get(&url("t2"), temporary).await.unwrap();
        cache.get(&url("o1"), owned.clone()).await.unwrap();
        let o2 = cache.get(&url("o2"), owned).await.unwrap();
        cache.get(&url("x"), FetchOptions::default()).await.unwrap();
        assert_eq!(o2.owner_id(), Some("note-1"));

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entry_count, 5);
        assert_eq!(stats.temporary_count, 2);
        assert_eq!(stats.total_size, 65);

        assert_eq!(cache.clear_temporary().await.unwrap(), 2);
        assert_eq!(cache.evict_owner("note-1").await.unwrap(), 2);
        assert_eq!(cache.current_size().await, 5);

        assert!(cache.evict_url(&url("x")).await.unwrap());
        assert!(!cache.evict_url(&url("x")).await.unwrap());
        assert_eq!(cache.clear_all().await.unwrap(), 0);
        assert_eq!(cache.current_size().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_optimize_purges_expired_then_trims_to_target() {
        let (cache, _dir) = open_cache(&[("old", 10), ("fresh", 10)], MediaCacheConfig::default()).await;

        cache
            .get(
                &url("old"),
                FetchOptions {
                    ttl: Some(Duration::ZERO),
                    ..FetchOptions::default()
                },
            )
            .await
            .unwrap();
        cache.get(&url("fresh"), FetchOptions::default()).await.unwrap();
        assert_eq!(cache.stats().await.unwrap().expired_count, 1);

        assert_eq!(cache.optimize().await.unwrap(), 1);
        assert_eq!(cache.current_size().await, 10);
        assert_eq!(cache.cleanup_expired().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_recomputes_usage() {
        let dir = tempdir().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let config = MediaCacheConfig {
            cache_dir: Some(dir.path().to_path_buf()),
            ..MediaCacheConfig::default()
        };
        let asset = url("a");

        let cache = MediaCache::open(
            store.clone(),
            FakeFetcher::with(&[(asset.as_str(), 42)]),
            config.clone(),
        )
        .await
        .unwrap();
        cache.get(&asset, FetchOptions::default()).await.unwrap();
        drop(cache);

        let reopened = MediaCache::open(store, FakeFetcher::default(), config)
            .await
            .unwrap();
        assert_eq!(reopened.current_size().await, 42);
        assert!(reopened.lookup(&asset).await.unwrap().is_some());
    }

    #[test]
    fn test_priority_score_orders_tiers_and_essentials() {
        let base = MediaCacheEntry {
            id: MediaEntryId::new(),
            original_url: url("a"),
            local_path: "/tmp/a.png".to_string(),
            mime_type: "image/png".to_string(),
            file_size: 1,
            cached_at: 0,
            last_accessed: 0,
            access_count: 0,
            is_temporary: false,
            expires_at: None,
            priority: CachePriority::Low,
            is_essential: false,
            metadata: Payload::new(),
        };
        // Fresh, never accessed, Low tier: 10 + 0 + 100
        assert!((priority_score(&base, 0) - 110.0).abs() < 1e-9);

        let busy = MediaCacheEntry {
            access_count: 500,
            ..base.clone()
        };
        assert!((priority_score(&busy, 0) - 360.0).abs() < 1e-9);

        let essential = MediaCacheEntry {
            is_essential: true,
            ..base.clone()
        };
        assert!(priority_score(&essential, 0) > priority_score(&busy, 0));

        let idle = priority_score(&base, 3 * 3_600_000);
        assert!((idle - 35.0).abs() < 1e-9);
    }

    async fn open_slow_cache(dir: &TempDir) -> Arc<MediaCache<FakeFetcher>> {
        let store = Store::open_in_memory().await.unwrap();
        let config = MediaCacheConfig {
            cache_dir: Some(dir.path().join("media")),
            ..MediaCacheConfig::default()
        };
        let (fast, slow) = (url("fast"), url("slow"));
        let fetcher = FakeFetcher::with(&[(fast.as_str(), 10), (slow.as_str(), 20)])
            .with_delay(&slow, Duration::from_millis(400));
        Arc::new(MediaCache::open(store, fetcher, config).await.unwrap())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hits_are_served_during_a_slow_download() {
        let dir = tempdir().unwrap();
        let cache = open_slow_cache(&dir).await;
        cache.get(&url("fast"), FetchOptions::default()).await.unwrap();

        let background = Arc::clone(&cache);
        let download =
            tokio::spawn(async move { background.get(&url("slow"), FetchOptions::default()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        assert!(cache.lookup(&url("fast")).await.unwrap().is_some());
        assert!(cache.stats().await.unwrap().entry_count >= 1);
        assert!(started.elapsed() < Duration::from_millis(200));

        let slow = download.await.unwrap().unwrap();
        assert_eq!(slow.file_size, 20);
        assert_eq!(cache.current_size().await, 30);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_misses_cache_one_copy() {
        let dir = tempdir().unwrap();
        let cache = open_slow_cache(&dir).await;

        let (url_a, url_b) = (url("slow"), url("slow"));
        let (first, second) = tokio::join!(
            cache.get(&url_a, FetchOptions::default()),
            cache.get(&url_b, FetchOptions::default())
        );
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.id, second.id);
        assert_eq!(cache.fetcher.calls(), 2);

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.total_size, 20);
        assert_eq!(std::fs::read_dir(cache.cache_dir()).unwrap().count(), 1);
    }
}
