//! Engine configuration.
//!
//! `EngineConfig` is loaded from a JSON file (a missing file yields defaults)
//! and can be overridden from environment variables before the engine is built.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::ResolutionStrategy;
use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

pub const DEFAULT_MAX_SYNC_RETRIES: u32 = 3;
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_DEBOUNCE_DELAY_MS: u64 = 5_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_CACHE_SIZE_MB: u64 = 500;
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 50;
pub const DEFAULT_TARGET_USAGE_RATIO: f64 = 0.8;

pub const ENV_REMOTE_URL: &str = "TIDAL_REMOTE_URL";
pub const ENV_REMOTE_TOKEN: &str = "TIDAL_REMOTE_TOKEN";
pub const ENV_MAX_SYNC_RETRIES: &str = "TIDAL_MAX_SYNC_RETRIES";
pub const ENV_CACHE_MAX_MB: &str = "TIDAL_CACHE_MAX_MB";

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub sync: SyncConfig,
    pub media: MediaCacheConfig,
}

/// Sync orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Base URL of the HTTP remote; `None` runs the engine local-only
    pub remote_url: Option<String>,
    /// Bearer token passed through to the remote as-is
    pub remote_token: Option<String>,
    pub max_sync_retries: u32,
    pub sync_interval_secs: u64,
    pub debounce_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub auto_sync: bool,
    /// Leave detected conflicts open instead of applying `default_strategy`
    pub manual_resolution: bool,
    pub default_strategy: ResolutionStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            remote_token: None,
            max_sync_retries: DEFAULT_MAX_SYNC_RETRIES,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            debounce_delay_ms: DEFAULT_DEBOUNCE_DELAY_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            auto_sync: true,
            manual_resolution: false,
            default_strategy: ResolutionStrategy::AutomaticMerge,
        }
    }
}

impl SyncConfig {
    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub const fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reject sync settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.remote_url {
            if !is_http_url(url.trim()) {
                return Err(Error::InvalidInput(
                    "sync.remote_url must include http:// or https://".to_string(),
                ));
            }
        }
        if self.sync_interval_secs == 0 {
            return Err(Error::InvalidInput(
                "sync.sync_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Media cache budget and eviction settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MediaCacheConfig {
    /// Directory for cached files; defaults to the platform cache dir
    pub cache_dir: Option<PathBuf>,
    pub max_cache_size_mb: u64,
    /// Eviction stops once usage is at or below this share of the budget
    pub target_usage_ratio: f64,
    pub max_file_size_mb: u64,
    /// Lifetime applied to entries fetched without an explicit TTL
    pub default_ttl_secs: Option<u64>,
    /// Allow essential entries to be evicted once nothing else is left
    pub evict_essential: bool,
}

impl Default for MediaCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            max_cache_size_mb: DEFAULT_MAX_CACHE_SIZE_MB,
            target_usage_ratio: DEFAULT_TARGET_USAGE_RATIO,
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            default_ttl_secs: None,
            evict_essential: false,
        }
    }
}

impl MediaCacheConfig {
    /// Total budget in bytes
    pub fn max_cache_bytes(&self) -> i64 {
        mb_to_bytes(self.max_cache_size_mb)
    }

    /// Largest single asset accepted, never above the total budget
    pub fn max_file_bytes(&self) -> i64 {
        mb_to_bytes(self.max_file_size_mb).min(self.max_cache_bytes())
    }

    /// Usage eviction drives down to
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn target_bytes(&self) -> i64 {
        (self.max_cache_bytes() as f64 * self.target_usage_ratio) as i64
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }
}

fn mb_to_bytes(mb: u64) -> i64 {
    i64::try_from(mb.saturating_mul(BYTES_PER_MB)).unwrap_or(i64::MAX)
}

impl EngineConfig {
    /// Load configuration from a JSON file. A missing file yields defaults.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|error| {
            Error::InvalidInput(format!("Invalid config file {}: {error}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty JSON, creating parent directories.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = normalize_text_option(lookup(ENV_REMOTE_URL)) {
            self.sync.remote_url = Some(url);
        }
        if let Some(token) = normalize_text_option(lookup(ENV_REMOTE_TOKEN)) {
            self.sync.remote_token = Some(token);
        }
        if let Some(raw) = normalize_text_option(lookup(ENV_MAX_SYNC_RETRIES)) {
            self.sync.max_sync_retries = parse_number(ENV_MAX_SYNC_RETRIES, &raw)?;
        }
        if let Some(raw) = normalize_text_option(lookup(ENV_CACHE_MAX_MB)) {
            self.media.max_cache_size_mb = parse_number(ENV_CACHE_MAX_MB, &raw)?;
        }
        self.validate()
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.sync.validate()?;
        if self.media.max_cache_size_mb == 0 {
            return Err(Error::InvalidInput(
                "media.max_cache_size_mb must be positive".to_string(),
            ));
        }
        if !(self.media.target_usage_ratio > 0.0 && self.media.target_usage_ratio <= 1.0) {
            return Err(Error::InvalidInput(
                "media.target_usage_ratio must be in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::InvalidInput(format!("{key} must be a non-negative integer, got '{raw}'")))
}
