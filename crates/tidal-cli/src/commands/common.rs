use std::env;
use std::path::PathBuf;

use serde::Serialize;
use tidal_core::media::HttpAssetFetcher;
use tidal_core::models::{SyncConflict, SyncSession};
use tidal_core::remote::HttpRemote;
use tidal_core::{EngineConfig, MediaCache, Payload, Store, SyncEngine};

use crate::error::CliError;

/// Paths every command resolves against
#[derive(Debug, Clone)]
pub struct CliContext {
    pub db_path: PathBuf,
    pub config_path: PathBuf,
}

impl CliContext {
    pub fn resolve(db_path: Option<PathBuf>, config_path: Option<PathBuf>) -> Self {
        Self {
            db_path: db_path
                .or_else(|| env::var_os("TIDAL_DB_PATH").map(PathBuf::from))
                .unwrap_or_else(default_db_path),
            config_path: config_path
                .or_else(|| env::var_os("TIDAL_CONFIG").map(PathBuf::from))
                .unwrap_or_else(default_config_path),
        }
    }

    /// Config file merged with environment overrides
    pub fn load_config(&self) -> Result<EngineConfig, CliError> {
        let mut config = EngineConfig::load_from_path(&self.config_path)?;
        config.apply_env()?;
        if config.media.cache_dir.is_none() {
            config.media.cache_dir = Some(default_cache_dir());
        }
        Ok(config)
    }

    pub async fn open_store(&self) -> Result<Store, CliError> {
        tracing::debug!("Opening store at {}", self.db_path.display());
        Ok(Store::open_path(self.db_path.clone()).await?)
    }

    /// Engine for a one-shot command: no background scheduling.
    pub async fn open_engine(&self) -> Result<SyncEngine<HttpRemote>, CliError> {
        let config = self.load_config()?;
        let mut sync = config.sync;
        sync.auto_sync = false;
        let store = self.open_store().await?;
        Ok(SyncEngine::from_config(store, sync).await?)
    }

    pub async fn open_cache(&self) -> Result<MediaCache<HttpAssetFetcher>, CliError> {
        let config = self.load_config()?;
        let store = self.open_store().await?;
        let fetcher = HttpAssetFetcher::new(config.sync.request_timeout())?;
        Ok(MediaCache::open(store, fetcher, config.media).await?)
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tidal")
        .join("tidal.db")
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tidal")
        .join("config.json")
}

pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tidal")
        .join("media")
}

/// Parse a JSON object given on the command line.
pub fn parse_payload(raw: &str) -> Result<Payload, CliError> {
    let value: serde_json::Value = serde_json::from_str(raw.trim())
        .map_err(|error| CliError::InvalidPayload(error.to_string()))?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(CliError::InvalidPayload(format!(
            "expected an object, got {other}"
        ))),
    }
}

pub fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_lines(lines: &[String], empty_message: &str) {
    if lines.is_empty() {
        println!("{empty_message}");
    }
    for line in lines {
        println!("{line}");
    }
}

pub fn format_session_lines(sessions: &[SyncSession]) -> Vec<String> {
    sessions
        .iter()
        .map(|session| {
            let id = session.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            format!(
                "{short_id:<13}  {}  {:<7}  {}/{} processed  conflicts={} errors={}",
                format_sync_timestamp(session.started_at),
                session.status,
                session.records_processed,
                session.records_total,
                session.conflicts_detected,
                session.errors_encountered
            )
        })
        .collect()
}

pub fn format_conflict_lines(conflicts: &[SyncConflict], now_ms: i64) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {}/{}  fields={}  {}",
                conflict.id,
                conflict.table_name,
                conflict.record_id,
                conflict.conflicting_fields.join(","),
                format_relative_time(conflict.detected_at, now_ms)
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes.max(0) as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
