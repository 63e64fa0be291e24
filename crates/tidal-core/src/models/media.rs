//! Media cache entry model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{uuid_id, Payload};
use crate::error::Error;

uuid_id! {
    /// A unique identifier for a cached asset
    MediaEntryId
}

/// Metadata key holding the logical owner/context id of an asset.
pub const OWNER_ID_KEY: &str = "owner_id";

/// Coarse eviction priority tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CachePriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl CachePriority {
    /// Fixed score weight of the tier
    pub const fn weight(self) -> f64 {
        match self {
            Self::Low => 10.0,
            Self::Normal => 25.0,
            Self::High => 50.0,
            Self::Critical => 100.0,
        }
    }

    /// Stable string form used in the database
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for CachePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CachePriority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(Error::InvalidInput(format!(
                "Unknown cache priority: {other}"
            ))),
        }
    }
}

/// A locally materialized copy of a remote binary asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCacheEntry {
    pub id: MediaEntryId,
    /// Sole external identity of the asset
    pub original_url: String,
    /// Path of the backing file
    pub local_path: String,
    pub mime_type: String,
    /// Size of the backing file in bytes
    pub file_size: i64,
    /// Fetch timestamp (Unix ms)
    pub cached_at: i64,
    /// Last hit (Unix ms)
    pub last_accessed: i64,
    pub access_count: i64,
    /// Wiped by bulk temporary cleanup
    pub is_temporary: bool,
    /// Expiry (Unix ms); `None` never time-expires
    pub expires_at: Option<i64>,
    pub priority: CachePriority,
    /// Survives eviction under the default policy
    pub is_essential: bool,
    pub metadata: Payload,
}

impl MediaCacheEntry {
    /// Whether the entry has passed its expiry at `now`
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// Logical owner/context id, if recorded in metadata
    pub fn owner_id(&self) -> Option<&str> {
        self.metadata.get(OWNER_ID_KEY).and_then(|value| value.as_str())
    }
}
