//! Error types for tidal-core

use thiserror::Error;

use crate::remote::RemoteRecord;

/// Result type alias using tidal-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tidal-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Referenced mutation, conflict, session or cache entry is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local persistence (database or cache files) failed
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Remote call failed (network, timeout, non-2xx)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Remote holds a newer version than the one the write was based on.
    ///
    /// Carries the remote's current record so the conflict detector can run.
    #[error("Version conflict on {table}/{record_id} (remote version {})", remote.version)]
    VersionConflict {
        table: String,
        record_id: String,
        remote: Box<RemoteRecord>,
    },

    /// Manual resolution payload is incomplete
    #[error("Validation error: {0}")]
    Validation(String),

    /// Asset too large for the cache, even after eviction
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<libsql::Error> for Error {
    fn from(error: libsql::Error) -> Self {
        Self::StorageUnavailable(error.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::StorageUnavailable(error.to_string())
    }
}

impl Error {
    /// Whether this error came from the local store rather than the remote side.
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_storage_unavailable() {
        let error: Error = std::io::Error::other("disk gone").into();
        assert!(error.is_storage());
        assert!(error.to_string().contains("disk gone"));
    }

    #[test]
    fn version_conflict_message_names_record() {
        let error = Error::VersionConflict {
            table: "notes".to_string(),
            record_id: "n1".to_string(),
            remote: Box::new(RemoteRecord {
                record_id: "n1".to_string(),
                version: 7,
                payload: serde_json::Map::new(),
            }),
        };
        assert_eq!(
            error.to_string(),
            "Version conflict on notes/n1 (remote version 7)"
        );
        assert!(!error.is_storage());
    }
}
