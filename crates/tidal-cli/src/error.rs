use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tidal_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Payload must be a JSON object: {0}")]
    InvalidPayload(String),
    #[error("Invalid conflict ID: {0}")]
    InvalidConflictId(String),
    #[error("Manual merge requires --payload")]
    MissingManualPayload,
    #[error("Configuration error: {0}")]
    Config(String),
}
