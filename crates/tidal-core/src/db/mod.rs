//! Database layer for Tidal

mod connection;
mod conflict_repository;
mod media_repository;
mod migrations;
mod mutation_repository;
mod record_repository;
mod session_repository;

pub use connection::Database;
pub(crate) use connection::in_transaction;
pub use conflict_repository::{ConflictRepository, LibSqlConflictRepository};
pub use media_repository::{LibSqlMediaRepository, MediaRepository};
pub use mutation_repository::{LibSqlMutationRepository, MutationRepository};
pub use record_repository::{LibSqlRecordRepository, RecordRepository};
pub use session_repository::{LibSqlSessionRepository, SessionRepository};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Serialize a value into the JSON text stored in a column
fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Parse a JSON text column
fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}

/// SQLite stores counters as i64
fn to_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value.max(0)).unwrap_or_default()
}

/// Render a fixed set of internal status strings as a SQL `IN` list
fn sql_in_list<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    let quoted = values
        .into_iter()
        .map(|value| format!("'{value}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("({quoted})")
}
