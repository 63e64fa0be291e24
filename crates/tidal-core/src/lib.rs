//! tidal-core - Core library for Tidal
//!
//! Offline-first record sync: a durable mutation queue, three-way conflict
//! detection and resolution, sync sessions against a pluggable remote, and a
//! bounded media cache. Front-ends talk to [`SyncEngine`].

pub mod config;
pub mod conflict;
pub mod db;
pub mod engine;
pub mod error;
pub mod media;
pub mod models;
pub mod remote;
pub mod store;
pub mod sync;
pub mod util;

pub use config::{EngineConfig, MediaCacheConfig, SyncConfig};
pub use engine::{BackendKind, LocalBackend, SyncBackend, SyncEngine, SyncStatusReport};
pub use error::{Error, Result};
pub use media::{FetchOptions, MediaCache, MediaCacheStats};
pub use models::{Operation, Payload, PendingMutation, ResolutionStrategy, SyncConflict};
pub use store::Store;
pub use sync::SyncOrchestrator;
