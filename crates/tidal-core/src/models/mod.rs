//! Data models for Tidal

mod conflict;
mod media;
mod mutation;
mod record;
mod session;

pub use conflict::{ConflictId, ResolutionStrategy, SyncConflict};
pub use media::{CachePriority, MediaCacheEntry, MediaEntryId, OWNER_ID_KEY};
pub use mutation::{MutationId, Operation, PendingMutation, SyncStatus};
pub use record::SyncedRecord;
pub use session::{SessionId, SessionStatus, SyncSession, SyncStats};

/// Opaque record payload. Field semantics belong to the application.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Declares a UUID v7 identifier newtype (time-sortable).
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new unique ID using UUID v7
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Get the string representation of this ID
            #[must_use]
            pub fn as_str(&self) -> String {
                self.0.to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

pub(crate) use uuid_id;
