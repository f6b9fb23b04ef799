//! Durable storage for room state.
//!
//! Storage is touched at exactly two points of a room's life:
//!
//! ```text
//!   first join ──► load(room_id) ──► live room (memory only) ──► last leave ──► save(...)
//! ```
//!
//! Edits never reach storage while a room is live. Implementations are
//! blocking; the session layer calls them through `spawn_blocking`.

pub mod memory;
pub mod rocks;

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemorySessionStore;
pub use rocks::{RocksSessionStore, StoreConfig};

/// Durable counterpart of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub id: String,
    pub document: String,
    pub language: String,
    /// Seconds since the Unix epoch.
    pub updated_at: u64,
}

impl PersistedSession {
    pub fn new(id: impl Into<String>, document: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            document: document.into(),
            language: language.into(),
            updated_at: unix_now(),
        }
    }
}

/// Load-by-id / save contract used at room birth and room death.
pub trait SessionStore: Send + Sync + 'static {
    /// Fetch the persisted state of `room_id`, if any.
    fn load(&self, room_id: &str) -> Result<Option<PersistedSession>, StoreError>;

    /// Write the final state of `room_id`, replacing any previous record.
    fn save(&self, room_id: &str, document: &str, language: &str) -> Result<PersistedSession, StoreError>;
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// RocksDB internal error
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Compression error: {0}")]
    Compression(String),
    /// Store refused the operation (closed, read-only, injected failure)
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
