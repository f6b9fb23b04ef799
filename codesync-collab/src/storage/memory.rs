//! Process-local session store, used when no storage path is configured.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{PersistedSession, SessionStore, StoreError};

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, PersistedSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record, as if a previous room had been persisted.
    pub fn insert(&self, record: PersistedSession) {
        self.sessions().insert(record.id.clone(), record);
    }

    pub fn get(&self, room_id: &str) -> Option<PersistedSession> {
        self.sessions().get(room_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, PersistedSession>> {
        // Every critical section is a single map call; poisoning leaves no torn state.
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, room_id: &str) -> Result<Option<PersistedSession>, StoreError> {
        Ok(self.get(room_id))
    }

    fn save(&self, room_id: &str, document: &str, language: &str) -> Result<PersistedSession, StoreError> {
        let record = PersistedSession::new(room_id, document, language);
        self.insert(record.clone());
        Ok(record)
    }
}
