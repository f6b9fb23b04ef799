//! Connection lifecycle around a room: join, receive, leave.
//!
//! ```text
//!  join ──► registry.get_or_create ──► first? ──► store.load ──► snapshot ──► presence
//!  recv ──► room lock ──► apply patch / language ──► relay to others
//!  leave ──► room lock ──► remove ──► empty? ──► evict + store.save
//!                                      └─────► presence to the rest
//! ```
//!
//! Storage is only touched at the two boundary transitions and always through
//! `spawn_blocking`. Every mutation of a room happens under its lock together
//! with the broadcast it triggers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::broadcast::{ConnectionHandle, ConnectionId};
use crate::patch::apply_edit;
use crate::protocol::{Frame, SyncMessage};
use crate::registry::{Room, RoomEntry, RoomId, RoomRegistry, RoomState};
use crate::storage::{PersistedSession, SessionStore, StoreError};

/// The `(room, user)` pair a connection is bound to for its whole life.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub room_id: RoomId,
    pub user_id: String,
}

impl Identity {
    pub fn new(room_id: impl Into<RoomId>, user_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("Failed to hydrate room {room_id}: {source}")]
    Hydration {
        room_id: RoomId,
        #[source]
        source: StoreError,
    },
}

/// What [`SessionManager::receive`] did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Room state changed and the frame was relayed to `relayed` peers.
    Updated { relayed: usize },
    /// Room state unchanged; the frame was still relayed.
    Relayed { relayed: usize },
    /// Malformed, or the connection is not joined. Nothing was relayed.
    Dropped,
}

/// What [`SessionManager::leave`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The connection was not in the room.
    NotMember,
    /// Others remain; they received a presence update.
    Remaining(usize),
    /// Last connection gone; the final state was saved.
    Persisted,
    /// Last connection gone; the save failed and the state was discarded.
    PersistFailed,
    /// The room was already closed by shutdown; nothing was broadcast or saved.
    Closed,
}

/// Hydration/persistence counters.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub rooms_hydrated: u64,
    pub rooms_persisted: u64,
    pub persist_failures: u64,
}

/// Owns the room registry and the store handle; one per server.
pub struct SessionManager {
    registry: RoomRegistry,
    store: Arc<dyn SessionStore>,
    rooms_hydrated: AtomicU64,
    rooms_persisted: AtomicU64,
    persist_failures: AtomicU64,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, default_language: impl Into<String>) -> Self {
        Self {
            registry: RoomRegistry::new(default_language),
            store,
            rooms_hydrated: AtomicU64::new(0),
            rooms_persisted: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Join `handle` to the room named by `identity`.
    ///
    /// The first connection of a room hydrates it from the store; later ones
    /// read the live state. The joiner then gets `INITIAL_CODE_STATE` and
    /// everyone, joiner included, gets `USER_LIST_UPDATE`.
    pub async fn join(&self, identity: &Identity, handle: ConnectionHandle) -> Result<Arc<Room>, JoinError> {
        loop {
            match self.registry.get_or_create(&identity.room_id).await {
                RoomEntry::Created { room, mut guard, retiring } => {
                    if let Some(previous) = retiring {
                        // Holding the old room's lock means its final save is done.
                        drop(previous.lock().await);
                    }

                    match self.load(&identity.room_id).await {
                        Ok(Some(record)) => {
                            log::info!(
                                "Hydrated room {} from storage ({} bytes, {})",
                                identity.room_id,
                                record.document.len(),
                                record.language
                            );
                            guard.document = record.document;
                            guard.language = record.language;
                        }
                        Ok(None) => {
                            log::info!(
                                "No stored state for room {}; starting empty ({})",
                                identity.room_id,
                                guard.language
                            );
                        }
                        Err(source) => {
                            log::error!("Failed to load room {}: {source}", identity.room_id);
                            self.registry.abandon(&room, &mut guard).await;
                            return Err(JoinError::Hydration {
                                room_id: identity.room_id.clone(),
                                source,
                            });
                        }
                    }
                    self.rooms_hydrated.fetch_add(1, Ordering::Relaxed);

                    Self::admit(&room, &mut guard, handle);
                    drop(guard);
                    return Ok(room);
                }
                RoomEntry::Existing(room) => {
                    let mut state = room.lock().await;
                    if state.is_closed() {
                        // Evicted between lookup and lock; the next lookup recreates it.
                        log::debug!("Room {} closed under joiner, retrying", identity.room_id);
                        continue;
                    }
                    Self::admit(&room, &mut state, handle);
                    drop(state);
                    return Ok(room);
                }
            }
        }
    }

    /// Handle one inbound text frame from `connection`.
    ///
    /// Content and language changes update the live state when they differ
    /// from it; any decodable frame is then relayed verbatim to the other
    /// connections of the room.
    pub async fn receive(&self, room: &Room, connection: ConnectionId, text: &str) -> ReceiveOutcome {
        let mut state = room.lock().await;
        if state.is_closed() || !state.has_connection(&connection) {
            log::warn!(
                "Dropping message for room {}: connection {connection} has no live membership",
                room.id()
            );
            return ReceiveOutcome::Dropped;
        }

        let message = match SyncMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Dropping malformed message in room {}: {e}", room.id());
                return ReceiveOutcome::Dropped;
            }
        };

        let changed = match &message {
            SyncMessage::CodeChangeUpdate { .. } => {
                let edit = match message.edit() {
                    Ok(edit) => edit,
                    Err(e) => {
                        log::warn!("Dropping unparseable edit in room {}: {e}", room.id());
                        return ReceiveOutcome::Dropped;
                    }
                };
                let updated = apply_edit(&state.document, &edit);
                if updated != state.document {
                    state.document = updated;
                    true
                } else {
                    false
                }
            }
            SyncMessage::LanguageChange { selected_language } => {
                if *selected_language != state.language {
                    log::debug!("Room {} language {} -> {selected_language}", room.id(), state.language);
                    state.language = selected_language.clone();
                    true
                } else {
                    false
                }
            }
            SyncMessage::InitialCodeState { .. }
            | SyncMessage::UserListUpdate { .. }
            | SyncMessage::Passthrough => false,
        };

        let relayed = state.broadcast(&Frame::from(text), Some(connection));
        log::trace!("Relayed {} from {connection} to {relayed} peers in room {}", message.kind(), room.id());

        if changed {
            ReceiveOutcome::Updated { relayed }
        } else {
            ReceiveOutcome::Relayed { relayed }
        }
    }

    /// Remove `connection` from `room`.
    ///
    /// The last leaver evicts the room and saves its final state while still
    /// holding the room lock, so a reconnect waits for the save.
    pub async fn leave(&self, room: &Arc<Room>, connection: ConnectionId) -> LeaveOutcome {
        let mut state = room.lock().await;
        let Some(handle) = state.remove_connection(&connection) else {
            return LeaveOutcome::NotMember;
        };
        log::info!(
            "User {} left room {} ({} connections remain)",
            handle.user_id(),
            room.id(),
            state.connection_count()
        );

        if state.is_closed() {
            return LeaveOutcome::Closed;
        }

        if !self.registry.remove_if_empty(room, &mut state).await {
            Self::broadcast_presence(room.id(), &state);
            return LeaveOutcome::Remaining(state.connection_count());
        }

        let outcome = if self.persist(room.id(), &state).await {
            LeaveOutcome::Persisted
        } else {
            LeaveOutcome::PersistFailed
        };
        drop(state);
        self.registry.release_retired(room).await;
        outcome
    }

    /// Evict and persist every live room. Returns how many were saved.
    pub async fn shutdown(&self) -> usize {
        let rooms = self.registry.drain_live().await;
        log::info!("Persisting {} live rooms before shutdown", rooms.len());

        let mut persisted = 0;
        for room in rooms {
            let mut state = room.lock().await;
            if state.is_closed() {
                continue;
            }
            state.close();
            if self.persist(room.id(), &state).await {
                persisted += 1;
            }
        }
        persisted
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            rooms_hydrated: self.rooms_hydrated.load(Ordering::Relaxed),
            rooms_persisted: self.rooms_persisted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }

    fn admit(room: &Room, state: &mut RoomState, handle: ConnectionHandle) {
        match SyncMessage::initial_code_state(state.document.as_str(), state.language.as_str()).to_frame() {
            Ok(frame) => {
                if let Err(e) = handle.send(frame) {
                    log::warn!("Failed to queue initial state for {} in room {}: {e}", handle.user_id(), room.id());
                }
            }
            Err(e) => log::error!("Failed to encode initial state for room {}: {e}", room.id()),
        }

        log::info!("User {} joined room {}", handle.user_id(), room.id());
        state.add_connection(handle);
        Self::broadcast_presence(room.id(), state);
    }

    fn broadcast_presence(room_id: &str, state: &RoomState) {
        match SyncMessage::user_list(state.present_users()).to_frame() {
            Ok(frame) => {
                state.broadcast(&frame, None);
            }
            Err(e) => log::error!("Failed to encode user list for room {room_id}: {e}"),
        }
    }

    /// Save `state` as the final record of `room_id`. Failures are logged and counted.
    async fn persist(&self, room_id: &str, state: &RoomState) -> bool {
        let store = self.store.clone();
        let id = room_id.to_string();
        let document = state.document.clone();
        let language = state.language.clone();

        let result = tokio::task::spawn_blocking(move || store.save(&id, &document, &language))
            .await
            .map_err(|e| StoreError::Unavailable(format!("storage task failed: {e}")))
            .and_then(|saved| saved);

        match result {
            Ok(record) => {
                self.rooms_persisted.fetch_add(1, Ordering::Relaxed);
                log::info!("Persisted room {room_id} ({} bytes)", record.document.len());
                true
            }
            Err(e) => {
                self.persist_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("Failed to persist room {room_id}, discarding its state: {e}");
                false
            }
        }
    }

    async fn load(&self, room_id: &str) -> Result<Option<PersistedSession>, StoreError> {
        let store = self.store.clone();
        let id = room_id.to_string();
        tokio::task::spawn_blocking(move || store.load(&id))
            .await
            .map_err(|e| StoreError::Unavailable(format!("storage task failed: {e}")))?
    }
}
