//! Process-wide room registry.
//!
//! ```text
//!   RoomRegistry
//!     ├── live:     room_id → Arc<Room>   (rooms with ≥1 connection)
//!     └── retiring: room_id → Arc<Room>   (emptied, final save in flight)
//!
//!   Room
//!     └── Mutex<RoomState { document, language, connections, present_users }>
//! ```
//!
//! Lock order is always room → map. The map lock is never held while waiting
//! on a room lock, except for the uncontended lock of a room that has not been
//! published yet.
//!
//! A room id moves `ABSENT → LIVE → ABSENT`. The creator of a live entry
//! receives the room already locked, so joiners racing on a never-seen id
//! queue behind hydration instead of running their own.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard, RwLock};

use crate::broadcast::{BroadcastGroup, BroadcastStats, ConnectionHandle, ConnectionId};
use crate::protocol::Frame;

pub type RoomId = String;

/// Authoritative live state of one room.
#[derive(Debug)]
pub struct RoomState {
    pub document: String,
    pub language: String,
    connections: BroadcastGroup,
    present_users: BTreeSet<String>,
    /// Set once the room has been evicted; a closed state is never reused.
    closed: bool,
}

impl RoomState {
    pub fn new(document: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            language: language.into(),
            connections: BroadcastGroup::new(),
            present_users: BTreeSet::new(),
            closed: false,
        }
    }

    /// Register a connection and its user.
    pub fn add_connection(&mut self, handle: ConnectionHandle) {
        self.present_users.insert(handle.user_id().to_string());
        self.connections.add(handle);
    }

    /// Unregister a connection. Its user leaves the presence set only when
    /// they hold no other connection in this room.
    pub fn remove_connection(&mut self, id: &ConnectionId) -> Option<ConnectionHandle> {
        let handle = self.connections.remove(id)?;
        if !self.connections.has_user(handle.user_id()) {
            self.present_users.remove(handle.user_id());
        }
        Some(handle)
    }

    pub fn has_connection(&self, id: &ConnectionId) -> bool {
        self.connections.contains(id)
    }

    /// Present users in stable (sorted) order.
    pub fn present_users(&self) -> Vec<String> {
        self.present_users.iter().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub fn broadcast(&self, frame: &Frame, exclude: Option<ConnectionId>) -> usize {
        self.connections.broadcast(frame, exclude)
    }

    pub fn broadcast_stats(&self) -> BroadcastStats {
        self.connections.stats()
    }
}

/// One room: its id plus lock-protected state.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    state: Arc<Mutex<RoomState>>,
}

impl Room {
    fn new(id: &str, state: RoomState) -> Self {
        Self {
            id: id.to_string(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lock the room. Every read-modify-broadcast happens under this guard.
    pub async fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().await
    }
}

/// Result of [`RoomRegistry::get_or_create`].
pub enum RoomEntry {
    /// This caller published the room and holds its lock; it must hydrate.
    Created {
        room: Arc<Room>,
        guard: OwnedMutexGuard<RoomState>,
        /// Previous incarnation of the same id whose final save may still
        /// be running. Lock it before loading.
        retiring: Option<Arc<Room>>,
    },
    /// The room was already live.
    Existing(Arc<Room>),
}

#[derive(Default)]
struct Rooms {
    live: HashMap<RoomId, Arc<Room>>,
    retiring: HashMap<RoomId, Arc<Room>>,
}

/// Concurrent map of live rooms, owned by the session manager.
pub struct RoomRegistry {
    rooms: RwLock<Rooms>,
    default_language: String,
}

impl RoomRegistry {
    pub fn new(default_language: impl Into<String>) -> Self {
        Self {
            rooms: RwLock::new(Rooms::default()),
            default_language: default_language.into(),
        }
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Return the live room for `room_id`, creating it if absent.
    ///
    /// Exactly one caller per `ABSENT → LIVE` transition sees
    /// [`RoomEntry::Created`]; it gets the room with an empty document and the
    /// default language, already locked.
    pub async fn get_or_create(&self, room_id: &str) -> RoomEntry {
        if let Some(room) = self.rooms.read().await.live.get(room_id) {
            return RoomEntry::Existing(room.clone());
        }

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.live.get(room_id) {
            return RoomEntry::Existing(room.clone());
        }

        let room = Arc::new(Room::new(room_id, RoomState::new("", self.default_language.as_str())));
        // Not yet published: nobody else can hold this lock.
        let guard = room.state.clone().lock_owned().await;
        rooms.live.insert(room_id.to_string(), room.clone());
        let retiring = rooms.retiring.get(room_id).cloned();

        log::debug!("Room {room_id} created");
        RoomEntry::Created { room, guard, retiring }
    }

    pub async fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.live.get(room_id).cloned()
    }

    /// Evict `room` if `state` (its locked state) has no connections left.
    ///
    /// On eviction the room is closed and parked in the retiring map until
    /// [`release_retired`](Self::release_retired); a concurrent first join for
    /// the same id waits on it. Returns whether the room was evicted.
    pub async fn remove_if_empty(&self, room: &Arc<Room>, state: &mut RoomState) -> bool {
        if !state.is_empty() || state.is_closed() {
            return false;
        }
        state.close();

        let mut rooms = self.rooms.write().await;
        if rooms.live.get(&room.id).is_some_and(|live| Arc::ptr_eq(live, room)) {
            rooms.live.remove(&room.id);
        }
        rooms.retiring.insert(room.id.clone(), room.clone());
        log::info!("Room {} evicted (empty)", room.id);
        true
    }

    /// Drop a retired room once its final save has finished.
    pub async fn release_retired(&self, room: &Arc<Room>) {
        let mut rooms = self.rooms.write().await;
        if rooms.retiring.get(&room.id).is_some_and(|r| Arc::ptr_eq(r, room)) {
            rooms.retiring.remove(&room.id);
        }
    }

    /// Evict a room whose hydration failed, without persisting it.
    pub async fn abandon(&self, room: &Arc<Room>, state: &mut RoomState) {
        state.close();
        let mut rooms = self.rooms.write().await;
        if rooms.live.get(&room.id).is_some_and(|live| Arc::ptr_eq(live, room)) {
            rooms.live.remove(&room.id);
        }
        log::warn!("Room {} abandoned before going live", room.id);
    }

    /// Take every live room out of the registry, for shutdown.
    pub async fn drain_live(&self) -> Vec<Arc<Room>> {
        let mut rooms = self.rooms.write().await;
        rooms.live.drain().map(|(_, room)| room).collect()
    }

    /// Queue `frame` on every connection of `room_id` except `exclude`.
    ///
    /// Locks the room; do not call while holding that room's guard.
    pub async fn broadcast(&self, room_id: &str, frame: &Frame, exclude: Option<ConnectionId>) -> usize {
        match self.get(room_id).await {
            Some(room) => room.lock().await.broadcast(frame, exclude),
            None => {
                log::debug!("Broadcast to absent room {room_id} skipped");
                0
            }
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.live.len()
    }

    pub async fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<_> = self.rooms.read().await.live.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn contains(&self, room_id: &str) -> bool {
        self.rooms.read().await.live.contains_key(room_id)
    }

    pub async fn retiring_count(&self) -> usize {
        self.rooms.read().await.retiring.len()
    }
}
