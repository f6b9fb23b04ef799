//! Fan-out of text frames to the connections of one room.
//!
//! Every connection owns a bounded outbox drained by its own socket task.
//! Broadcasting only ever `try_send`s into those outboxes, so a slow or
//! half-closed peer never stalls the sender or its siblings: a full outbox
//! drops the frame for that peer alone, a closed one is skipped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::Frame;

/// Opaque per-connection handle id.
pub type ConnectionId = Uuid;

/// Why a frame could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("outbound queue full")]
    Full,
    #[error("connection closed")]
    Closed,
}

/// Write side of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: String,
    outbox: mpsc::Sender<Frame>,
}

impl ConnectionHandle {
    /// Create a handle for `user_id` whose outbox buffers up to `capacity` frames.
    ///
    /// The receiver is drained by whatever owns the socket.
    pub fn new(user_id: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (outbox, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            outbox,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Queue a frame without waiting.
    pub fn send(&self, frame: Frame) -> Result<(), SendError> {
        self.outbox.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    /// Frames queued, counted per receiving connection.
    pub messages_sent: u64,
    /// Frames a connection missed because its outbox was full or closed.
    pub messages_dropped: u64,
    pub active_connections: usize,
}

/// The live connections of one room.
///
/// Owned by the room state and mutated only under the room lock; the
/// counters are atomics so reading stats needs no lock of its own.
#[derive(Debug, Default)]
pub struct BroadcastGroup {
    members: HashMap<ConnectionId, ConnectionHandle>,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl BroadcastGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns `false` if its id was already present.
    pub fn add(&mut self, handle: ConnectionHandle) -> bool {
        self.members.insert(handle.id(), handle).is_none()
    }

    pub fn remove(&mut self, id: &ConnectionId) -> Option<ConnectionHandle> {
        self.members.remove(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.contains_key(id)
    }

    /// Whether `user_id` still holds at least one connection here.
    pub fn has_user(&self, user_id: &str) -> bool {
        self.members.values().any(|h| h.user_id() == user_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.members.values()
    }

    /// Queue `frame` on every connection except `exclude`.
    ///
    /// Failures are logged per connection and never abort the loop.
    /// Returns the number of connections the frame was queued on.
    pub fn broadcast(&self, frame: &Frame, exclude: Option<ConnectionId>) -> usize {
        let mut delivered = 0;
        for handle in self.members.values() {
            if Some(handle.id()) == exclude {
                continue;
            }
            match handle.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    self.messages_dropped.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "Dropping frame for connection {} ({}): {e}",
                        handle.id(),
                        handle.user_id()
                    );
                }
            }
        }
        self.messages_sent.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            active_connections: self.members.len(),
        }
    }
}
