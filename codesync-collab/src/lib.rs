//! # codesync-collab: Real-time collaborative code editing sessions
//!
//! Hosts rooms of WebSocket clients editing one shared document. Edits are
//! range substitutions applied in arrival order (last writer wins); a room's
//! state lives in memory while anyone is connected and is persisted once,
//! when the last connection leaves.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket       ┌──────────────────┐
//! │ Editor tab  │ ◄─────────────────► │ SyncServer       │
//! │ (per user)  │     JSON frames     │ handshake + loop │
//! └─────────────┘                     └────────┬─────────┘
//!                                              │
//!                                              ▼
//!                                     ┌──────────────────┐
//!                                     │ SessionManager   │
//!                                     │ join/receive/    │
//!                                     │ leave            │
//!                                     └───┬──────────┬───┘
//!                                         │          │
//!                                         ▼          ▼
//!                              ┌──────────────┐  ┌──────────────┐
//!                              │ RoomRegistry │  │ SessionStore │
//!                              │ Room + patch │  │ (RocksDB)    │
//!                              └──────┬───────┘  └──────────────┘
//!                                     │
//!                              ┌──────┴───────┐
//!                              │BroadcastGroup│
//!                              │ (fan-out)    │
//!                              └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`patch`] - Range patch applier
//! - [`protocol`] - JSON text-frame protocol (`SyncMessage`)
//! - [`broadcast`] - Per-room fan-out over bounded outboxes
//! - [`registry`] - Live rooms, one lock per room
//! - [`session`] - Connection lifecycle: join, receive, leave
//! - [`storage`] - Load/save contract, in-memory and RocksDB stores
//! - [`handshake`] - Identity from the upgrade request
//! - [`config`] - TOML server configuration
//! - [`server`] - WebSocket accept loop

pub mod broadcast;
pub mod config;
pub mod handshake;
pub mod patch;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats, ConnectionHandle, ConnectionId, SendError};
pub use config::{ConfigError, ServerConfig};
pub use handshake::{
    authorize, Authenticator, HandshakeIdentity, HandshakeRejection, StaticTokenAuthenticator,
    EDITOR_PATH,
};
pub use patch::{apply_edit, try_apply_edit, EditDescriptor, EditRange, PatchError};
pub use protocol::{Frame, ProtocolError, SyncMessage, SERVER_USER};
pub use registry::{Room, RoomEntry, RoomId, RoomRegistry, RoomState};
pub use server::{ServerError, ServerStats, SyncServer, UNAUTHORIZED_REASON};
pub use session::{Identity, JoinError, LeaveOutcome, ReceiveOutcome, SessionManager, SessionStats};
pub use storage::{
    MemorySessionStore, PersistedSession, RocksSessionStore, SessionStore, StoreConfig, StoreError,
};
