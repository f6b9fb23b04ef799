//! WebSocket server hosting collaborative editing rooms.
//!
//! Architecture:
//! ```text
//! Client A ──┐                       ┌── RoomRegistry ── Room (room_id)
//!             ├── /ws/editor ── SessionManager            │  document, language
//! Client B ──┘   (handshake)         │                    │  connections, presence
//!                                    │                    └── BroadcastGroup
//!                                    │                           │
//!                                    └── SessionStore            ├──► outbox A
//!                                         (load on first join,   └──► outbox B
//!                                          save on last leave)
//! ```
//!
//! Each connection runs one task that multiplexes its socket reads with its
//! outbox. Reads go through the session manager; outbox frames are written to
//! the socket under a timeout, so a stuck peer only ever stalls itself.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::broadcast::ConnectionHandle;
use crate::config::ServerConfig;
use crate::handshake::{authorize, Authenticator, HandshakeIdentity, StaticTokenAuthenticator};
use crate::session::SessionManager;
use crate::storage::{MemorySessionStore, RocksSessionStore, SessionStore, StoreConfig, StoreError};

/// Close reason sent when the handshake left a connection without identity.
pub const UNAUTHORIZED_REASON: &str = "unauthorized";

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub active_rooms: usize,
    pub rooms_hydrated: u64,
    pub rooms_persisted: u64,
    pub persist_failures: u64,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// State every connection task needs.
#[derive(Clone)]
struct Shared {
    sessions: Arc<SessionManager>,
    authenticator: Option<Arc<dyn Authenticator>>,
    stats: Arc<RwLock<ServerStats>>,
    queue_capacity: usize,
    send_timeout: Duration,
}

/// The collaboration server.
pub struct SyncServer {
    config: ServerConfig,
    shared: Shared,
}

impl SyncServer {
    /// Create a server, opening RocksDB if `storage_path` is set.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let store: Arc<dyn SessionStore> = match &config.storage_path {
            Some(path) => {
                let store_config = StoreConfig {
                    path: path.clone(),
                    ..StoreConfig::default()
                };
                Arc::new(RocksSessionStore::open(store_config)?)
            }
            None => Arc::new(MemorySessionStore::new()),
        };
        Ok(Self::with_store(config, store))
    }

    /// Create with default configuration (in-memory, no persistence).
    pub fn with_defaults() -> Self {
        Self::with_store(ServerConfig::default(), Arc::new(MemorySessionStore::new()))
    }

    /// Create over an explicit store. A non-empty `auth_tokens` table
    /// installs a [`StaticTokenAuthenticator`].
    pub fn with_store(config: ServerConfig, store: Arc<dyn SessionStore>) -> Self {
        let authenticator: Option<Arc<dyn Authenticator>> = if config.auth_tokens.is_empty() {
            None
        } else {
            Some(Arc::new(StaticTokenAuthenticator::new(config.auth_tokens.clone())))
        };

        let shared = Shared {
            sessions: Arc::new(SessionManager::new(store, config.default_language.as_str())),
            authenticator,
            stats: Arc::new(RwLock::new(ServerStats::default())),
            queue_capacity: config.outbound_queue_capacity,
            send_timeout: Duration::from_secs(config.send_timeout_secs.max(1)),
        };
        Self { config, shared }
    }

    /// Replace the authenticator.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.shared.authenticator = Some(authenticator);
        self
    }

    /// Bind `bind_addr` and serve until the process ends.
    pub async fn run(&self) -> Result<(), ServerError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Bind `bind_addr` and serve until `shutdown` resolves, then persist
    /// every live room.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);
        self.serve_until(listener, shutdown).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.serve_until(listener, std::future::pending::<()>()).await
    }

    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = accepted?;
                    log::debug!("New TCP connection from {addr}");

                    let shared = self.shared.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, addr, shared).await {
                            log::error!("Connection error from {addr}: {e}");
                        }
                    });
                }
                _ = &mut shutdown => {
                    log::info!("Shutdown requested");
                    break;
                }
            }
        }

        let persisted = self.shared.sessions.shutdown().await;
        log::info!("Shutdown complete: {persisted} rooms persisted");
        Ok(())
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(stream: TcpStream, addr: SocketAddr, shared: Shared) -> Result<(), ServerError> {
        let mut handshake = HandshakeIdentity::default();
        let authenticator = shared.authenticator.clone();
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            match authorize(&request.uri().to_string(), authenticator.as_deref()) {
                Ok(identity) => {
                    handshake = identity;
                    Ok(response)
                }
                Err(rejection) => {
                    log::warn!("Rejected upgrade from {addr}: {rejection}");
                    Err(rejection.into_response())
                }
            }
        };
        let mut ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;

        shared.stats.write().await.total_connections += 1;

        let Some(identity) = handshake.into_identity() else {
            log::warn!("Connection from {addr} has no room or user, closing");
            let frame = CloseFrame {
                code: CloseCode::Policy,
                reason: UNAUTHORIZED_REASON.into(),
            };
            if let Err(e) = ws_stream.close(Some(frame)).await {
                log::debug!("Close to {addr} failed: {e}");
            }
            return Ok(());
        };

        let (handle, mut outbox) = ConnectionHandle::new(identity.user_id.as_str(), shared.queue_capacity);
        let connection_id = handle.id();

        let room = match shared.sessions.join(&identity, handle).await {
            Ok(room) => room,
            Err(e) => {
                log::error!("Join from {addr} failed: {e}");
                let frame = CloseFrame {
                    code: CloseCode::Error,
                    reason: "room unavailable".into(),
                };
                if let Err(e) = ws_stream.close(Some(frame)).await {
                    log::debug!("Close to {addr} failed: {e}");
                }
                return Ok(());
            }
        };

        shared.stats.write().await.active_connections += 1;
        log::info!(
            "WebSocket connection {connection_id} from {addr}: {} in room {}",
            identity.user_id,
            identity.room_id
        );

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // No `?` in here: leave below must run however the loop ends.
        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            shared.stats.write().await.total_messages += 1;
                            shared.sessions.receive(&room, connection_id, text.as_str()).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                                log::warn!("Pong to {addr} failed: {e}");
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            log::warn!("Ignoring {}-byte binary frame from {addr}", data.len());
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            log::warn!("WebSocket error from {addr}: {e}");
                            break;
                        }
                    }
                }

                frame = outbox.recv() => {
                    let Some(frame) = frame else { break };
                    let send = ws_sender.send(Message::Text(frame.to_string().into()));
                    match tokio::time::timeout(shared.send_timeout, send).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            log::warn!("Send to {addr} failed: {e}");
                            break;
                        }
                        Err(_) => {
                            log::warn!("Send to {addr} timed out after {:?}", shared.send_timeout);
                            break;
                        }
                    }
                }
            }
        }

        let outcome = shared.sessions.leave(&room, connection_id).await;
        log::debug!("Connection {connection_id} left room {}: {outcome:?}", identity.room_id);

        let mut stats = shared.stats.write().await;
        stats.active_connections = stats.active_connections.saturating_sub(1);
        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.shared.stats.read().await.clone();
        let sessions = self.shared.sessions.stats();
        stats.active_rooms = self.shared.sessions.registry().room_count().await;
        stats.rooms_hydrated = sessions.rooms_hydrated;
        stats.rooms_persisted = sessions.rooms_persisted;
        stats.persist_failures = sessions.persist_failures;
        stats
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.shared.sessions
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Identity;

    #[test]
    fn test_server_creation() {
        let server = SyncServer::with_defaults();
        assert_eq!(server.bind_addr(), "127.0.0.1:8080");
        assert!(server.shared.authenticator.is_none());
        assert_eq!(server.shared.queue_capacity, 256);
    }

    #[test]
    fn test_auth_tokens_install_authenticator() {
        let mut config = ServerConfig::default();
        config.auth_tokens.insert("t".into(), "alice".into());
        let server = SyncServer::with_store(config, Arc::new(MemorySessionStore::new()));
        let auth = server.shared.authenticator.as_ref().unwrap();
        assert_eq!(auth.authenticate("t").as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_server_with_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            storage_path: Some(dir.path().join("db")),
            ..ServerConfig::default()
        };
        let server = SyncServer::new(config).unwrap();
        assert!(dir.path().join("db").exists());
        assert_eq!(server.stats().await.active_rooms, 0);
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = SyncServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.active_rooms, 0);
        assert_eq!(stats.rooms_hydrated, 0);
        assert_eq!(stats.rooms_persisted, 0);
    }

    #[tokio::test]
    async fn test_serve_until_persists_on_shutdown() {
        let store = Arc::new(MemorySessionStore::new());
        let server = SyncServer::with_store(ServerConfig::default(), store.clone());

        let (handle, _rx) = ConnectionHandle::new("alice", 8);
        server.sessions().join(&Identity::new("r1", "alice"), handle).await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        server.serve_until(listener, async {}).await.unwrap();

        assert_eq!(store.get("r1").unwrap().language, "JavaScript");
        assert_eq!(server.stats().await.rooms_persisted, 1);
    }
}
