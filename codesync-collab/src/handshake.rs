//! Identity extraction from the WebSocket upgrade request.
//!
//! Clients connect to `/ws/editor?sessionId=<room>&username=<user>[&token=<t>]`.
//! With an [`Authenticator`] configured, the token must resolve to a user and
//! that user replaces `username`; otherwise the upgrade is refused with 401.
//! A request that passes but lacks a room or user still upgrades, and the
//! server closes it with a policy-violation frame before it reaches a room.

use std::collections::HashMap;

use thiserror::Error;
use tokio_tungstenite::tungstenite::handshake::server::ErrorResponse;
use tokio_tungstenite::tungstenite::http::StatusCode;

use crate::session::Identity;

/// Path of the editor WebSocket endpoint.
pub const EDITOR_PATH: &str = "/ws/editor";

/// Resolves a bearer token to a user id.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<String>;
}

/// Fixed token table, typically from `ServerConfig::auth_tokens`.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, String>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn with_token(mut self, token: impl Into<String>, user: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }
}

/// Attributes attached to a connection by the handshake. Either may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeIdentity {
    pub room_id: Option<String>,
    pub user_id: Option<String>,
}

impl HandshakeIdentity {
    /// Both attributes, or `None` if either is missing.
    pub fn into_identity(self) -> Option<Identity> {
        Some(Identity::new(self.room_id?, self.user_id?))
    }
}

/// Why an upgrade request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeRejection {
    #[error("Malformed request target: {0}")]
    BadRequest(String),
    #[error("No endpoint at {0}")]
    NotFound(String),
    #[error("Missing or invalid token")]
    Unauthorized,
}

impl HandshakeRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    /// HTTP response refusing the upgrade.
    pub fn into_response(self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.to_string()));
        *response.status_mut() = self.status();
        response
    }
}

/// Validate an upgrade request target (path and query) and extract its identity.
pub fn authorize(
    target: &str,
    authenticator: Option<&dyn Authenticator>,
) -> Result<HandshakeIdentity, HandshakeRejection> {
    let url = url::Url::parse(&format!("http://localhost{target}"))
        .map_err(|e| HandshakeRejection::BadRequest(e.to_string()))?;
    if url.path() != EDITOR_PATH {
        return Err(HandshakeRejection::NotFound(url.path().to_string()));
    }

    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let param = |name: &str| params.get(name).filter(|v| !v.is_empty()).cloned();

    let user_id = match authenticator {
        Some(auth) => {
            let token = param("token").ok_or(HandshakeRejection::Unauthorized)?;
            Some(auth.authenticate(&token).ok_or(HandshakeRejection::Unauthorized)?)
        }
        None => param("username"),
    };

    Ok(HandshakeIdentity {
        room_id: param("sessionId"),
        user_id,
    })
}
