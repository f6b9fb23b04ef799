//! JSON text-frame protocol spoken over the editor WebSocket.
//!
//! Every frame is a JSON object discriminated by `type`:
//!
//! | `type`               | Direction | Fields                                   |
//! |----------------------|-----------|------------------------------------------|
//! | `CODE_CHANGE_UPDATE` | in        | `content` (serialized [`EditDescriptor`]) |
//! | `LANGUAGE_CHANGE`    | in        | `selectedLanguage`                       |
//! | `INITIAL_CODE_STATE` | out       | `content`, `selectedLanguage`, `user`    |
//! | `USER_LIST_UPDATE`   | out       | `users`                                  |
//!
//! Inbound frames are relayed to other room members byte-for-byte, so extra
//! fields a client attaches (`user`, `sessionId`, ...) survive the trip even
//! though the server ignores them. Frames with any other `type` (chat, for
//! instance) decode as [`SyncMessage::Passthrough`] and are relayed without
//! touching room state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::patch::EditDescriptor;

/// Sender tag carried by server-originated snapshots.
pub const SERVER_USER: &str = "SERVER";

/// An encoded text frame, shared between every outbox it is queued on.
pub type Frame = Arc<str>;

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncMessage {
    /// Range edit; `content` holds the edit as a JSON string.
    #[serde(rename = "CODE_CHANGE_UPDATE")]
    CodeChangeUpdate { content: String },

    /// Syntax-mode switch for the whole room.
    #[serde(rename = "LANGUAGE_CHANGE")]
    LanguageChange {
        #[serde(rename = "selectedLanguage")]
        selected_language: String,
    },

    /// Room snapshot, sent once to each joining connection.
    #[serde(rename = "INITIAL_CODE_STATE")]
    InitialCodeState {
        content: String,
        #[serde(rename = "selectedLanguage")]
        selected_language: String,
        user: String,
    },

    /// Distinct users currently joined to the room.
    #[serde(rename = "USER_LIST_UPDATE")]
    UserListUpdate { users: Vec<String> },

    /// Any other `type`: relayed verbatim, never interpreted.
    #[serde(other)]
    Passthrough,
}

impl SyncMessage {
    /// Create a content change carrying `edit`.
    pub fn code_change(edit: &EditDescriptor) -> Result<Self, ProtocolError> {
        let content = serde_json::to_string(edit)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self::CodeChangeUpdate { content })
    }

    /// Create a language change.
    pub fn language_change(language: impl Into<String>) -> Self {
        Self::LanguageChange {
            selected_language: language.into(),
        }
    }

    /// Create the snapshot sent to a joining connection.
    pub fn initial_code_state(content: impl Into<String>, language: impl Into<String>) -> Self {
        Self::InitialCodeState {
            content: content.into(),
            selected_language: language.into(),
            user: SERVER_USER.to_string(),
        }
    }

    /// Create a presence update.
    pub fn user_list<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::UserListUpdate {
            users: users.into_iter().map(Into::into).collect(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Serialize into a shareable [`Frame`].
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        self.encode().map(Frame::from)
    }

    /// Deserialize from a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Parse the edit embedded in a content change.
    pub fn edit(&self) -> Result<EditDescriptor, ProtocolError> {
        match self {
            Self::CodeChangeUpdate { content } => serde_json::from_str(content)
                .map_err(|e| ProtocolError::InvalidEdit(e.to_string())),
            _ => Err(ProtocolError::InvalidMessageType),
        }
    }

    /// Wire name of this message's `type`, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CodeChangeUpdate { .. } => "CODE_CHANGE_UPDATE",
            Self::LanguageChange { .. } => "LANGUAGE_CHANGE",
            Self::InitialCodeState { .. } => "INITIAL_CODE_STATE",
            Self::UserListUpdate { .. } => "USER_LIST_UPDATE",
            Self::Passthrough => "passthrough",
        }
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Invalid edit payload: {0}")]
    InvalidEdit(String),
    #[error("Invalid message type")]
    InvalidMessageType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::EditRange;

    #[test]
    fn test_decode_code_change() {
        let text = r#"{"type":"CODE_CHANGE_UPDATE","content":"{\"range\":{\"startLineNumber\":1,\"startColumn\":1,\"endLineNumber\":1,\"endColumn\":1},\"text\":\"a\"}","user":"alice"}"#;
        let msg = SyncMessage::decode(text).unwrap();
        let edit = msg.edit().unwrap();
        assert_eq!(edit.range, EditRange::caret(1, 1));
        assert_eq!(edit.text, "a");
    }

    #[test]
    fn test_decode_language_change() {
        let msg = SyncMessage::decode(r#"{"type":"LANGUAGE_CHANGE","selectedLanguage":"python"}"#)
            .unwrap();
        assert_eq!(msg, SyncMessage::language_change("python"));
    }

    #[test]
    fn test_initial_state_shape() {
        let frame = SyncMessage::initial_code_state("print(1)", "python").encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "INITIAL_CODE_STATE");
        assert_eq!(value["content"], "print(1)");
        assert_eq!(value["selectedLanguage"], "python");
        assert_eq!(value["user"], SERVER_USER);
    }

    #[test]
    fn test_user_list_shape() {
        let frame = SyncMessage::user_list(["alice", "bob"]).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "USER_LIST_UPDATE");
        assert_eq!(value["users"], serde_json::json!(["alice", "bob"]));
    }

    #[test]
    fn test_unknown_type_is_passthrough() {
        let msg = SyncMessage::decode(
            r#"{"type":"CHAT_MESSAGE","content":"hi","user":"bob","timestamp":"10:00"}"#,
        )
        .unwrap();
        assert_eq!(msg, SyncMessage::Passthrough);
        assert_eq!(msg.kind(), "passthrough");
    }

    #[test]
    fn test_missing_type_is_error() {
        assert!(matches!(
            SyncMessage::decode(r#"{"content":"x"}"#),
            Err(ProtocolError::Deserialization(_))
        ));
    }

    #[test]
    fn test_decode_garbage_is_error() {
        assert!(SyncMessage::decode("not json").is_err());
    }

    #[test]
    fn test_malformed_edit_payload() {
        let msg = SyncMessage::CodeChangeUpdate {
            content: "{\"range\":".into(),
        };
        assert!(matches!(msg.edit(), Err(ProtocolError::InvalidEdit(_))));
    }

    #[test]
    fn test_edit_on_wrong_type() {
        let msg = SyncMessage::language_change("rust");
        assert_eq!(msg.edit(), Err(ProtocolError::InvalidMessageType));
    }

    #[test]
    fn test_code_change_carries_edit_as_string() {
        let edit = EditDescriptor::new(EditRange::new(2, 1, 2, 4), "foo");
        let msg = SyncMessage::code_change(&edit).unwrap();
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "CODE_CHANGE_UPDATE");
        assert!(value["content"].is_string());
        assert_eq!(msg.edit().unwrap(), edit);
    }
}
