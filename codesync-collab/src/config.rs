//! Server configuration, loadable from TOML.
//!
//! ```toml
//! bind_addr = "0.0.0.0:8080"
//! default_language = "JavaScript"
//! outbound_queue_capacity = 256
//! send_timeout_secs = 10
//! storage_path = "/var/lib/codesync"
//!
//! [auth_tokens]
//! "token-abc" = "alice"
//! ```
//!
//! Every field is optional; missing ones take their [`Default`] value.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Language of a room with no stored state
    pub default_language: String,
    /// Frames buffered per connection before drops
    pub outbound_queue_capacity: usize,
    /// Socket write timeout in seconds; a connection stuck longer is closed
    pub send_timeout_secs: u64,
    /// RocksDB directory (None = in-memory store)
    pub storage_path: Option<PathBuf>,
    /// token → user id. Empty disables token checks.
    pub auth_tokens: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            default_language: "JavaScript".to_string(),
            outbound_queue_capacity: 256,
            send_timeout_secs: 10,
            storage_path: None,
            auth_tokens: HashMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("error parsing config file: {0}")]
    Parse(String),
}
