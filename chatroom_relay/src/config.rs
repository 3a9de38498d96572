// Relay configuration.
//
// `RelayConfig` can be built in code (tests use port 0 to get a free port),
// loaded from a JSON file, or assembled by the `chat-server` CLI, which
// layers its flags over an optional file. Missing JSON fields fall back to
// the defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default simultaneous-participant limit.
pub const DEFAULT_MAX_PARTICIPANTS: usize = 10;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 7878;

/// Configuration for starting a relay server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Interface to bind. The chat room is a localhost service by default.
    pub bind_address: String,
    /// Listening port; 0 lets the OS pick one.
    pub port: u16,
    /// Connections beyond this many registered participants are turned away.
    pub max_participants: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            max_participants: DEFAULT_MAX_PARTICIPANTS,
        }
    }
}

impl RelayConfig {
    /// Parse a config from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a config from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_participants == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }

    /// `host:port` string for `TcpListener::bind`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
