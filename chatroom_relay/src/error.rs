// Error types for the relay, its configuration, and the terminal client.
//
// Runtime conditions that the chat protocol treats as routine (a peer that
// hangs up, a transient write failure, a full room) are not errors here; they
// are `ReadOutcome`/`WriteOutcome` variants or handler exits. These enums
// cover what a caller of the library can actually act on.

use std::io;
use std::path::PathBuf;

/// Problems loading or validating a `RelayConfig`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("max_participants must be at least 1")]
    ZeroCapacity,
}

/// Failures starting the relay server.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to spawn relay thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("listener setup failed: {0}")]
    Io(#[from] io::Error),
}

/// Registry mutations that can be refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("room is full ({capacity} participants)")]
    Full { capacity: usize },
}

/// Failures on the client side of a chat connection.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not connect: {0}")]
    Connect(#[source] io::Error),

    #[error("handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("rejected: the room is full")]
    Rejected,

    #[error("connection to the server was lost")]
    ConnectionLost,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
