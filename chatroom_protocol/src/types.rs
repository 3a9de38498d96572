// Core ID types for the chatroom protocol.
//
// `ConnectionId` is the relay-assigned handle for one accepted TCP connection.
// It plays the role a socket descriptor would: the participant registry keys
// on it, the broadcast engine skips the sender by it, and log lines carry it.
// Unlike a raw descriptor it is never reused within a process, so a stale
// handle can never alias a newer connection.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Relay-assigned connection handle. Unique for the life of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocate a fresh handle from the process-wide counter.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}
