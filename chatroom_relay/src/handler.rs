// Per-connection handler: handshake, relay loop, teardown.
//
// Each accepted connection gets one `ConnectionHandler` running on its own
// thread. It moves through three states:
//
//   Handshaking ──ok──▶ Relaying ──eof / "exit"──▶ Closing
//        │                  ▲  │
//        └──fail/full──▶ Closing └─read error: notify sender, stay
//
// - Handshaking reads one message as the username. Only after that succeeds
//   is the participant admitted to the registry (welcome + insert under the
//   lock), so the registry and broadcast engine never see a nameless entry.
//   A failed handshake closes silently: no announcement, no broadcast. The
//   seat reserved at accept time is handed to `admit` or dropped when the
//   handshake ends, whichever way it ends.
// - Relaying reads one message per iteration, echoes `"<name>: <content>"`
//   to the server-side output sink, and broadcasts it.
// - Closing always attempts `Registry::remove` (a no-op if a broadcast
//   already evicted us or we never joined), announces the departure if the
//   participant had joined, and closes the transport.
//
// The output sink is the server's room transcript (stdout for the binary).
// It is observational only; nothing read from it feeds back into the relay.

use std::io::Write;
use std::sync::Arc;

use chatroom_protocol::ConnectionId;
use chatroom_protocol::framing::{MESSAGE_LIMIT, ReadOutcome, USERNAME_LIMIT, WriteOutcome};
use chatroom_protocol::message::{
    CAPACITY_REJECTION, SEND_FAILED, format_chat, is_exit_request, join_announcement,
    leave_announcement, parse_username, welcome_message,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::broadcast::broadcast;
use crate::error::RegistryError;
use crate::registry::{Participant, Registry, Reservation};
use crate::transport::Transport;

/// Receiver for human-readable room announcements.
pub trait OutputSink: Send + Sync {
    fn announce(&self, line: &str);
}

/// Writes announcements to the process's stdout.
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn announce(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(line.as_bytes());
        let _ = out.flush();
    }
}

/// Records announcements in memory, for tests and embedding.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All announcements so far, in order.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl OutputSink for MemorySink {
    fn announce(&self, line: &str) {
        self.lines.lock().push(line.to_owned());
    }
}

/// Why a handler finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exit {
    /// No usable username arrived; never registered.
    HandshakeFailed,
    /// The room was full when the handshake completed.
    Rejected,
    /// The peer closed the connection.
    PeerClosed,
    /// The participant sent the exit sentinel.
    ExitRequested,
}

enum State {
    Handshaking,
    Relaying { name: String },
    Closing { name: Option<String>, exit: Exit },
}

/// Drives one connection from accept to close.
pub struct ConnectionHandler<T: Transport> {
    id: ConnectionId,
    transport: Arc<T>,
    registry: Arc<Registry<T>>,
    sink: Arc<dyn OutputSink>,
    seat: Option<Reservation>,
}

impl<T: Transport> ConnectionHandler<T> {
    pub fn new(
        id: ConnectionId,
        transport: Arc<T>,
        registry: Arc<Registry<T>>,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            id,
            transport,
            registry,
            sink,
            seat: None,
        }
    }

    /// Attach the seat the accept loop reserved for this connection.
    pub fn with_reservation(mut self, seat: Reservation) -> Self {
        self.seat = Some(seat);
        self
    }

    /// Run the connection to completion. Blocks on transport reads.
    pub fn run(mut self) -> Exit {
        let mut state = State::Handshaking;
        loop {
            state = match state {
                State::Handshaking => {
                    let next = self.handshake();
                    self.seat = None;
                    next
                }
                State::Relaying { name } => self.relay_once(name),
                State::Closing { name, exit } => {
                    self.close(name.as_deref());
                    return exit;
                }
            };
        }
    }

    fn handshake(&mut self) -> State {
        let raw = match self.transport.receive(USERNAME_LIMIT) {
            ReadOutcome::Message(raw) => raw,
            ReadOutcome::Closed => {
                debug!(id = %self.id, "closed before sending a username");
                return handshake_failed();
            }
            ReadOutcome::Failed(e) => {
                debug!(id = %self.id, error = %e, "username read failed");
                return handshake_failed();
            }
        };
        let Some(name) = parse_username(&raw) else {
            debug!(id = %self.id, "blank username");
            return handshake_failed();
        };

        let participant = Participant::new(self.id, name.clone(), Arc::clone(&self.transport));
        let seat = self.seat.take();
        match self.registry.admit(participant, welcome_message().as_bytes(), seat) {
            Ok(WriteOutcome::PeerGone) => {
                debug!(id = %self.id, %name, "peer left before welcome");
                handshake_failed()
            }
            Ok(_) => {
                info!(id = %self.id, %name, "joined");
                self.sink.announce(&join_announcement(&name));
                State::Relaying { name }
            }
            Err(RegistryError::Full { capacity }) => {
                info!(id = %self.id, %name, capacity, "room filled during handshake");
                let _ = self.transport.send(CAPACITY_REJECTION.as_bytes());
                State::Closing {
                    name: None,
                    exit: Exit::Rejected,
                }
            }
        }
    }

    fn relay_once(&self, name: String) -> State {
        match self.transport.receive(MESSAGE_LIMIT) {
            ReadOutcome::Closed => State::Closing {
                name: Some(name),
                exit: Exit::PeerClosed,
            },
            ReadOutcome::Message(content) if is_exit_request(&content) => State::Closing {
                name: Some(name),
                exit: Exit::ExitRequested,
            },
            ReadOutcome::Message(content) => {
                let line = format_chat(&name, &content);
                self.sink.announce(&String::from_utf8_lossy(&line));
                broadcast(&self.registry, self.id, &line);
                State::Relaying { name }
            }
            ReadOutcome::Failed(e) => {
                warn!(id = %self.id, %name, error = %e, "read failed; notifying sender");
                // Route through the registry so the notice can't interleave
                // with a broadcast write. If we were already evicted nobody
                // else writes to this stream, so write directly.
                if self.registry.send_to(self.id, SEND_FAILED.as_bytes()).is_none() {
                    let _ = self.transport.send(SEND_FAILED.as_bytes());
                }
                State::Relaying { name }
            }
        }
    }

    fn close(&self, name: Option<&str>) {
        self.registry.remove(self.id);
        if let Some(name) = name {
            info!(id = %self.id, name, "left");
            self.sink.announce(&leave_announcement(name));
        }
        self.transport.close();
    }
}

fn handshake_failed() -> State {
    State::Closing {
        name: None,
        exit: Exit::HandshakeFailed,
    }
}
