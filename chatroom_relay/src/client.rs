// TCP client for connecting to the chat relay.
//
// Architecture:
// - `connect()` performs TCP connect + username handshake on the calling
//   thread (with a read timeout so a silent server can't hang it), then
//   spawns a background receiver thread.
// - The receiver thread performs one raw read per message and pushes
//   `Incoming` values into an `mpsc` channel. The server may relay chat right
//   behind the welcome, so anything in the handshake read past the welcome
//   text is queued as the first `Incoming::Chat`.
// - Sending goes through `ChatSender`, a cheap clonable handle around the
//   shared stream, so a terminal front end can type on one thread while the
//   receiver prints on another.
//
// Used by the `chat` binary and by the relay's integration tests.

use std::io::Read;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chatroom_protocol::framing::{
    MESSAGE_LIMIT, ReadOutcome, USERNAME_LIMIT, WriteOutcome, read_chunk, write_chunk,
};
use chatroom_protocol::message::{CAPACITY_REJECTION, EXIT_SENTINEL, welcome_message};
use tracing::debug;

use crate::error::ClientError;

/// How long `connect` waits for the welcome banner.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Something received from the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Incoming {
    /// One read's worth of relayed chat text.
    Chat(String),
    /// A receive failed but the connection is still up.
    Dropped,
    /// The server closed the connection. Always the last item.
    Lost,
}

/// Clonable send half of a chat connection.
#[derive(Clone)]
pub struct ChatSender {
    stream: Arc<TcpStream>,
}

impl ChatSender {
    /// Send one chat message, verbatim.
    pub fn send(&self, text: &str) -> Result<(), ClientError> {
        let mut writer: &TcpStream = &self.stream;
        match write_chunk(&mut writer, text.as_bytes()) {
            WriteOutcome::Delivered(_) => Ok(()),
            WriteOutcome::PeerGone => Err(ClientError::ConnectionLost),
            WriteOutcome::Failed(e) => Err(ClientError::Io(e)),
        }
    }

    /// Shut the socket down in both directions, which also ends the
    /// receiver thread.
    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// A connected, named chat participant.
pub struct ChatClient {
    sender: ChatSender,
    inbox: Receiver<Incoming>,
    reader_thread: Option<JoinHandle<()>>,
}

impl ChatClient {
    /// Connect, send `username`, and wait for the welcome. Returns the client
    /// and the welcome text on success.
    pub fn connect<A: ToSocketAddrs>(
        addr: A,
        username: &str,
    ) -> Result<(Self, String), ClientError> {
        let stream = TcpStream::connect(addr).map_err(ClientError::Connect)?;
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;

        match write_chunk(&mut &stream, username.as_bytes()) {
            WriteOutcome::Delivered(_) => {}
            WriteOutcome::PeerGone => return Err(ClientError::ConnectionLost),
            WriteOutcome::Failed(e) => return Err(ClientError::Handshake(e)),
        }

        let reply = match read_chunk(&mut &stream, USERNAME_LIMIT + MESSAGE_LIMIT) {
            ReadOutcome::Message(bytes) => bytes,
            ReadOutcome::Closed => return Err(ClientError::ConnectionLost),
            ReadOutcome::Failed(e) => return Err(ClientError::Handshake(e)),
        };
        if reply.starts_with(CAPACITY_REJECTION.as_bytes()) {
            return Err(ClientError::Rejected);
        }
        let (welcome, early) = split_welcome(&reply);

        // Clear the handshake timeout for the long-lived receiver.
        stream.set_read_timeout(None)?;
        let stream = Arc::new(stream);

        let (tx, rx) = mpsc::channel();
        if let Some(chat) = early {
            let _ = tx.send(Incoming::Chat(chat));
        }
        let reader = Arc::clone(&stream);
        let reader_thread = thread::Builder::new()
            .name("chat-receiver".into())
            .spawn(move || receive_loop(&*reader, &tx))?;

        Ok((
            Self {
                sender: ChatSender { stream },
                inbox: rx,
                reader_thread: Some(reader_thread),
            },
            welcome,
        ))
    }

    /// A send handle usable from another thread.
    pub fn sender(&self) -> ChatSender {
        self.sender.clone()
    }

    /// Send one chat message, verbatim.
    pub fn send(&self, text: &str) -> Result<(), ClientError> {
        self.sender.send(text)
    }

    /// Drain all queued incoming items (non-blocking).
    pub fn poll(&self) -> Vec<Incoming> {
        self.inbox.try_iter().collect()
    }

    /// Wait up to `timeout` for the next incoming item.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Incoming> {
        match self.inbox.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) => None,
            // Receiver thread is gone; the stream is finished.
            Err(RecvTimeoutError::Disconnected) => Some(Incoming::Lost),
        }
    }

    /// Send the exit sentinel, close the socket, and wait for the receiver
    /// thread.
    pub fn disconnect(&mut self) {
        let sentinel = String::from_utf8_lossy(EXIT_SENTINEL);
        if let Err(e) = self.sender.send(&sentinel) {
            debug!(error = %e, "exit sentinel not delivered");
        }
        self.sender.close();
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Separate the welcome from chat relayed in the same read. A reply that
/// doesn't start with the full welcome is returned whole as the welcome.
fn split_welcome(reply: &[u8]) -> (String, Option<String>) {
    let expected = welcome_message();
    match reply.strip_prefix(expected.as_bytes()) {
        Some([]) => (expected, None),
        Some(rest) => (expected, Some(String::from_utf8_lossy(rest).into_owned())),
        None => (String::from_utf8_lossy(reply).into_owned(), None),
    }
}

/// Receiver thread: one raw read per message, pushed to the channel.
fn receive_loop<R: Read>(mut reader: R, tx: &Sender<Incoming>) {
    loop {
        let item = match read_chunk(&mut reader, USERNAME_LIMIT + MESSAGE_LIMIT) {
            ReadOutcome::Message(bytes) => {
                Incoming::Chat(String::from_utf8_lossy(&bytes).into_owned())
            }
            ReadOutcome::Failed(e) => {
                debug!(error = %e, "receive failed");
                Incoming::Dropped
            }
            ReadOutcome::Closed => {
                let _ = tx.send(Incoming::Lost);
                return;
            }
        };
        if tx.send(item).is_err() {
            return; // Client dropped the receiver.
        }
    }
}
