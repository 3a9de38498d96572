// Byte-stream transport abstraction.
//
// The registry, handler, and broadcast engine only need three primitives
// from a connection: read one message, write one message, and close. The
// `Transport` trait captures exactly those, taking `&self` so one `Arc<T>`
// can be read by its own handler while other threads write to it under the
// registry lock. `TcpStream` implements it through `&TcpStream`'s
// `Read`/`Write` impls.
//
// The in-memory `MemoryTransport` (test builds only) scripts reads and
// records writes, which lets registry/broadcast/handler tests exercise
// zero-length writes and read failures deterministically.

use std::net::{Shutdown, TcpStream};

use chatroom_protocol::framing::{ReadOutcome, WriteOutcome, read_chunk, write_chunk};

/// A bidirectional byte stream owned by one connection.
pub trait Transport: Send + Sync + 'static {
    /// Perform one read of at most `limit` bytes.
    fn receive(&self, limit: usize) -> ReadOutcome;

    /// Write the whole message.
    fn send(&self, msg: &[u8]) -> WriteOutcome;

    /// Shut the connection down in both directions. Idempotent; wakes any
    /// thread blocked in `receive`.
    fn close(&self);
}

impl Transport for TcpStream {
    fn receive(&self, limit: usize) -> ReadOutcome {
        let mut reader = self;
        read_chunk(&mut reader, limit)
    }

    fn send(&self, msg: &[u8]) -> WriteOutcome {
        let mut writer = self;
        write_chunk(&mut writer, msg)
    }

    fn close(&self) {
        // NotConnected after the peer already hung up is expected.
        let _ = self.shutdown(Shutdown::Both);
    }
}
