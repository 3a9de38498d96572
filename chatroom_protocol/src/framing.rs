// Single-read / single-write framing over raw byte streams.
//
// The chatroom protocol has no length prefix or delimiter: one `read` call is
// taken to be one logical message. These helpers wrap that single call and
// classify its result into the three cases the relay cares about (a message,
// a closed peer, or a transient failure), so the handler and broadcast
// engine can `match` instead of inspecting `io::Error` kinds everywhere.
//
// "Peer gone" covers a zero-length result plus the error kinds the OS uses
// for a dead connection (reset, aborted, broken pipe, not connected).
// Everything else, including timeouts, is treated as transient.

use std::io::{self, Read, Write};

/// Largest username accepted in the handshake read.
pub const USERNAME_LIMIT: usize = 1024;

/// Largest chat message accepted in one relaying read.
pub const MESSAGE_LIMIT: usize = 4096;

/// Result of one raw read.
#[derive(Debug)]
pub enum ReadOutcome {
    /// One message's worth of bytes (never empty).
    Message(Vec<u8>),
    /// The peer closed the stream or the connection is dead.
    Closed,
    /// The read failed but the connection may still be usable.
    Failed(io::Error),
}

/// Result of writing one message.
#[derive(Debug)]
pub enum WriteOutcome {
    /// All bytes were handed to the transport.
    Delivered(usize),
    /// The peer is gone; the write can never succeed.
    PeerGone,
    /// The write failed for some other reason.
    Failed(io::Error),
}

/// True for error kinds that mean the other end of the connection is gone.
pub fn is_peer_gone(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// Perform exactly one read of at most `limit` bytes. `Interrupted` is
/// retried; it is not a real failure.
pub fn read_chunk<R: Read>(reader: &mut R, limit: usize) -> ReadOutcome {
    let mut buf = vec![0u8; limit];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return ReadOutcome::Closed,
            Ok(n) => {
                buf.truncate(n);
                return ReadOutcome::Message(buf);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_peer_gone(e.kind()) => return ReadOutcome::Closed,
            Err(e) => return ReadOutcome::Failed(e),
        }
    }
}

/// Write the whole message, looping over short writes. A zero-length write
/// for a non-empty buffer means the peer is gone.
pub fn write_chunk<W: Write>(writer: &mut W, msg: &[u8]) -> WriteOutcome {
    let mut written = 0;
    while written < msg.len() {
        match writer.write(&msg[written..]) {
            Ok(0) => return WriteOutcome::PeerGone,
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_peer_gone(e.kind()) => return WriteOutcome::PeerGone,
            Err(e) => return WriteOutcome::Failed(e),
        }
    }
    if let Err(e) = writer.flush() {
        if is_peer_gone(e.kind()) {
            return WriteOutcome::PeerGone;
        }
        return WriteOutcome::Failed(e);
    }
    WriteOutcome::Delivered(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// A writer that accepts a fixed number of bytes, then reports zero.
    struct Stingy {
        budget: usize,
        taken: Vec<u8>,
    }

    impl Write for Stingy {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.budget).min(3);
            self.budget -= n;
            self.taken.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// A reader/writer that always fails with the given kind.
    struct Broken(io::ErrorKind);

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(self.0))
        }
    }

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(self.0))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn read_takes_one_chunk_up_to_limit() {
        let mut cursor = Cursor::new(b"hello world".to_vec());
        match read_chunk(&mut cursor, 5) {
            ReadOutcome::Message(bytes) => assert_eq!(bytes, b"hello"),
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn read_eof_is_closed() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(matches!(
            read_chunk(&mut cursor, MESSAGE_LIMIT),
            ReadOutcome::Closed
        ));
    }

    #[test]
    fn read_reset_is_closed_but_timeout_is_failed() {
        assert!(matches!(
            read_chunk(&mut Broken(io::ErrorKind::ConnectionReset), 16),
            ReadOutcome::Closed
        ));
        assert!(matches!(
            read_chunk(&mut Broken(io::ErrorKind::TimedOut), 16),
            ReadOutcome::Failed(_)
        ));
    }

    #[test]
    fn write_loops_over_short_writes() {
        let mut w = Stingy {
            budget: 64,
            taken: Vec::new(),
        };
        match write_chunk(&mut w, b"alice: hi bob") {
            WriteOutcome::Delivered(n) => assert_eq!(n, 13),
            other => panic!("expected Delivered, got {other:?}"),
        }
        assert_eq!(w.taken, b"alice: hi bob");
    }

    #[test]
    fn zero_length_write_is_peer_gone() {
        let mut w = Stingy {
            budget: 4,
            taken: Vec::new(),
        };
        assert!(matches!(
            write_chunk(&mut w, b"alice: hi bob"),
            WriteOutcome::PeerGone
        ));
    }

    #[test]
    fn write_error_kinds_classified() {
        assert!(matches!(
            write_chunk(&mut Broken(io::ErrorKind::BrokenPipe), b"x"),
            WriteOutcome::PeerGone
        ));
        assert!(matches!(
            write_chunk(&mut Broken(io::ErrorKind::WouldBlock), b"x"),
            WriteOutcome::Failed(_)
        ));
    }
}
