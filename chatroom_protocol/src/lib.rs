// chatroom_protocol — wire text and raw-read framing for the chatroom relay.
//
// This crate holds everything the relay server (`chatroom_relay`) and the
// terminal client agree on: connection handles, the fixed banner/notice
// strings, chat-line formatting, and the single-read framing helpers. It has
// no dependency on the relay and no third-party dependencies.
//
// Module overview:
// - `types.rs`:    `ConnectionId`, the relay-assigned connection handle.
// - `message.rs`:  Banner/notice constants, `format_chat`, exit-sentinel
//                  detection, username parsing.
// - `framing.rs`:  `read_chunk` / `write_chunk`, which perform one raw read
//                  or one full write and classify the result.
//
// Design decisions:
// - **One read is one message.** The wire carries no framing, matching what
//   plain `nc` users and the bundled client send. Partial or coalesced reads
//   are not reassembled.
// - **Bytes, not strings.** Chat content is forwarded as raw bytes; only the
//   username is decoded.

pub mod framing;
pub mod message;
pub mod types;

pub use framing::{
    MESSAGE_LIMIT, ReadOutcome, USERNAME_LIMIT, WriteOutcome, read_chunk, write_chunk,
};
pub use types::ConnectionId;
