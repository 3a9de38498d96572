// chatroom_relay — multi-user TCP chat relay.
//
// The relay accepts TCP connections, registers each one as a named
// participant after a one-message username handshake, and forwards every
// chat line a participant sends to everyone else in the room. It never
// stores messages.
//
// Module overview:
// - `registry.rs`:   `Registry<T>`, the capacity-bounded, insertion-ordered
//                    participant set. One mutex serializes every operation.
// - `broadcast.rs`:  `broadcast()`, the fan-out that runs under the registry
//                    lock and evicts participants whose peer is gone.
// - `handler.rs`:    `ConnectionHandler`, the per-connection state machine
//                    (handshake → relaying → closing), and the `OutputSink`
//                    that receives the server-side room transcript.
// - `transport.rs`:  The `Transport` trait (read one message / write one
//                    message / close), implemented for `TcpStream`.
// - `server.rs`:     TCP listener, capacity check at accept time, and the
//                    supervisor thread that spawns and joins handlers.
// - `client.rs`:     `ChatClient`, a blocking client with a receiver thread.
// - `config.rs`, `error.rs`, `logging.rs`: configuration, error enums, and
//                    `tracing` subscriber setup.
//
// Dependencies: `chatroom_protocol` for wire text and framing.
//
// The relay runs as a standalone binary (`main.rs`) or embedded through
// `start_relay`; `src/bin/chat.rs` is the terminal client.

pub mod broadcast;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod registry;
pub mod server;
pub mod transport;

pub use config::RelayConfig;
pub use server::{RelayHandle, start_relay, start_relay_with_sink};
