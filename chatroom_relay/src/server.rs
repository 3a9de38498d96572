// TCP server and supervisor for the chat relay.
//
// Architecture: thread-per-connection with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop, non-blocking so it can
//   notice shutdown): enforces the room capacity at accept time by reserving
//   a registry seat for every connection. Registered participants and
//   connections still in their handshake both hold seats, so silent
//   connections cannot outnumber the room. A connection that finds no free
//   seat gets the rejection message and is closed on the spot. Anything else
//   goes to the supervisor, seat attached, as `SupervisorEvent::Accepted`.
// - **Supervisor thread**: assigns each connection a `ConnectionId`, spawns
//   its handler thread, and tracks every live connection (including ones
//   still in the handshake, which the registry doesn't know about yet).
//   Handler threads report `SupervisorEvent::Finished` when they return, and
//   the supervisor joins them. Because the supervisor records a connection
//   before its handler can possibly finish, `Finished` never precedes
//   `Accepted` for the same id.
// - **Handler threads** (one per connection): see `handler.rs`. They share
//   the `Registry` through an `Arc` and broadcast to each other directly;
//   the supervisor is not on the message path.
//
// Shutdown: `RelayHandle::stop` clears `keep_running`. The listener exits its
// poll loop, the supervisor shuts down every live stream so blocked handler
// reads return, then joins all handler threads.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chatroom_protocol::ConnectionId;
use chatroom_protocol::message::{BANNER, CAPACITY_REJECTION};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::{RegistryError, RelayError};
use crate::handler::{ConnectionHandler, Exit, OutputSink, StdoutSink};
use crate::registry::{Registry, Reservation};
use crate::transport::Transport;

/// How often the listener and supervisor re-check `keep_running`.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Events sent to the supervisor thread.
enum SupervisorEvent {
    Accepted {
        stream: TcpStream,
        peer: SocketAddr,
        seat: Reservation,
    },
    Finished { id: ConnectionId, exit: Exit },
}

/// A connection the supervisor is responsible for.
struct LiveConnection {
    transport: Arc<TcpStream>,
    thread: JoinHandle<()>,
}

/// Handle returned by `start_relay` to inspect and control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    registry: Arc<Registry<TcpStream>>,
}

impl RelayHandle {
    /// The live participant registry.
    pub fn registry(&self) -> &Arc<Registry<TcpStream>> {
        &self.registry
    }

    /// Signal the relay to stop, disconnect everyone, and wait for all
    /// threads to finish.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    /// Block until the relay stops. Only returns early if the supervisor
    /// thread dies.
    pub fn wait(mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Start the relay with stdout as the room transcript. Returns a handle and
/// the actual bound address (useful when port 0 is used).
pub fn start_relay(config: RelayConfig) -> Result<(RelayHandle, SocketAddr), RelayError> {
    start_relay_with_sink(config, Arc::new(StdoutSink))
}

/// Start the relay, sending join/leave/chat announcements to `sink`.
pub fn start_relay_with_sink(
    config: RelayConfig,
    sink: Arc<dyn OutputSink>,
) -> Result<(RelayHandle, SocketAddr), RelayError> {
    config.validate()?;
    let bind_addr = config.socket_addr();
    let listener = TcpListener::bind(&bind_addr).map_err(|source| RelayError::Bind {
        addr: bind_addr,
        source,
    })?;
    let addr = listener.local_addr()?;
    // Non-blocking so the accept loop can check keep_running periodically.
    listener.set_nonblocking(true)?;

    let registry = Arc::new(Registry::new(config.max_participants));
    let keep_running = Arc::new(AtomicBool::new(true));

    sink.announce(BANNER);
    info!(%addr, capacity = config.max_participants, "chat relay listening");

    let thread = {
        let registry = Arc::clone(&registry);
        let keep_running = Arc::clone(&keep_running);
        thread::Builder::new()
            .name("chat-supervisor".into())
            .spawn(move || supervise(listener, registry, sink, keep_running))
            .map_err(RelayError::Spawn)?
    };

    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
            registry,
        },
        addr,
    ))
}

/// Supervisor loop. Runs until `keep_running` is cleared, then tears down.
fn supervise(
    listener: TcpListener,
    registry: Arc<Registry<TcpStream>>,
    sink: Arc<dyn OutputSink>,
    keep_running: Arc<AtomicBool>,
) {
    let (tx, rx): (Sender<SupervisorEvent>, Receiver<SupervisorEvent>) = mpsc::channel();

    let accept_thread = {
        let registry = Arc::clone(&registry);
        let keep_running = Arc::clone(&keep_running);
        let tx = tx.clone();
        thread::Builder::new()
            .name("chat-listener".into())
            .spawn(move || accept_loop(listener, registry, tx, keep_running))
    };
    let accept_thread = match accept_thread {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "could not spawn listener thread");
            keep_running.store(false, Ordering::SeqCst);
            None
        }
    };

    let mut live: HashMap<ConnectionId, LiveConnection> = HashMap::new();

    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(SupervisorEvent::Accepted { stream, peer, seat }) => {
                spawn_handler(stream, peer, seat, &registry, &sink, &tx, &mut live);
            }
            Ok(SupervisorEvent::Finished { id, exit }) => {
                reap(&mut live, id, exit);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(connections = live.len(), "chat relay shutting down");
    if let Some(handle) = accept_thread {
        let _ = handle.join();
    }
    // Connections still queued by the listener never got a handler; their
    // seats go back as the events drop.
    while let Ok(event) = rx.try_recv() {
        match event {
            SupervisorEvent::Accepted { stream, .. } => stream.close(),
            SupervisorEvent::Finished { id, exit } => reap(&mut live, id, exit),
        }
    }
    for conn in live.values() {
        conn.transport.close();
    }
    registry.shutdown_all();
    for (id, conn) in live.drain() {
        if conn.thread.join().is_err() {
            warn!(%id, "handler thread panicked");
        }
    }
}

/// Assign an id to a freshly accepted connection and start its handler.
fn spawn_handler(
    stream: TcpStream,
    peer: SocketAddr,
    seat: Reservation,
    registry: &Arc<Registry<TcpStream>>,
    sink: &Arc<dyn OutputSink>,
    tx: &Sender<SupervisorEvent>,
    live: &mut HashMap<ConnectionId, LiveConnection>,
) {
    let id = ConnectionId::next();
    let transport = Arc::new(stream);
    let handler = ConnectionHandler::new(
        id,
        Arc::clone(&transport),
        Arc::clone(registry),
        Arc::clone(sink),
    )
    .with_reservation(seat);
    let tx = tx.clone();
    let spawned = thread::Builder::new()
        .name(format!("chat-{id}"))
        .spawn(move || {
            let exit = handler.run();
            let _ = tx.send(SupervisorEvent::Finished { id, exit });
        });
    match spawned {
        Ok(thread) => {
            debug!(%id, %peer, "connection accepted");
            live.insert(id, LiveConnection { transport, thread });
        }
        Err(e) => {
            warn!(%id, %peer, error = %e, "could not spawn handler; dropping connection");
            transport.close();
        }
    }
}

/// Join a finished handler thread.
fn reap(live: &mut HashMap<ConnectionId, LiveConnection>, id: ConnectionId, exit: Exit) {
    let panicked = live
        .remove(&id)
        .is_some_and(|conn| conn.thread.join().is_err());
    if panicked {
        warn!(%id, "handler thread panicked");
    }
    debug!(%id, ?exit, "connection finished");
}

/// Accept loop. Rejects connections while every seat is taken; hands the
/// rest to the supervisor.
fn accept_loop(
    listener: TcpListener,
    registry: Arc<Registry<TcpStream>>,
    tx: Sender<SupervisorEvent>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!(%peer, error = %e, "could not configure stream; dropping");
                    continue;
                }
                let seat = match registry.try_reserve() {
                    Ok(seat) => seat,
                    Err(RegistryError::Full { capacity }) => {
                        info!(
                            %peer,
                            capacity,
                            pending = registry.pending(),
                            "room full; rejecting"
                        );
                        let _ = stream.send(CAPACITY_REJECTION.as_bytes());
                        stream.close();
                        continue;
                    }
                };
                if tx.send(SupervisorEvent::Accepted { stream, peer, seat }).is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                warn!(error = %e, "error accepting user connection");
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use chatroom_protocol::message::welcome_message;

    use super::*;
    use crate::handler::MemorySink;

    fn local_config(max_participants: usize) -> RelayConfig {
        RelayConfig {
            port: 0,
            max_participants,
            ..RelayConfig::default()
        }
    }

    #[test]
    fn zero_capacity_config_refused() {
        let err = start_relay_with_sink(local_config(0), Arc::new(MemorySink::new()))
            .err()
            .expect("zero capacity must be rejected");
        assert!(matches!(err, RelayError::Config(_)), "got {err:?}");
    }

    #[test]
    fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = RelayConfig {
            port: taken.local_addr().unwrap().port(),
            ..local_config(2)
        };
        let err = start_relay_with_sink(config, Arc::new(MemorySink::new()))
            .err()
            .expect("port in use must fail to bind");
        assert!(matches!(err, RelayError::Bind { .. }), "got {err:?}");
    }

    #[test]
    fn banner_announced_on_start() {
        let sink = Arc::new(MemorySink::new());
        let (handle, _addr) = start_relay_with_sink(local_config(2), sink.clone()).unwrap();
        assert_eq!(sink.lines(), vec![BANNER.to_owned()]);
        handle.stop();
    }

    #[test]
    fn stop_disconnects_joined_clients() {
        let (handle, addr) =
            start_relay_with_sink(local_config(2), Arc::new(MemorySink::new())).unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.write_all(b"alice").unwrap();
        let mut buf = [0u8; 256];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], welcome_message().as_bytes());

        handle.stop();

        // The server shut the stream down: the next read sees EOF.
        let n = client.read(&mut buf).unwrap_or(0);
        assert_eq!(n, 0);
    }
}
