// Participant registry: the one piece of shared mutable state in the relay.
//
// `Registry<T>` tracks every admitted participant (connection handle, display
// name, shared transport) in an ordered `Vec`, newest at the front. Every
// handler thread and the broadcast engine hold an `Arc` to the same
// registry; there is no global.
//
// Locking discipline: a single `parking_lot::Mutex` guards the list, and
// every public method holds it for the whole call. Readers and writers are
// not distinguished. `for_each_except` keeps the lock across the visitor, so
// a broadcast that iterates through it is serialized against inserts,
// removals, and other broadcasts, and every broadcast sees one consistent
// membership. Writes to a participant's transport from threads other than
// its own handler (welcome in `admit`, notices in `send_to`, broadcasts)
// all happen under this lock, so two writers never interleave on a stream.
//
// Seats: the accept loop takes a `Reservation` for every connection it hands
// to a handler, and the capacity check counts registered participants plus
// outstanding reservations. A connection that never finishes its handshake
// still occupies a seat until it hangs up. Reservations are only taken and
// converted into registrations while the list lock is held, so the sum never
// undercounts; a failed handshake frees its seat with a bare atomic decrement.
//
// The list is small (bounded by the room capacity), so linear scans are fine.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chatroom_protocol::ConnectionId;
use chatroom_protocol::framing::WriteOutcome;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::RegistryError;
use crate::transport::Transport;

/// One connected, named chat client.
pub struct Participant<T> {
    id: ConnectionId,
    name: String,
    transport: Arc<T>,
}

// Manual impl: deriving would demand `T: Clone`, but only the `Arc` is cloned.
impl<T> Clone for Participant<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T> std::fmt::Debug for Participant<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<T> Participant<T> {
    pub fn new(id: ConnectionId, name: String, transport: Arc<T>) -> Self {
        Self {
            id,
            name,
            transport,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }
}

/// What a `for_each_except` visitor wants done with the current entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visit {
    Keep,
    Remove,
}

/// A seat held for a connection that is still in its handshake. Dropping it
/// gives the seat back.
#[derive(Debug)]
pub struct Reservation {
    pending: Arc<AtomicUsize>,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Concurrent, capacity-bounded, insertion-ordered set of participants.
pub struct Registry<T> {
    participants: Mutex<Vec<Participant<T>>>,
    pending: Arc<AtomicUsize>,
    capacity: usize,
}

impl<T: Transport> Registry<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            participants: Mutex::new(Vec::with_capacity(capacity)),
            pending: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    /// Maximum number of simultaneous participants.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add a participant at the front. Fails only when the room is full.
    ///
    /// Handles come from `ConnectionId::next()`, so the same handle is never
    /// inserted twice.
    pub fn insert(&self, participant: Participant<T>) -> Result<(), RegistryError> {
        let mut list = self.participants.lock();
        self.check_capacity(&list)?;
        debug_assert!(list.iter().all(|p| p.id != participant.id));
        debug!(id = %participant.id, name = %participant.name, "registered");
        list.insert(0, participant);
        Ok(())
    }

    /// Hold a seat for a connection that has not sent its username yet.
    /// Fails when registered participants plus held seats fill the room.
    pub fn try_reserve(&self) -> Result<Reservation, RegistryError> {
        let list = self.participants.lock();
        if list.len() + self.pending.load(Ordering::SeqCst) >= self.capacity {
            return Err(RegistryError::Full {
                capacity: self.capacity,
            });
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        Ok(Reservation {
            pending: Arc::clone(&self.pending),
        })
    }

    /// Number of seats held by connections still in their handshake.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Check capacity, write `welcome` to the newcomer, insert it, and give
    /// back its seat, all in one critical section, so no broadcast can reach
    /// the newcomer before its welcome and the seat is never counted twice
    /// or not at all. A newcomer whose welcome write finds the peer gone is
    /// not inserted; the write outcome is returned either way.
    pub fn admit(
        &self,
        participant: Participant<T>,
        welcome: &[u8],
        seat: Option<Reservation>,
    ) -> Result<WriteOutcome, RegistryError> {
        let mut list = self.participants.lock();
        self.check_capacity(&list)?;
        let outcome = participant.transport.send(welcome);
        if !matches!(outcome, WriteOutcome::PeerGone) {
            debug!(id = %participant.id, name = %participant.name, "admitted");
            list.insert(0, participant);
        }
        drop(seat);
        Ok(outcome)
    }

    /// Remove the participant with this handle. Absent handles are a no-op,
    /// since handler teardown can race with broadcast eviction.
    pub fn remove(&self, id: ConnectionId) -> Option<Participant<T>> {
        let mut list = self.participants.lock();
        let pos = list.iter().position(|p| p.id == id)?;
        let removed = list.remove(pos);
        debug!(%id, name = %removed.name, "unregistered");
        Some(removed)
    }

    pub fn lookup(&self, id: ConnectionId) -> Option<Participant<T>> {
        self.participants
            .lock()
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.participants.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.lock().is_empty()
    }

    /// Visit every participant except `excluded`, newest first, holding the
    /// lock throughout. Returning `Visit::Remove` drops the current entry and
    /// iteration continues with the next one.
    pub fn for_each_except<F>(&self, excluded: ConnectionId, mut visitor: F)
    where
        F: FnMut(&Participant<T>) -> Visit,
    {
        let mut list = self.participants.lock();
        let mut i = 0;
        while i < list.len() {
            if list[i].id == excluded {
                i += 1;
                continue;
            }
            match visitor(&list[i]) {
                Visit::Keep => i += 1,
                Visit::Remove => {
                    let removed = list.remove(i);
                    debug!(id = %removed.id, name = %removed.name, "pruned");
                }
            }
        }
    }

    /// Write to a single registered participant under the lock. Returns
    /// `None` if the handle is not registered.
    pub fn send_to(&self, id: ConnectionId, msg: &[u8]) -> Option<WriteOutcome> {
        let list = self.participants.lock();
        list.iter()
            .find(|p| p.id == id)
            .map(|p| p.transport.send(msg))
    }

    /// Snapshot of `(handle, name)` pairs in iteration order.
    pub fn participants(&self) -> Vec<(ConnectionId, String)> {
        self.participants
            .lock()
            .iter()
            .map(|p| (p.id, p.name.clone()))
            .collect()
    }

    /// Close every registered transport. Entries stay registered; each
    /// handler removes itself once its blocked read returns. Returns how many
    /// transports were closed.
    pub fn shutdown_all(&self) -> usize {
        let list = self.participants.lock();
        for p in list.iter() {
            p.transport.close();
        }
        list.len()
    }

    fn check_capacity(&self, list: &[Participant<T>]) -> Result<(), RegistryError> {
        if list.len() >= self.capacity {
            return Err(RegistryError::Full {
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::transport::memory::{MemoryTransport, WriteMode};

    fn participant(n: u64, name: &str) -> Participant<MemoryTransport> {
        Participant::new(
            ConnectionId(n),
            name.into(),
            Arc::new(MemoryTransport::new()),
        )
    }

    fn visit_order(registry: &Registry<MemoryTransport>, excluded: u64) -> Vec<String> {
        let mut names = Vec::new();
        registry.for_each_except(ConnectionId(excluded), |p| {
            names.push(p.name().to_owned());
            Visit::Keep
        });
        names
    }

    #[test]
    fn insert_puts_newest_first() {
        let registry = Registry::new(10);
        registry.insert(participant(1, "alice")).unwrap();
        registry.insert(participant(2, "bob")).unwrap();
        registry.insert(participant(3, "carol")).unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(visit_order(&registry, 0), vec!["carol", "bob", "alice"]);
    }

    #[test]
    fn lookup_missing_is_none() {
        let registry = Registry::new(10);
        registry.insert(participant(1, "alice")).unwrap();
        assert_eq!(registry.lookup(ConnectionId(1)).unwrap().name(), "alice");
        assert!(registry.lookup(ConnectionId(99)).is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = Registry::new(10);
        registry.insert(participant(1, "alice")).unwrap();
        registry.insert(participant(2, "bob")).unwrap();

        assert!(registry.remove(ConnectionId(1)).is_some());
        let after_once = registry.participants();
        assert!(registry.remove(ConnectionId(1)).is_none());

        assert_eq!(registry.participants(), after_once);
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(ConnectionId(1)).is_none());
    }

    #[test]
    fn full_registry_refuses_insert() {
        let registry = Registry::new(2);
        registry.insert(participant(1, "alice")).unwrap();
        registry.insert(participant(2, "bob")).unwrap();

        let err = registry.insert(participant(3, "carol")).unwrap_err();
        assert_eq!(err, RegistryError::Full { capacity: 2 });
        assert!(registry.lookup(ConnectionId(3)).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn for_each_except_skips_excluded() {
        let registry = Registry::new(10);
        registry.insert(participant(1, "alice")).unwrap();
        registry.insert(participant(2, "bob")).unwrap();
        registry.insert(participant(3, "carol")).unwrap();

        assert_eq!(visit_order(&registry, 2), vec!["carol", "alice"]);
    }

    #[test]
    fn removing_mid_iteration_visits_everyone_once() {
        let registry = Registry::new(10);
        for (n, name) in [(1, "a"), (2, "b"), (3, "c"), (4, "d")] {
            registry.insert(participant(n, name)).unwrap();
        }

        let mut seen = Vec::new();
        registry.for_each_except(ConnectionId(0), |p| {
            seen.push(p.name().to_owned());
            if p.name() == "c" || p.name() == "b" {
                Visit::Remove
            } else {
                Visit::Keep
            }
        });

        assert_eq!(seen, vec!["d", "c", "b", "a"]);
        assert_eq!(registry.len(), 2);
        assert_eq!(visit_order(&registry, 0), vec!["d", "a"]);
    }

    #[test]
    fn admit_welcomes_then_registers() {
        let registry = Registry::new(10);
        let transport = Arc::new(MemoryTransport::new());
        let p = Participant::new(ConnectionId(1), "alice".into(), Arc::clone(&transport));

        let outcome = registry.admit(p, b"welcome", None).unwrap();
        assert!(matches!(outcome, WriteOutcome::Delivered(7)));
        assert_eq!(transport.sent(), vec![b"welcome".to_vec()]);
        assert!(registry.lookup(ConnectionId(1)).is_some());
    }

    #[test]
    fn admit_skips_peer_that_is_already_gone() {
        let registry = Registry::new(10);
        let transport = Arc::new(MemoryTransport::new());
        transport.set_write_mode(WriteMode::Zero);
        let p = Participant::new(ConnectionId(1), "ghost".into(), transport);

        let outcome = registry.admit(p, b"welcome", None).unwrap();
        assert!(matches!(outcome, WriteOutcome::PeerGone));
        assert!(registry.is_empty());
    }

    #[test]
    fn admit_respects_capacity() {
        let registry = Registry::new(1);
        registry.insert(participant(1, "alice")).unwrap();

        let transport = Arc::new(MemoryTransport::new());
        let p = Participant::new(ConnectionId(2), "bob".into(), Arc::clone(&transport));
        assert!(registry.admit(p, b"welcome", None).is_err());
        assert!(transport.sent().is_empty(), "no welcome for a full room");
        assert!(registry.lookup(ConnectionId(2)).is_none());
    }

    #[test]
    fn reservations_count_against_capacity() {
        let registry: Registry<MemoryTransport> = Registry::new(2);
        registry.insert(participant(1, "alice")).unwrap();

        let seat = registry.try_reserve().unwrap();
        assert_eq!(registry.pending(), 1);
        assert_eq!(
            registry.try_reserve().unwrap_err(),
            RegistryError::Full { capacity: 2 }
        );

        drop(seat);
        assert_eq!(registry.pending(), 0);
        assert!(registry.try_reserve().is_ok());
    }

    #[test]
    fn admit_turns_seat_into_registration() {
        let registry = Registry::new(1);
        let seat = registry.try_reserve().unwrap();
        let transport = Arc::new(MemoryTransport::new());
        let p = Participant::new(ConnectionId(1), "alice".into(), transport);

        registry.admit(p, b"welcome", Some(seat)).unwrap();
        assert_eq!(registry.pending(), 0);
        assert_eq!(registry.len(), 1);
        assert!(registry.try_reserve().is_err(), "room is full");
    }

    #[test]
    fn seat_freed_when_peer_gone_before_welcome() {
        let registry = Registry::new(1);
        let seat = registry.try_reserve().unwrap();
        let transport = Arc::new(MemoryTransport::new());
        transport.set_write_mode(WriteMode::Zero);
        let p = Participant::new(ConnectionId(1), "ghost".into(), transport);

        registry.admit(p, b"welcome", Some(seat)).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.pending(), 0);
        assert!(registry.try_reserve().is_ok());
    }

    #[test]
    fn send_to_only_reaches_registered() {
        let registry = Registry::new(10);
        let transport = Arc::new(MemoryTransport::new());
        registry
            .insert(Participant::new(
                ConnectionId(1),
                "alice".into(),
                Arc::clone(&transport),
            ))
            .unwrap();

        assert!(registry.send_to(ConnectionId(1), b"notice").is_some());
        assert!(registry.send_to(ConnectionId(2), b"notice").is_none());
        assert_eq!(transport.sent_text(), vec!["notice"]);
    }

    #[test]
    fn shutdown_all_closes_transports() {
        let registry = Registry::new(10);
        let a = Arc::new(MemoryTransport::new());
        let b = Arc::new(MemoryTransport::new());
        registry
            .insert(Participant::new(ConnectionId(1), "a".into(), Arc::clone(&a)))
            .unwrap();
        registry
            .insert(Participant::new(ConnectionId(2), "b".into(), Arc::clone(&b)))
            .unwrap();

        assert_eq!(registry.shutdown_all(), 2);
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[test]
    fn concurrent_insert_remove_stays_consistent() {
        let registry = Arc::new(Registry::new(10_000));
        let threads: Vec<_> = (0..8u64)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..200u64 {
                        let id = t * 1000 + i;
                        registry.insert(participant(id, "p")).unwrap();
                        if i % 2 == 0 {
                            registry.remove(ConnectionId(id));
                            // Second removal races nothing but must be harmless.
                            registry.remove(ConnectionId(id));
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let present = (0..8u64)
            .flat_map(|t| (0..200u64).map(move |i| t * 1000 + i))
            .filter(|id| registry.lookup(ConnectionId(*id)).is_some())
            .count();
        assert_eq!(registry.len(), present);
        assert_eq!(present, 8 * 100);
    }
}
