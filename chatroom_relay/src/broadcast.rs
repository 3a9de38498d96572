// Broadcast engine: fan one chat line out to every other participant.
//
// The whole fan-out runs inside `Registry::for_each_except`, i.e. under the
// registry lock. Consequences:
// - broadcasts are totally ordered, and every receiver sees that order;
// - a participant removed before the fan-out starts never receives it;
// - a dead peer is evicted in the same pass that discovers it.
//
// Writes are sequential and have no timeout, so one stalled receiver stalls
// the round for everybody. At chat-room scale that is acceptable.
//
// Only a "peer gone" write result evicts. Other write errors are transient:
// the participant stays registered and simply misses this message.

use chatroom_protocol::ConnectionId;
use chatroom_protocol::framing::WriteOutcome;
use tracing::{debug, info};

use crate::registry::{Registry, Visit};
use crate::transport::Transport;

/// What happened during one broadcast.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients that accepted the whole message.
    pub delivered: usize,
    /// Recipients found dead and removed from the registry.
    pub evicted: Vec<ConnectionId>,
    /// Recipients whose write failed transiently.
    pub failed: usize,
}

/// Send `message` to every registered participant except `sender`.
pub fn broadcast<T: Transport>(
    registry: &Registry<T>,
    sender: ConnectionId,
    message: &[u8],
) -> BroadcastReport {
    let mut report = BroadcastReport::default();
    registry.for_each_except(sender, |participant| {
        match participant.transport().send(message) {
            WriteOutcome::Delivered(_) => {
                report.delivered += 1;
                Visit::Keep
            }
            WriteOutcome::PeerGone => {
                info!(
                    id = %participant.id(),
                    name = participant.name(),
                    "evicting dead participant"
                );
                report.evicted.push(participant.id());
                Visit::Remove
            }
            WriteOutcome::Failed(e) => {
                debug!(id = %participant.id(), error = %e, "transient send failure");
                report.failed += 1;
                Visit::Keep
            }
        }
    });
    debug!(
        %sender,
        delivered = report.delivered,
        evicted = report.evicted.len(),
        failed = report.failed,
        "broadcast complete"
    );
    report
}
