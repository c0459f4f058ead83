use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tether_core::{Message, NodeId, Transport, TransportError};
use tracing::trace;

use crate::network::{Envelope, FaultConfig, SimulatedNetwork};
use crate::rng::DeterministicRng;

/// Network state shared by every node's transport and the cluster clock.
#[derive(Debug)]
pub struct Wire {
    pub network: SimulatedNetwork,
    pub rng: DeterministicRng,
    pub round: u64,
}

/// Handle to the shared [`Wire`].
#[derive(Debug, Clone)]
pub struct SharedWire(Arc<Mutex<Wire>>);

impl SharedWire {
    #[must_use]
    pub fn new(fault: FaultConfig, rng: DeterministicRng) -> Self {
        Self(Arc::new(Mutex::new(Wire {
            network: SimulatedNetwork::new(fault),
            rng,
            round: 0,
        })))
    }

    pub fn lock(&self) -> MutexGuard<'_, Wire> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// [`Transport`] over the simulated network.
#[derive(Debug, Clone)]
pub struct SimTransport {
    me: NodeId,
    peers: Vec<NodeId>,
    wire: SharedWire,
}

impl SimTransport {
    /// Transport for `me`, replicating to every other id in `members`.
    #[must_use]
    pub fn new(me: NodeId, members: &[NodeId], wire: SharedWire) -> Self {
        let peers = members.iter().filter(|id| **id != me).cloned().collect();
        Self { me, peers, wire }
    }
}

impl Transport for SimTransport {
    fn peers(&self) -> Vec<NodeId> {
        self.peers.clone()
    }

    fn send(&self, to: &NodeId, msg: Message) -> Result<(), TransportError> {
        if !self.peers.contains(to) {
            return Err(TransportError::Unreachable(to.clone()));
        }
        let mut guard = self.wire.lock();
        let Wire {
            network,
            rng,
            round,
        } = &mut *guard;
        let outcome = network.send(
            Envelope {
                from: self.me.clone(),
                to: to.clone(),
                message: msg,
            },
            *round,
            rng,
        );
        trace!(
            from = %self.me,
            %to,
            round = *round,
            dropped = outcome.dropped,
            duplicated = outcome.duplicated,
            at = outcome.deliver_at_round,
            "sim send"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{GetMask, Hash, Status};

    #[test]
    fn peers_exclude_self_and_unknowns_fail() {
        let ids: Vec<NodeId> = ["a", "b", "c"].into_iter().map(NodeId::new).collect();
        let wire = SharedWire::new(FaultConfig::none(), DeterministicRng::new(0));
        let t = SimTransport::new(NodeId::new("a"), &ids, wire.clone());
        assert_eq!(t.peers(), vec![NodeId::new("b"), NodeId::new("c")]);

        let msg = Message::get_request(
            NodeId::new("a"),
            Hash::sum(b"x"),
            Status::LIVE,
            GetMask::ENTRY,
        );
        assert!(t.send(&NodeId::new("b"), msg.clone()).is_ok());
        assert_eq!(wire.lock().network.pending_len(), 1);
        assert_eq!(
            t.send(&NodeId::new("z"), msg),
            Err(TransportError::Unreachable(NodeId::new("z")))
        );
    }
}
