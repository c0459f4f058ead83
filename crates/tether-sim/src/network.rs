use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tether_core::{Message, NodeId};
use tracing::trace;

use crate::rng::DeterministicRng;

/// Fault injection configuration for simulated delivery.
///
/// Faults delay messages; none lose them. A dropped send is retransmitted by
/// the sender after a timeout, and traffic to or from a partitioned node waits
/// until the partition heals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Maximum delivery delay in rounds.
    pub max_delay_rounds: u8,
    /// Percentage of send attempts dropped and retransmitted later.
    pub drop_rate_percent: u8,
    /// Percentage of sends delivered twice.
    pub duplicate_rate_percent: u8,
    /// Percentage chance of reversing the ready batch at each tick.
    pub reorder_rate_percent: u8,
    /// Percentage chance per round to isolate a random node.
    pub partition_rate_percent: u8,
    /// Rounds an isolated node stays isolated.
    pub partition_duration_rounds: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_delay_rounds: 2,
            drop_rate_percent: 5,
            duplicate_rate_percent: 3,
            reorder_rate_percent: 5,
            partition_rate_percent: 2,
            partition_duration_rounds: 3,
        }
    }
}

impl FaultConfig {
    /// Reliable, in-order, next-round delivery.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_delay_rounds: 0,
            drop_rate_percent: 0,
            duplicate_rate_percent: 0,
            reorder_rate_percent: 0,
            partition_rate_percent: 0,
            partition_duration_rounds: 0,
        }
    }

    fn retransmit_after(&self) -> u64 {
        u64::from(self.max_delay_rounds) + 1
    }
}

/// A message in flight between two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: NodeId,
    pub to: NodeId,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pending {
    deliver_at_round: u64,
    envelope: Envelope,
}

/// Result of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOutcome {
    /// First attempt lost; a retransmission is queued.
    pub dropped: bool,
    pub duplicated: bool,
    /// Round at which the (re)transmission becomes deliverable.
    pub deliver_at_round: u64,
}

/// Result of delivering every ready message for a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverOutcome {
    pub delivered: Vec<Envelope>,
    pub reordered: bool,
    /// Ready messages held back by a partition.
    pub deferred: usize,
}

/// Deterministic fault-injecting network model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedNetwork {
    pending: Vec<Pending>,
    /// Isolated node and the round its partition heals.
    partitions: BTreeMap<NodeId, u64>,
    fault: FaultConfig,
}

impl SimulatedNetwork {
    #[must_use]
    pub const fn new(fault: FaultConfig) -> Self {
        Self {
            pending: Vec::new(),
            partitions: BTreeMap::new(),
            fault,
        }
    }

    #[must_use]
    pub const fn fault_config(&self) -> FaultConfig {
        self.fault
    }

    /// Isolate `node` until `heal_at_round`.
    pub fn partition(&mut self, node: NodeId, heal_at_round: u64) {
        self.partitions.insert(node, heal_at_round);
    }

    #[must_use]
    pub fn is_partitioned(&self, node: &NodeId) -> bool {
        self.partitions.contains_key(node)
    }

    #[must_use]
    pub const fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Heal expired partitions, then maybe isolate one of `nodes`.
    pub fn advance_partitions(&mut self, round: u64, nodes: &[NodeId], rng: &mut DeterministicRng) {
        self.partitions.retain(|node, heal_at| {
            let keep = *heal_at > round;
            if !keep {
                trace!(%node, round, "partition healed");
            }
            keep
        });

        if nodes.is_empty() || !rng.hit_rate_percent(self.fault.partition_rate_percent) {
            return;
        }
        let node = nodes[rng.next_index(nodes.len())].clone();
        let heal_at = round + u64::from(self.fault.partition_duration_rounds.max(1));
        trace!(%node, round, heal_at, "partition started");
        self.partition(node, heal_at);
    }

    /// Queue `envelope` for delivery, applying drop/delay/duplicate faults.
    pub fn send(
        &mut self,
        envelope: Envelope,
        round: u64,
        rng: &mut DeterministicRng,
    ) -> SendOutcome {
        let dropped = rng.hit_rate_percent(self.fault.drop_rate_percent);
        let base = if dropped {
            round + self.fault.retransmit_after()
        } else {
            round
        };
        let delay = rng.next_bounded(u64::from(self.fault.max_delay_rounds) + 1);
        let deliver_at_round = base + delay + 1;

        let duplicated = rng.hit_rate_percent(self.fault.duplicate_rate_percent);
        if duplicated {
            self.pending.push(Pending {
                deliver_at_round,
                envelope: envelope.clone(),
            });
        }
        self.pending.push(Pending {
            deliver_at_round,
            envelope,
        });

        SendOutcome {
            dropped,
            duplicated,
            deliver_at_round,
        }
    }

    /// Take every message deliverable at `round`.
    ///
    /// Messages touching a partitioned node stay queued for the next round.
    pub fn deliver_ready(&mut self, round: u64, rng: &mut DeterministicRng) -> DeliverOutcome {
        let mut ready = Vec::new();
        let mut future = Vec::new();
        let mut deferred = 0;

        for mut pending in self.pending.drain(..) {
            if pending.deliver_at_round > round {
                future.push(pending);
            } else if self.partitions.contains_key(&pending.envelope.from)
                || self.partitions.contains_key(&pending.envelope.to)
            {
                deferred += 1;
                pending.deliver_at_round = round + 1;
                future.push(pending);
            } else {
                ready.push(pending.envelope);
            }
        }
        self.pending = future;

        let reordered = ready.len() > 1 && rng.hit_rate_percent(self.fault.reorder_rate_percent);
        if reordered {
            ready.reverse();
        }

        DeliverOutcome {
            delivered: ready,
            reordered,
            deferred,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{GetMask, Hash, Status};

    fn envelope(to: &str) -> Envelope {
        Envelope {
            from: NodeId::new("a"),
            to: NodeId::new(to),
            message: Message::get_request(
                NodeId::new("a"),
                Hash::sum(b"x"),
                Status::LIVE,
                GetMask::ENTRY,
            ),
        }
    }

    fn drain(net: &mut SimulatedNetwork, rng: &mut DeterministicRng, rounds: u64) -> usize {
        (1..=rounds)
            .map(|round| net.deliver_ready(round, rng).delivered.len())
            .sum()
    }

    #[test]
    fn reliable_delivery_next_round() {
        let mut net = SimulatedNetwork::new(FaultConfig::none());
        let mut rng = DeterministicRng::new(0);
        let out = net.send(envelope("b"), 0, &mut rng);
        assert_eq!(out.deliver_at_round, 1);
        assert!(net.deliver_ready(0, &mut rng).delivered.is_empty());
        assert_eq!(net.deliver_ready(1, &mut rng).delivered, vec![envelope("b")]);
        assert_eq!(net.pending_len(), 0);
    }

    #[test]
    fn drops_are_retransmitted() {
        let fault = FaultConfig {
            drop_rate_percent: 100,
            ..FaultConfig::none()
        };
        let mut net = SimulatedNetwork::new(fault);
        let mut rng = DeterministicRng::new(0);
        let out = net.send(envelope("b"), 0, &mut rng);
        assert!(out.dropped);
        assert!(out.deliver_at_round > 1);
        assert_eq!(drain(&mut net, &mut rng, out.deliver_at_round), 1);
    }

    #[test]
    fn duplicates_arrive_twice() {
        let fault = FaultConfig {
            duplicate_rate_percent: 100,
            ..FaultConfig::none()
        };
        let mut net = SimulatedNetwork::new(fault);
        let mut rng = DeterministicRng::new(0);
        net.send(envelope("b"), 0, &mut rng);
        assert_eq!(net.deliver_ready(1, &mut rng).delivered.len(), 2);
    }

    #[test]
    fn partition_defers_until_healed() {
        let mut net = SimulatedNetwork::new(FaultConfig::none());
        let mut rng = DeterministicRng::new(0);
        net.partition(NodeId::new("b"), 3);
        net.send(envelope("b"), 0, &mut rng);
        net.send(envelope("c"), 0, &mut rng);

        let first = net.deliver_ready(1, &mut rng);
        assert_eq!(first.delivered, vec![envelope("c")]);
        assert_eq!(first.deferred, 1);

        net.advance_partitions(3, &[], &mut rng);
        assert!(!net.is_partitioned(&NodeId::new("b")));
        assert_eq!(net.deliver_ready(3, &mut rng).delivered, vec![envelope("b")]);
    }

    #[test]
    fn every_send_eventually_delivers_under_faults() {
        let fault = FaultConfig {
            max_delay_rounds: 3,
            drop_rate_percent: 30,
            duplicate_rate_percent: 10,
            reorder_rate_percent: 50,
            partition_rate_percent: 20,
            partition_duration_rounds: 2,
        };
        let nodes: Vec<NodeId> = ["a", "b", "c"].into_iter().map(NodeId::new).collect();
        let mut net = SimulatedNetwork::new(fault);
        let mut rng = DeterministicRng::new(42);
        for to in ["b", "c", "b", "c"] {
            net.send(envelope(to), 0, &mut rng);
        }
        let mut delivered = 0;
        for round in 1..200 {
            net.advance_partitions(round, &nodes, &mut rng);
            delivered += net.deliver_ready(round, &mut rng).delivered.len();
            if net.pending_len() == 0 {
                break;
            }
        }
        assert_eq!(net.pending_len(), 0);
        assert!(delivered >= 4);
    }
}
