//! A set of nodes wired through one simulated network.
//!
//! Time advances only through [`Cluster::tick`]: each tick heals or starts
//! partitions, then hands every deliverable message to its receiving node.
//! Request/response traffic ([`Cluster::send_request`]) bypasses the network
//! and returns the receiver's dispatch result directly.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tether_core::action::ActionError;
use tether_core::config::NodeConfig;
use tether_core::dht::{DhtError, GetResponse, PollPolicy, poll};
use tether_core::entry::{DataFormat, Sharing};
use tether_core::{
    Action, EntryDef, EntryDefRegistry, GetMask, Hash, Message, Node, NodeError, NodeId,
    Response, Signature, Signer, Status,
};
use tracing::{debug, warn};

use crate::network::FaultConfig;
use crate::rng::DeterministicRng;
use crate::transport::{SharedWire, SimTransport};

/// Application entry type registered on every simulated node.
pub const POST_ENTRY_TYPE: &str = "post";
/// Private application entry type registered on every simulated node.
pub const NOTE_ENTRY_TYPE: &str = "note";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub seed: u64,
    pub node_count: usize,
    pub fault: FaultConfig,
    /// Applied to every node.
    #[serde(default)]
    pub node: NodeConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            node_count: 3,
            fault: FaultConfig::default(),
            node: NodeConfig::default(),
        }
    }
}

/// Deterministic per-node signer: BLAKE3 keyed by the node id.
#[derive(Debug, Clone)]
pub struct SimSigner {
    key: [u8; 32],
}

impl SimSigner {
    #[must_use]
    pub fn new(node: &NodeId) -> Self {
        Self {
            key: *blake3::hash(node.as_str().as_bytes()).as_bytes(),
        }
    }
}

impl Signer for SimSigner {
    fn sign(&self, payload: &[u8]) -> Signature {
        Signature(blake3::keyed_hash(&self.key, payload).as_bytes().to_vec())
    }
}

/// The entry definitions every simulated node agrees on.
///
/// # Errors
///
/// Never in practice; registration only fails on reserved or duplicate names.
pub fn sim_registry() -> Result<EntryDefRegistry> {
    let mut registry = EntryDefRegistry::with_system_defs();
    registry.register(EntryDef::new(POST_ENTRY_TYPE, DataFormat::String, Sharing::Public))?;
    registry.register(EntryDef::new(NOTE_ENTRY_TYPE, DataFormat::String, Sharing::Private))?;
    Ok(registry)
}

/// Counts from one [`Cluster::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub round: u64,
    pub delivered: usize,
    pub rejected: usize,
    pub deferred: usize,
    pub reordered: bool,
}

#[derive(Debug)]
pub struct Cluster {
    ids: Vec<NodeId>,
    nodes: Vec<Node>,
    wire: SharedWire,
}

impl Cluster {
    /// Build `config.node_count` nodes sharing one network.
    ///
    /// # Errors
    ///
    /// Returns an error if `node_count` is zero.
    pub fn new(config: ClusterConfig) -> Result<Self> {
        let ClusterConfig {
            seed,
            node_count,
            fault,
            node: node_config,
        } = config;
        if node_count == 0 {
            bail!("node_count must be > 0");
        }
        let ids: Vec<NodeId> = (0..node_count)
            .map(|i| NodeId::new(format!("node-{i}")))
            .collect();
        let wire = SharedWire::new(fault, DeterministicRng::new(seed));
        let registry = sim_registry()?;

        let nodes = ids
            .iter()
            .map(|id| {
                Node::new(
                    id.clone(),
                    registry.clone(),
                    Box::new(SimTransport::new(id.clone(), &ids, wire.clone())),
                    Box::new(SimSigner::new(id)),
                )
                .with_config(node_config.clone())
            })
            .collect();

        Ok(Self { ids, nodes, wire })
    }

    #[must_use]
    pub fn node(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[must_use]
    pub fn ids(&self) -> &[NodeId] {
        &self.ids
    }

    #[must_use]
    pub fn round(&self) -> u64 {
        self.wire.lock().round
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.wire.lock().network.pending_len()
    }

    fn node_or_err(&self, index: usize) -> Result<&Node> {
        match self.nodes.get(index) {
            Some(node) => Ok(node),
            None => bail!("no node at index {index}, cluster has {}", self.nodes.len()),
        }
    }

    /// Commit `action` on node `index`.
    ///
    /// # Errors
    ///
    /// Unknown index, or the node's commit error.
    pub fn commit(&self, index: usize, action: Action) -> Result<(Hash, Action)> {
        Ok(self.node_or_err(index)?.commit(action)?)
    }

    /// Like [`Cluster::commit`], but keeps the typed node error.
    ///
    /// # Errors
    ///
    /// Unknown index, or the node's [`NodeError`].
    pub fn try_commit(
        &self,
        index: usize,
        action: Action,
    ) -> Result<Result<(Hash, Action), NodeError>> {
        Ok(self.node_or_err(index)?.commit(action))
    }

    /// Advance one round and deliver everything that is ready.
    pub fn tick(&self) -> TickReport {
        let (round, outcome) = {
            let mut wire = self.wire.lock();
            wire.round += 1;
            let round = wire.round;
            let crate::transport::Wire { network, rng, .. } = &mut *wire;
            network.advance_partitions(round, &self.ids, rng);
            (round, network.deliver_ready(round, rng))
        };

        let mut report = TickReport {
            round,
            deferred: outcome.deferred,
            reordered: outcome.reordered,
            ..TickReport::default()
        };
        for envelope in outcome.delivered {
            let Some(node) = self
                .ids
                .iter()
                .position(|id| *id == envelope.to)
                .and_then(|i| self.nodes.get(i))
            else {
                warn!(to = %envelope.to, "envelope for unknown node dropped");
                continue;
            };
            match node.receive(&envelope.message) {
                Ok(_) => report.delivered += 1,
                Err(err) => {
                    report.rejected += 1;
                    warn!(
                        node = %node.id(),
                        from = %envelope.from,
                        code = %err.code(),
                        "delivery rejected: {err}"
                    );
                }
            }
        }
        debug!(round, delivered = report.delivered, deferred = report.deferred, "tick");
        report
    }

    /// Tick until nothing is in flight; returns the rounds taken.
    ///
    /// # Errors
    ///
    /// Returns an error if messages are still in flight after `max_rounds`.
    pub fn settle(&self, max_rounds: u64) -> Result<u64> {
        for taken in 0..=max_rounds {
            if self.in_flight() == 0 {
                return Ok(taken);
            }
            if taken < max_rounds {
                self.tick();
            }
        }
        bail!(
            "cluster did not settle within {max_rounds} rounds, {} messages in flight",
            self.in_flight()
        )
    }

    /// Read from node `index`, ticking the cluster between misses.
    ///
    /// # Errors
    ///
    /// [`DhtError::NotFound`] once `max_rounds` ticks have passed without the
    /// record becoming visible, or immediately for an unknown index.
    pub fn get_settled(
        &self,
        index: usize,
        hash: &Hash,
        filter: Status,
        mask: GetMask,
        max_rounds: u32,
    ) -> Result<GetResponse, DhtError> {
        let node = self.nodes.get(index).ok_or(DhtError::NotFound(*hash))?;
        let policy = PollPolicy {
            attempts: max_rounds.saturating_add(1),
            backoff_ms: 0,
        };
        poll(
            &policy,
            || node.get(hash, filter, mask),
            |_| {
                self.tick();
            },
        )
    }

    /// Deliver `msg` synchronously to node `to` as a request.
    ///
    /// # Errors
    ///
    /// Unknown index, otherwise the receiver's dispatch result in the inner
    /// `Result`.
    pub fn send_request(&self, to: usize, msg: &Message) -> Result<Result<Response, ActionError>> {
        Ok(self.node_or_err(to)?.receive(msg))
    }
}
