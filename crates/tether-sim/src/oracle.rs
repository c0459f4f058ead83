//! Post-settle invariant checks for a simulated cluster.

use tether_core::action::ActionError;
use tether_core::chain::verify_chain;
use tether_core::message::HoldReq;
use tether_core::{Action, ActionBehavior, ActionKind, GetMask, Hash, Message, Status};

use crate::cluster::Cluster;

/// One public commit made during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub origin: usize,
    pub hash: Hash,
    pub action: Action,
}

/// Outcome of an oracle check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

/// A single failed invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A node does not hold a committed entry live.
    Missing { node: usize, hash: Hash },

    /// A node holds different bytes than the origin committed.
    Divergent { node: usize, hash: Hash },

    /// A node's chain back-links do not verify.
    BrokenChain { node: usize, reason: String },

    /// A peer accepted a migrate entry pushed as a request.
    MigrateAccepted { node: usize, hash: Hash },

    /// A peer refused a migrate request with the wrong error.
    WrongRefusal { node: usize, hash: Hash, error: String },
}

pub struct ReplicationOracle;

impl ReplicationOracle {
    /// Every node holds every commit live, byte-identical to the origin's
    /// canonical entry.
    #[must_use]
    pub fn check_replication(cluster: &Cluster, committed: &[Committed]) -> OracleResult {
        let expected: Vec<(Hash, Vec<u8>)> = committed
            .iter()
            .map(|c| (c.hash, c.action.entry().marshal()))
            .collect();

        let mut violations = Vec::new();
        for (node_index, node) in cluster.nodes().iter().enumerate() {
            for (hash, bytes) in &expected {
                match node.get(hash, Status::LIVE, GetMask::ENTRY) {
                    Ok(got) if got.entry.as_ref() == Some(bytes) => {}
                    Ok(_) => violations.push(InvariantViolation::Divergent {
                        node: node_index,
                        hash: *hash,
                    }),
                    Err(_) => violations.push(InvariantViolation::Missing {
                        node: node_index,
                        hash: *hash,
                    }),
                }
            }
        }
        OracleResult::from_violations(violations)
    }

    /// Every node's chain verifies from genesis.
    #[must_use]
    pub fn check_chains(cluster: &Cluster) -> OracleResult {
        let violations = cluster
            .nodes()
            .iter()
            .enumerate()
            .filter_map(|(index, node)| {
                let reason = match node.chain_headers() {
                    Ok(headers) => verify_chain(&headers).err()?.to_string(),
                    Err(err) => err.to_string(),
                };
                Some(InvariantViolation::BrokenChain {
                    node: index,
                    reason,
                })
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    /// Pushing a migrate entry to any peer as a `PUT_REQUEST` is refused with
    /// the receive error and leaves the peer's store unchanged.
    #[must_use]
    pub fn check_migrate_refused(cluster: &Cluster, committed: &[Committed]) -> OracleResult {
        let mut violations = Vec::new();
        for c in committed
            .iter()
            .filter(|c| c.action.kind() == ActionKind::Migrate)
        {
            let Some(origin) = cluster.ids().get(c.origin) else {
                continue;
            };
            let msg = Message::put_request(
                origin.clone(),
                HoldReq {
                    entry_type: c.action.entry_type().to_string(),
                    entry_hash: c.hash,
                    entry: c.action.entry(),
                    header: c.action.header().cloned(),
                },
            );
            for (index, node) in cluster.nodes().iter().enumerate() {
                if index == c.origin {
                    continue;
                }
                let before = node.dht().record(&c.hash);
                match node.receive(&msg) {
                    Err(ActionError::InvalidReceive) if node.dht().record(&c.hash) == before => {}
                    Err(ActionError::InvalidReceive) | Ok(_) => {
                        violations.push(InvariantViolation::MigrateAccepted {
                            node: index,
                            hash: c.hash,
                        });
                    }
                    Err(err) => violations.push(InvariantViolation::WrongRefusal {
                        node: index,
                        hash: c.hash,
                        error: err.to_string(),
                    }),
                }
            }
        }
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_all(cluster: &Cluster, committed: &[Committed]) -> OracleResult {
        OracleResult::pass()
            .merge(Self::check_replication(cluster, committed))
            .merge(Self::check_chains(cluster))
            .merge(Self::check_migrate_refused(cluster, committed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterConfig, POST_ENTRY_TYPE};
    use crate::network::FaultConfig;
    use tether_core::Entry;
    use tether_core::action::{CommitAction, MIGRATE_CLOSE, MigrateAction, MigrateEntry};

    fn cluster() -> Cluster {
        Cluster::new(ClusterConfig {
            seed: 0,
            node_count: 3,
            fault: FaultConfig::none(),
            ..ClusterConfig::default()
        })
        .expect("cluster")
    }

    fn commit(cluster: &Cluster, origin: usize, action: Action) -> Committed {
        let (hash, action) = cluster.commit(origin, action).expect("commit");
        Committed {
            origin,
            hash,
            action,
        }
    }

    fn migrate() -> Action {
        MigrateAction::new(MigrateEntry::new(
            MIGRATE_CLOSE,
            &Hash::sum(b"dna"),
            &Hash::sum(b"key"),
            "",
        ))
        .into()
    }

    #[test]
    fn settled_cluster_passes() {
        let cluster = cluster();
        let committed = vec![
            commit(&cluster, 0, migrate()),
            commit(&cluster, 2, CommitAction::new(POST_ENTRY_TYPE, Entry::new("p")).into()),
        ];
        cluster.settle(10).expect("settle");
        let result = ReplicationOracle::check_all(&cluster, &committed);
        assert!(result.passed, "{:?}", result.violations);
    }

    #[test]
    fn unsettled_cluster_reports_missing() {
        let cluster = cluster();
        let committed = vec![commit(&cluster, 0, migrate())];
        let result = ReplicationOracle::check_replication(&cluster, &committed);
        assert!(!result.passed);
        assert_eq!(result.violations.len(), 2);
        assert!(matches!(
            result.violations[0],
            InvariantViolation::Missing { node: 1, .. }
        ));
    }

    #[test]
    fn refusal_holds_before_replication_too() {
        let cluster = cluster();
        let committed = vec![commit(&cluster, 1, migrate())];
        let result = ReplicationOracle::check_migrate_refused(&cluster, &committed);
        assert!(result.passed, "{:?}", result.violations);
        assert!(cluster.node(0).expect("n0").dht().is_empty());
    }

    #[test]
    fn merge_accumulates() {
        let fail = OracleResult::from_violations(vec![InvariantViolation::BrokenChain {
            node: 0,
            reason: "x".into(),
        }]);
        let merged = OracleResult::pass().merge(fail.clone()).merge(fail);
        assert!(!merged.passed);
        assert_eq!(merged.violations.len(), 2);
    }
}
