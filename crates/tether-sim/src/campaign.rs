//! Campaign runner: many seeds, one report.
//!
//! Each seed builds a fresh cluster, commits a random mix of migrate and
//! post entries from random nodes while the network runs, settles, and hands
//! the result to the [`ReplicationOracle`].

use std::ops::Range;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tether_core::action::{CommitAction, MIGRATE_CLOSE, MIGRATE_OPEN, MigrateAction, MigrateEntry};
use tether_core::config::NodeConfig;
use tether_core::{Action, Entry, Hash};
use tracing::{debug, info};

use crate::cluster::{Cluster, ClusterConfig, POST_ENTRY_TYPE};
use crate::network::FaultConfig;
use crate::oracle::{Committed, InvariantViolation, OracleResult, ReplicationOracle};
use crate::rng::DeterministicRng;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub seed_range: Range<u64>,
    pub node_count: usize,
    /// Commits issued per seed.
    pub commits: usize,
    /// Upper bound on rounds ticked between two commits.
    pub max_gap_rounds: u8,
    /// Rounds allowed for the network to drain after the last commit.
    pub max_settle_rounds: u64,
    pub fault: FaultConfig,
    /// Node tuning shared by every cluster, usually from `.tether/config.toml`.
    #[serde(default)]
    pub node: NodeConfig,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            seed_range: 0..100,
            node_count: 4,
            commits: 12,
            max_gap_rounds: 2,
            max_settle_rounds: 500,
            fault: FaultConfig {
                max_delay_rounds: 3,
                drop_rate_percent: 10,
                duplicate_rate_percent: 5,
                reorder_rate_percent: 10,
                partition_rate_percent: 5,
                partition_duration_rounds: 3,
            },
            node: NodeConfig::default(),
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub fn cluster_config_for_seed(&self, seed: u64) -> ClusterConfig {
        ClusterConfig {
            seed,
            node_count: self.node_count,
            fault: self.fault,
            node: self.node.clone(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        if self.node_count < 2 {
            bail!("node_count must be >= 2 for replication to mean anything");
        }
        if self.commits == 0 {
            bail!("commits must be > 0");
        }
        if self.max_settle_rounds == 0 {
            bail!("max_settle_rounds must be > 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First failing seed, for replay.
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Total rounds needed to settle, summed over seeds.
    pub settle_rounds: u64,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// What one seed produced.
#[derive(Debug)]
pub struct SeedRun {
    pub cluster: Cluster,
    pub committed: Vec<Committed>,
    pub settle_rounds: u64,
    pub oracle: OracleResult,
}

/// Run every seed in the config.
///
/// # Errors
///
/// Invalid config, or a seed whose simulation itself failed (as opposed to
/// violating an invariant).
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        settle_rounds: 0,
    };

    for seed in config.seed_range.clone() {
        report.seeds_run += 1;
        let run = run_seed(seed, config).with_context(|| format!("seed {seed}"))?;
        report.settle_rounds += run.settle_rounds;

        if run.oracle.passed {
            report.seeds_passed += 1;
        } else {
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: run.oracle.violations.iter().map(format_violation).collect(),
            });
        }
    }

    info!(
        seeds = report.seeds_run,
        passed = report.seeds_passed,
        first_failure = ?report.first_failure,
        "campaign finished"
    );
    Ok(report)
}

/// Run and check a single seed.
///
/// # Errors
///
/// A commit failing, or the network not settling in time.
pub fn run_seed(seed: u64, config: &CampaignConfig) -> Result<SeedRun> {
    let cluster = Cluster::new(config.cluster_config_for_seed(seed))?;
    let mut rng = DeterministicRng::new(seed).fork(0x7E7E);
    let mut committed = Vec::with_capacity(config.commits);

    for i in 0..config.commits {
        let origin = rng.next_index(config.node_count);
        let action = random_action(&mut rng, seed, i);
        let (hash, action) = cluster
            .commit(origin, action)
            .with_context(|| format!("commit {i} on node {origin}"))?;
        debug!(seed, i, origin, %hash, "committed");
        committed.push(Committed {
            origin,
            hash,
            action,
        });

        for _ in 0..rng.next_bounded(u64::from(config.max_gap_rounds) + 1) {
            cluster.tick();
        }
    }

    let settle_rounds = cluster.settle(config.max_settle_rounds)?;
    let oracle = ReplicationOracle::check_all(&cluster, &committed);
    Ok(SeedRun {
        cluster,
        committed,
        settle_rounds,
        oracle,
    })
}

fn random_action(rng: &mut DeterministicRng, seed: u64, i: usize) -> Action {
    if rng.hit_rate_percent(50) {
        let migration_type = if rng.hit_rate_percent(50) {
            MIGRATE_OPEN
        } else {
            MIGRATE_CLOSE
        };
        let dna = Hash::sum(format!("dna-{}", rng.next_bounded(4)).as_bytes());
        let key = Hash::sum(format!("key-{seed}-{i}").as_bytes());
        MigrateAction::new(MigrateEntry::new(migration_type, &dna, &key, format!("{seed}:{i}")))
            .into()
    } else {
        CommitAction::new(POST_ENTRY_TYPE, Entry::new(format!("post {seed}:{i}"))).into()
    }
}

fn format_violation(v: &InvariantViolation) -> String {
    match v {
        InvariantViolation::Missing { node, hash } => {
            format!("Missing: node {node} does not hold {hash} live")
        }
        InvariantViolation::Divergent { node, hash } => {
            format!("Divergent: node {node} holds different bytes for {hash}")
        }
        InvariantViolation::BrokenChain { node, reason } => {
            format!("BrokenChain: node {node}: {reason}")
        }
        InvariantViolation::MigrateAccepted { node, hash } => {
            format!("MigrateAccepted: node {node} accepted {hash} as a request")
        }
        InvariantViolation::WrongRefusal { node, hash, error } => {
            format!("WrongRefusal: node {node} refused {hash} with '{error}'")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CampaignConfig::default().validate().is_ok());
    }

    #[test]
    fn bad_configs_rejected() {
        for config in [
            CampaignConfig {
                seed_range: 3..3,
                ..CampaignConfig::default()
            },
            CampaignConfig {
                node_count: 1,
                ..CampaignConfig::default()
            },
            CampaignConfig {
                commits: 0,
                ..CampaignConfig::default()
            },
        ] {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn quiet_network_passes() {
        let config = CampaignConfig {
            seed_range: 0..3,
            fault: FaultConfig::none(),
            ..CampaignConfig::default()
        };
        let report = run_campaign(&config).expect("campaign");
        assert!(report.all_passed(), "{:?}", report.failures);
        assert_eq!(report.seeds_passed, 3);
        assert_eq!(report.first_failure, None);
    }

    #[test]
    fn faulty_network_converges() {
        let config = CampaignConfig {
            seed_range: 10..20,
            ..CampaignConfig::default()
        };
        let report = run_campaign(&config).expect("campaign");
        assert!(report.all_passed(), "{:?}", report.failures);
    }

    #[test]
    fn same_seed_same_outcome() {
        let config = CampaignConfig::default();
        let a = run_seed(5, &config).expect("a");
        let b = run_seed(5, &config).expect("b");
        let hashes = |run: &SeedRun| run.committed.iter().map(|c| c.hash).collect::<Vec<_>>();
        assert_eq!(hashes(&a), hashes(&b));
        assert_eq!(a.settle_rounds, b.settle_rounds);
    }

    #[test]
    fn violations_format_readably() {
        let s = format_violation(&InvariantViolation::Missing {
            node: 2,
            hash: Hash::sum(b"h"),
        });
        assert!(s.starts_with("Missing: node 2"));
    }
}
