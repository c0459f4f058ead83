//! tether-sim library.
//!
//! Deterministic multi-node harness for tether replication: a fault-injecting
//! network, a [`cluster::Cluster`] of real [`tether_core::Node`]s wired
//! through it, and a seed campaign checked by [`oracle::ReplicationOracle`].
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`, `trace!`).

pub mod campaign;
pub mod cluster;
pub mod network;
pub mod oracle;
pub mod rng;
pub mod transport;

pub use campaign::{CampaignConfig, CampaignReport, run_campaign, run_seed};
pub use cluster::{Cluster, ClusterConfig};
pub use network::FaultConfig;
