#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tether_core::config::{NodeConfig, load_node_config};
use tether_sim::{CampaignConfig, run_campaign};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Run a replication campaign over a range of seeds.
#[derive(Parser, Debug)]
#[command(name = "tether-sim", version, about)]
struct Cli {
    /// First seed to run.
    #[arg(long, default_value_t = 0)]
    start_seed: u64,

    /// Number of seeds to run.
    #[arg(short, long, default_value_t = 100)]
    seeds: u64,

    /// Nodes per cluster.
    #[arg(short, long)]
    nodes: Option<usize>,

    /// Commits per seed.
    #[arg(short, long)]
    commits: Option<usize>,

    /// Project root whose `.tether/config.toml` tunes every node.
    #[arg(long, value_name = "DIR")]
    config: Option<PathBuf>,

    /// Disable every network fault.
    #[arg(long)]
    no_faults: bool,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn campaign_config(&self, node: NodeConfig) -> CampaignConfig {
        let defaults = CampaignConfig::default();
        CampaignConfig {
            seed_range: self.start_seed..self.start_seed.saturating_add(self.seeds),
            node_count: self.nodes.unwrap_or(defaults.node_count),
            commits: self.commits.unwrap_or(defaults.commits),
            fault: if self.no_faults {
                tether_sim::FaultConfig::none()
            } else {
                defaults.fault
            },
            node,
            ..defaults
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TETHER_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "tether=debug,info"
        } else {
            "tether=info,warn"
        })
    });

    let format = env::var("TETHER_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry.with(fmt::layer().json().with_ansi(false)).init();
        }
        _ => {
            registry.with(fmt::layer().compact()).init();
        }
    }
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let node = match &cli.config {
        Some(root) => load_node_config(root)?,
        None => NodeConfig::default(),
    };
    let report = run_campaign(&cli.campaign_config(node))?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "campaign complete: seeds={} passed={} settle_rounds={} first_failure={}",
            report.seeds_run,
            report.seeds_passed,
            report.settle_rounds,
            report
                .first_failure
                .map_or_else(|| "none".to_string(), |s| s.to_string())
        );
        for failure in &report.failures {
            for violation in &failure.violations {
                println!("  seed {}: {violation}", failure.seed);
            }
        }
    }

    Ok(if report.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
