use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::dht::PollPolicy;
use crate::error::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid node config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Parse(_) => ErrorCode::ConfigParseError,
        }
    }
}

/// Per-node tuning, read from `.tether/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub poll: PollPolicy,
    #[serde(default)]
    pub chain: ChainConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// How long a commit waits for the chain lock before giving up.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl ChainConfig {
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

const fn default_lock_timeout_ms() -> u64 {
    5_000
}

/// # Errors
///
/// [`ConfigError::Parse`] on malformed TOML or mistyped fields.
pub fn parse_node_config(content: &str) -> Result<NodeConfig, ConfigError> {
    Ok(toml::from_str::<NodeConfig>(content)?)
}

/// Read `<root>/.tether/config.toml`; a missing file yields the defaults.
///
/// # Errors
///
/// Fails if the file cannot be read or does not parse; a parse failure
/// downcasts to [`ConfigError`].
pub fn load_node_config(root: &Path) -> Result<NodeConfig> {
    let path = root.join(".tether/config.toml");
    if !path.exists() {
        return Ok(NodeConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    parse_node_config(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let cfg = load_node_config(dir.path()).expect("load");
        assert_eq!(cfg, NodeConfig::default());
        assert_eq!(cfg.poll.attempts, 20);
        assert_eq!(cfg.poll.backoff_ms, 50);
        assert_eq!(cfg.chain.lock_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let dir = TempDir::new().expect("tempdir");
        fs::create_dir_all(dir.path().join(".tether")).expect("mkdir");
        fs::write(
            dir.path().join(".tether/config.toml"),
            "[poll]\nattempts = 3\n",
        )
        .expect("write");

        let cfg = load_node_config(dir.path()).expect("load");
        assert_eq!(cfg.poll.attempts, 3);
        assert_eq!(cfg.poll.backoff_ms, 50);
        assert_eq!(cfg.chain, ChainConfig::default());
    }

    #[test]
    fn parse_error_names_the_file() {
        let dir = TempDir::new().expect("tempdir");
        fs::create_dir_all(dir.path().join(".tether")).expect("mkdir");
        fs::write(dir.path().join(".tether/config.toml"), "[poll\n").expect("write");

        let err = load_node_config(dir.path()).unwrap_err();
        assert!(format!("{err}").contains("config.toml"), "{err}");
        let cause = err.downcast_ref::<ConfigError>().expect("typed cause");
        assert_eq!(cause.code(), ErrorCode::ConfigParseError);
    }

    #[test]
    fn parse_from_string() {
        let cfg = parse_node_config("[chain]\nlock_timeout_ms = 10\n").expect("parse");
        assert_eq!(cfg.chain.lock_timeout_ms, 10);
        let err = parse_node_config("chain = 7").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigParseError);
    }
}
