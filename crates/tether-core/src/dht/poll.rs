use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::DhtError;

/// Attempt budget for reads that may race replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Pause between attempts in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

const fn default_attempts() -> u32 {
    20
}

const fn default_backoff_ms() -> u64 {
    50
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl PollPolicy {
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Retry `attempt` while it reports [`DhtError::NotFound`].
///
/// `wait` runs between attempts with the zero-based index of the attempt that
/// just missed; callers sleep there, or drive a simulated network forward.
/// Errors other than not-found end the loop immediately.
///
/// # Errors
///
/// The final not-found once `policy.attempts` is spent, or the first other
/// error.
pub fn poll<T>(
    policy: &PollPolicy,
    mut attempt: impl FnMut() -> Result<T, DhtError>,
    mut wait: impl FnMut(u32),
) -> Result<T, DhtError> {
    let attempts = policy.attempts.max(1);
    let mut n = 0;
    loop {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(DhtError::NotFound(hash)) if n + 1 < attempts => {
                trace!(%hash, attempt = n, "not found yet, retrying");
                wait(n);
                n += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
