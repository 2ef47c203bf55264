//! Engine timing and retry configuration.

use std::env;
use std::time::Duration;

/// Tunables shared by workers and the orchestrator.
///
/// Environment overrides (all optional):
///
/// - `RELAY_POLL_INTERVAL_SECS` -- tick between store scans.
/// - `RELAY_LEASE_TTL_SECS` -- max `in_progress` age before reclamation.
///   Must exceed the largest handler runtime with margin; it also bounds
///   crash-recovery latency, so decompose long tasks rather than raising
///   it globally.
/// - `RELAY_MAX_RETRIES` -- default retry budget for new tasks.
/// - `RELAY_BACKOFF_ON_ERROR_SECS` -- sleep after a loop-level error.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    pub lease_ttl: Duration,
    pub max_retries_default: i32,
    pub backoff_on_error: Duration,
}

impl EngineConfig {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(300);
    pub const DEFAULT_MAX_RETRIES: i32 = 3;
    pub const DEFAULT_BACKOFF_ON_ERROR: Duration = Duration::from_secs(5);

    /// Build a config from the environment, falling back to defaults for
    /// anything unset or unparseable.
    pub fn from_env() -> Self {
        Self {
            poll_interval: env_duration_secs(
                "RELAY_POLL_INTERVAL_SECS",
                Self::DEFAULT_POLL_INTERVAL,
            ),
            lease_ttl: env_duration_secs("RELAY_LEASE_TTL_SECS", Self::DEFAULT_LEASE_TTL),
            max_retries_default: env::var("RELAY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Self::DEFAULT_MAX_RETRIES),
            backoff_on_error: env_duration_secs(
                "RELAY_BACKOFF_ON_ERROR_SECS",
                Self::DEFAULT_BACKOFF_ON_ERROR,
            ),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            lease_ttl: Self::DEFAULT_LEASE_TTL,
            max_retries_default: Self::DEFAULT_MAX_RETRIES,
            backoff_on_error: Self::DEFAULT_BACKOFF_ON_ERROR,
        }
    }
}

fn env_duration_secs(var: &str, default: Duration) -> Duration {
    env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
