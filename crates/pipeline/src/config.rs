//! Retry, backoff, and timeout policy for stage execution.

use std::time::Duration;

/// Executor attempts per stage (first try + retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// First retry delay; doubles on each subsequent retry.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Upper bound on a single backoff delay.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Wall-clock budget for one executor attempt. A timeout counts against
/// the retry budget like any transient failure.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(300);

/// Stage execution policy.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub stage_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `PIPELINE_MAX_ATTEMPTS`      | `3`     |
    /// | `PIPELINE_BACKOFF_BASE_SECS` | `2`     |
    /// | `PIPELINE_BACKOFF_CAP_SECS`  | `60`    |
    /// | `PIPELINE_STAGE_TIMEOUT_SECS`| `300`   |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: env_u64("PIPELINE_MAX_ATTEMPTS", defaults.max_attempts as u64) as u32,
            backoff_base: Duration::from_secs(env_u64(
                "PIPELINE_BACKOFF_BASE_SECS",
                defaults.backoff_base.as_secs(),
            )),
            backoff_cap: Duration::from_secs(env_u64(
                "PIPELINE_BACKOFF_CAP_SECS",
                defaults.backoff_cap.as_secs(),
            )),
            stage_timeout: Duration::from_secs(env_u64(
                "PIPELINE_STAGE_TIMEOUT_SECS",
                defaults.stage_timeout.as_secs(),
            )),
        }
    }

    /// Delay before the attempt that follows failed attempt `attempt`
    /// (1-based): `backoff_base * 2^(attempt - 1)`, capped at `backoff_cap`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.backoff_cap)
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .map(|v| {
            v.parse()
                .unwrap_or_else(|_| panic!("{name} must be a valid u64"))
        })
        .unwrap_or(default)
}
