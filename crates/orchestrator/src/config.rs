//! Orchestrator configuration loaded from environment variables.

use saga_store::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS};

/// Saga orchestration settings with sensible defaults.
///
/// Reads from environment variables:
/// - `SAGA_TIMEOUT_SECS` — step deadline before recovery kicks in (default: `300`)
/// - `SAGA_MAX_RETRIES` — retry budget per saga (default: `3`)
/// - `SAGA_RECOVERY_ENABLED` — whether background recovery runs (default: `true`)
/// - `SAGA_RECOVERY_SWEEP_SECS` — orphan sweep interval (default: `30`)
/// - `SAGA_HEALTH_CHECK_SECS` — health monitoring interval (default: `120`)
/// - `SAGA_CLEANUP_RETENTION_DAYS` — how long terminal sagas are kept (default: `30`)
/// - `SAGA_ALERT_RETRY_THRESHOLD` — retry count that triggers a warning (default: `2`)
#[derive(Debug, Clone)]
pub struct SagaConfig {
    pub timeout_secs: i64,
    pub max_retries: u32,
    pub recovery_enabled: bool,
    pub recovery_sweep_secs: u64,
    pub health_check_secs: u64,
    pub cleanup_retention_days: i64,
    pub alert_retry_threshold: u32,
}

impl SagaConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            timeout_secs: env_parse("SAGA_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS),
            max_retries: env_parse("SAGA_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            recovery_enabled: env_parse("SAGA_RECOVERY_ENABLED", true),
            recovery_sweep_secs: env_parse("SAGA_RECOVERY_SWEEP_SECS", 30),
            health_check_secs: env_parse("SAGA_HEALTH_CHECK_SECS", 120),
            cleanup_retention_days: env_parse("SAGA_CLEANUP_RETENTION_DAYS", 30),
            alert_retry_threshold: env_parse("SAGA_ALERT_RETRY_THRESHOLD", 2),
        }
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            recovery_enabled: true,
            recovery_sweep_secs: 30,
            health_check_secs: 120,
            cleanup_retention_days: 30,
            alert_retry_threshold: 2,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
