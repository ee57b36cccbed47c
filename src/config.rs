use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct VigilConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub health: HealthMonitorConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub events: EventBusConfig,
    #[serde(default)]
    pub memory: MemoryMonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Bounded wait for the registration table lock (ms)
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Response-time budget for auto-registered components (ms)
    #[serde(default = "default_expected_response_ms")]
    pub default_expected_response_ms: u64,
    /// Memory budget for auto-registered components (bytes)
    #[serde(default = "default_max_memory_bytes")]
    pub default_max_memory_bytes: u64,
}

fn default_lock_timeout_ms() -> u64 {
    2_000
}

fn default_expected_response_ms() -> u64 {
    30_000
}

fn default_max_memory_bytes() -> u64 {
    64 * 1024 * 1024
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            default_expected_response_ms: default_expected_response_ms(),
            default_max_memory_bytes: default_max_memory_bytes(),
        }
    }
}

impl RegistryConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures to trip the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time to wait before transitioning from Open to HalfOpen (ms)
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_ms() -> u64 {
    90_000
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthMonitorConfig {
    /// Interval between health check cycles (seconds)
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Minimum interval between repeated Critical alerts per component (seconds)
    #[serde(default = "default_alert_cooldown_secs")]
    pub alert_cooldown_secs: u64,
    /// System considered healthy at or above this score
    #[serde(default = "default_healthy_score_threshold")]
    pub healthy_score_threshold: f64,
}

fn default_check_interval_secs() -> u64 {
    30
}

fn default_alert_cooldown_secs() -> u64 {
    300
}

fn default_healthy_score_threshold() -> f64 {
    0.7
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            alert_cooldown_secs: default_alert_cooldown_secs(),
            healthy_score_threshold: default_healthy_score_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Entries idle longer than this are pruned (seconds)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Maximum tracked component+operation keys
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,
    /// Recent-activity ring size per key, used for throughput
    #[serde(default = "default_recent_samples")]
    pub recent_samples: usize,
    /// Throughput window (seconds)
    #[serde(default = "default_throughput_window_secs")]
    pub throughput_window_secs: u64,
    /// How many components the system report lists per ranking
    #[serde(default = "default_report_top_n")]
    pub report_top_n: usize,
    /// Interval between pruning passes (seconds)
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

fn default_retention_secs() -> u64 {
    3_600
}

fn default_max_keys() -> usize {
    512
}

fn default_recent_samples() -> usize {
    256
}

fn default_throughput_window_secs() -> u64 {
    60
}

fn default_report_top_n() -> usize {
    5
}

fn default_prune_interval_secs() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            max_keys: default_max_keys(),
            recent_samples: default_recent_samples(),
            throughput_window_secs: default_throughput_window_secs(),
            report_top_n: default_report_top_n(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfig {
    /// Maximum queued envelopes; the oldest is dropped when full
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Maximum envelopes dispatched per drain cycle
    #[serde(default = "default_dispatch_batch")]
    pub dispatch_batch: usize,
    /// Interval between drain cycles (ms)
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
    /// Envelopes older than this at drain time are discarded (seconds)
    #[serde(default = "default_max_event_age_secs")]
    pub max_event_age_secs: u64,
    /// Coalescing window for throttled event kinds (ms)
    #[serde(default = "default_throttle_interval_ms")]
    pub throttle_interval_ms: u64,
}

fn default_queue_capacity() -> usize {
    1_024
}

fn default_dispatch_batch() -> usize {
    50
}

fn default_dispatch_interval_ms() -> u64 {
    100
}

fn default_max_event_age_secs() -> u64 {
    300
}

fn default_throttle_interval_ms() -> u64 {
    50
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            dispatch_batch: default_dispatch_batch(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
            max_event_age_secs: default_max_event_age_secs(),
            throttle_interval_ms: default_throttle_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryMonitorConfig {
    /// Interval between memory samples (seconds)
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,
    /// Soft threshold: gentle pruning of oldest metrics/events (bytes)
    #[serde(default = "default_soft_limit_bytes")]
    pub soft_limit_bytes: u64,
    /// Hard threshold: counted toward forced reclamation (bytes)
    #[serde(default = "default_hard_limit_bytes")]
    pub hard_limit_bytes: u64,
    /// Consecutive hard-threshold samples before forced reclamation
    #[serde(default = "default_hard_strikes")]
    pub hard_strikes: u32,
}

fn default_sample_interval_secs() -> u64 {
    15
}

fn default_soft_limit_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_hard_limit_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_hard_strikes() -> u32 {
    3
}

impl Default for MemoryMonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_sample_interval_secs(),
            soft_limit_bytes: default_soft_limit_bytes(),
            hard_limit_bytes: default_hard_limit_bytes(),
            hard_strikes: default_hard_strikes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl VigilConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("VIGIL_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (VIGIL_EVENTS__QUEUE_CAPACITY, etc.)
            .add_source(
                Environment::with_prefix("VIGIL")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.breaker.failure_threshold == 0 {
            errors.push("breaker.failure_threshold must be positive".to_string());
        }

        if self.events.queue_capacity == 0 {
            errors.push("events.queue_capacity must be positive".to_string());
        }

        if self.events.dispatch_batch == 0 {
            errors.push("events.dispatch_batch must be positive".to_string());
        }

        if !(0.0..=1.0).contains(&self.health.healthy_score_threshold) {
            errors.push("health.healthy_score_threshold must be in [0, 1]".to_string());
        }

        if self.memory.hard_limit_bytes < self.memory.soft_limit_bytes {
            errors.push("memory.hard_limit_bytes must be >= soft_limit_bytes".to_string());
        }

        if self.metrics.max_keys == 0 {
            errors.push("metrics.max_keys must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VigilConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.events.dispatch_batch, 50);
        assert_eq!(config.registry.lock_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = VigilConfig::default();
        config.events.queue_capacity = 0;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("queue_capacity")));
    }
}
