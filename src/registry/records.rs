//! Registry Record Types
//!
//! The four per-component records owned by the registry: registration
//! metadata, health, breaker state (see `breaker`) and activity counters.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::AtomicU64;

use crate::component::ComponentSpec;
use crate::registry::breaker::CircuitState;

/// Component health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// Reporting activity within its response budget
    Healthy,
    /// Staleness exceeded the response budget
    Warning,
    /// Staleness exceeded twice the response budget
    Critical,
    /// Registered but no activity observed yet
    Unknown,
}

impl HealthStatus {
    /// Contribution to the weighted system health score
    pub fn score(&self) -> f64 {
        match self {
            HealthStatus::Healthy => 1.0,
            HealthStatus::Warning => 0.6,
            HealthStatus::Critical => 0.2,
            HealthStatus::Unknown => 0.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Registration record: identifier plus declared metadata
#[derive(Debug, Clone, Serialize)]
pub struct ComponentRecord {
    pub id: String,
    pub spec: ComponentSpec,
    pub registered_at: DateTime<Utc>,
}

impl ComponentRecord {
    pub fn new(id: &str, spec: ComponentSpec) -> Self {
        Self {
            id: id.to_string(),
            spec,
            registered_at: Utc::now(),
        }
    }
}

/// Mutable health record for one live component
#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub last_seen: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub total_errors: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_recovery_at: Option<DateTime<Utc>>,
}

impl ComponentHealth {
    /// Fresh record: Unknown until the first activity report
    pub fn new() -> Self {
        Self {
            status: HealthStatus::Unknown,
            last_seen: Utc::now(),
            consecutive_failures: 0,
            total_errors: 0,
            last_error: None,
            last_error_at: None,
            last_recovery_at: None,
        }
    }
}

impl Default for ComponentHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time health view handed to callers; safe to hold after the
/// component is unregistered.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub circuit: CircuitState,
    pub last_seen: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub total_errors: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_recovery_at: Option<DateTime<Utc>>,
}

/// Hot-path activity counters, atomically updated
#[derive(Debug, Default)]
pub(crate) struct ActivityCounters {
    pub activity_count: AtomicU64,
    pub error_count: AtomicU64,
    pub last_memory_bytes: AtomicU64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_scores() {
        assert_eq!(HealthStatus::Healthy.score(), 1.0);
        assert_eq!(HealthStatus::Warning.score(), 0.6);
        assert_eq!(HealthStatus::Critical.score(), 0.2);
        assert_eq!(HealthStatus::Unknown.score(), 0.5);
    }

    #[test]
    fn test_new_health_starts_unknown() {
        let health = ComponentHealth::new();
        assert_eq!(health.status, HealthStatus::Unknown);
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.last_error.is_none());
    }
}
