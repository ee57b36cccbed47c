//! Health Monitor
//!
//! Periodically scans the registry, reclassifies component health from
//! staleness and breaker state, attempts recovery for critical
//! components, and computes the weighted system health score. Each scan
//! clones entry handles first so reclassification never holds the
//! registry table lock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::HealthMonitorConfig;
use crate::events::{EventBus, EventEnvelope, EventKind};
use crate::registry::breaker::CircuitState;
use crate::registry::records::{HealthSnapshot, HealthStatus};
use crate::registry::registry::ComponentEntry;
use crate::registry::ComponentRegistry;

/// Aggregate view returned by `system_health_report`
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealthReport {
    pub generated_at: DateTime<Utc>,
    /// Weighted score in [0, 1]
    pub score: f64,
    pub healthy: bool,
    pub components: HashMap<String, HealthSnapshot>,
    pub alerts: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Periodic health monitor over the component registry
pub struct HealthMonitor {
    registry: Arc<ComponentRegistry>,
    bus: Arc<EventBus>,
    config: HealthMonitorConfig,
    /// Last Critical alert time per component, for cooldown limiting
    alert_times: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl HealthMonitor {
    /// Create a new health monitor
    pub fn new(
        registry: Arc<ComponentRegistry>,
        bus: Arc<EventBus>,
        config: HealthMonitorConfig,
    ) -> Self {
        Self {
            registry,
            bus,
            config,
            alert_times: RwLock::new(HashMap::new()),
        }
    }

    /// Run one health check cycle over every registered component
    pub async fn run_check_cycle(&self) {
        let entries = match self.registry.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping health check cycle: {}", e);
                return;
            }
        };

        let now = Utc::now();
        for entry in entries {
            self.check_component(entry, now).await;
        }
    }

    async fn check_component(&self, entry: Arc<ComponentEntry>, now: DateTime<Utc>) {
        let id = entry.record.id.clone();
        let expected_ms = entry.record.spec.expected_response_ms as i64;
        let is_critical_component = entry.record.spec.critical;

        let (prev_status, staleness_ms, consecutive_failures) = {
            let health = entry.health.read().await;
            (
                health.status,
                now.signed_duration_since(health.last_seen).num_milliseconds(),
                health.consecutive_failures,
            )
        };

        let new_status = if staleness_ms > 2 * expected_ms {
            HealthStatus::Critical
        } else if staleness_ms > expected_ms {
            HealthStatus::Warning
        } else if consecutive_failures == 0 && prev_status != HealthStatus::Unknown {
            HealthStatus::Healthy
        } else {
            prev_status
        };

        if new_status != prev_status {
            {
                let mut health = entry.health.write().await;
                health.status = new_status;
            }

            info!(
                "Component {} health: {} -> {} (staleness {}ms)",
                id, prev_status, new_status, staleness_ms
            );
            self.bus.publish(EventEnvelope::new(
                EventKind::HealthChanged,
                Some(&id),
                serde_json::json!({
                    "from": prev_status.as_str(),
                    "to": new_status.as_str(),
                    "staleness_ms": staleness_ms,
                }),
            ));

            if new_status == HealthStatus::Warning && is_critical_component {
                self.attempt_recovery(entry.clone()).await;
            }
        }

        if new_status == HealthStatus::Critical {
            self.alert_critical(&id, staleness_ms, now).await;
        }

        // Confirmed-healthy components close out their recovery probe
        if new_status == HealthStatus::Healthy
            && entry.breaker.state().await == CircuitState::HalfOpen
        {
            entry.breaker.force_close(&id).await;
            {
                let mut health = entry.health.write().await;
                health.last_recovery_at = Some(now);
            }
            self.bus.publish(EventEnvelope::new(
                EventKind::Recovered,
                Some(&id),
                serde_json::json!({ "confirmed_by": "health_check" }),
            ));
        }
    }

    /// Rate-limited Critical alert, at most once per cooldown per component
    async fn alert_critical(&self, id: &str, staleness_ms: i64, now: DateTime<Utc>) {
        let mut alerts = self.alert_times.write().await;
        let due = alerts.get(id).map_or(true, |last| {
            now.signed_duration_since(*last).num_seconds() >= self.config.alert_cooldown_secs as i64
        });
        if due {
            alerts.insert(id.to_string(), now);
            error!(
                "Component {} CRITICAL: no activity for {}ms",
                id, staleness_ms
            );
        } else {
            debug!("Suppressing repeat critical alert for {}", id);
        }
    }

    /// Asynchronous recovery for a critical-tagged component: reset the
    /// breaker to HalfOpen, clear the failure streak, and reinitialize the
    /// component (outside all registry locks) when a handle is attached.
    async fn attempt_recovery(&self, entry: Arc<ComponentEntry>) {
        let id = entry.record.id.clone();
        info!("Attempting recovery for critical component {}", id);

        entry.breaker.force_half_open().await;
        {
            let mut health = entry.health.write().await;
            health.consecutive_failures = 0;
            health.last_recovery_at = Some(Utc::now());
        }

        if let Some(runtime) = self.registry.runtime(&id).await {
            let registry = self.registry.clone();
            tokio::spawn(async move {
                match runtime.initialize().await {
                    Ok(()) => {
                        let _ = registry
                            .record_activity(&id, "recover", None, None, false)
                            .await;
                    }
                    Err(e) => {
                        warn!("Recovery initialize for {} failed: {}", id, e);
                        let _ = registry.record_error(&id, "recover", &e.to_string()).await;
                    }
                }
            });
        }
    }

    /// Weighted system health score in [0, 1]. Critical-tagged components
    /// count twice. An empty registry scores 1.0.
    pub async fn system_score(&self) -> f64 {
        let entries = match self.registry.entries().await {
            Ok(entries) => entries,
            Err(_) => return 0.0,
        };
        if entries.is_empty() {
            return 1.0;
        }

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for entry in &entries {
            let weight = if entry.record.spec.critical { 2.0 } else { 1.0 };
            let status = entry.health.read().await.status;
            weighted_sum += status.score() * weight;
            weight_total += weight;
        }
        weighted_sum / weight_total
    }

    /// Full system report: score, per-component snapshots, alerts and
    /// operator recommendations.
    pub async fn system_health_report(&self) -> SystemHealthReport {
        let score = self.system_score().await;
        let components = self.registry.component_health().await;

        let mut alerts = Vec::new();
        let mut recommendations = Vec::new();

        for (id, snapshot) in &components {
            match snapshot.status {
                HealthStatus::Critical => {
                    alerts.push(format!("{} is critical (last seen {})", id, snapshot.last_seen));
                    recommendations.push(format!("Investigate and restart {}", id));
                }
                HealthStatus::Warning => {
                    alerts.push(format!("{} is stale", id));
                }
                _ => {}
            }
            if snapshot.circuit == CircuitState::Open {
                alerts.push(format!("{} circuit breaker is open", id));
                recommendations.push(format!(
                    "Check the dependency behind {}; {} consecutive failures",
                    id, snapshot.consecutive_failures
                ));
            }
        }

        let healthy = score >= self.config.healthy_score_threshold;
        if !healthy {
            recommendations.push(format!(
                "System health score {:.2} below threshold {:.2}",
                score, self.config.healthy_score_threshold
            ));
        }

        SystemHealthReport {
            generated_at: Utc::now(),
            score,
            healthy,
            components,
            alerts,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentSpec;
    use crate::config::{BreakerConfig, MetricsConfig, RegistryConfig};
    use crate::metrics::PerformanceTracker;

    fn setup() -> (Arc<ComponentRegistry>, Arc<EventBus>, HealthMonitor) {
        let bus = Arc::new(EventBus::with_defaults());
        let tracker = Arc::new(PerformanceTracker::new(MetricsConfig::default()));
        let registry = Arc::new(ComponentRegistry::new(
            RegistryConfig::default(),
            BreakerConfig::default(),
            bus.clone(),
            tracker,
        ));
        let monitor = HealthMonitor::new(
            registry.clone(),
            bus.clone(),
            HealthMonitorConfig::default(),
        );
        (registry, bus, monitor)
    }

    #[tokio::test]
    async fn test_stale_component_escalates_to_warning_then_critical() {
        let (registry, _bus, monitor) = setup();
        registry
            .register(
                "alpha",
                ComponentSpec::new("analyzer", "1.0.0").with_expected_response_ms(20),
            )
            .await
            .unwrap();
        registry
            .record_activity("alpha", "tick", None, None, false)
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        monitor.run_check_cycle().await;
        assert_eq!(
            registry.health_snapshot("alpha").await.unwrap().status,
            HealthStatus::Warning
        );

        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        monitor.run_check_cycle().await;
        assert_eq!(
            registry.health_snapshot("alpha").await.unwrap().status,
            HealthStatus::Critical
        );
    }

    #[tokio::test]
    async fn test_fresh_component_demotes_back_to_healthy() {
        let (registry, _bus, monitor) = setup();
        registry
            .register(
                "alpha",
                ComponentSpec::new("analyzer", "1.0.0").with_expected_response_ms(20),
            )
            .await
            .unwrap();
        registry
            .record_activity("alpha", "tick", None, None, false)
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        monitor.run_check_cycle().await;
        assert_eq!(
            registry.health_snapshot("alpha").await.unwrap().status,
            HealthStatus::Warning
        );

        registry
            .record_activity("alpha", "tick", None, None, false)
            .await
            .unwrap();
        monitor.run_check_cycle().await;
        assert_eq!(
            registry.health_snapshot("alpha").await.unwrap().status,
            HealthStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_weighted_system_score() {
        let (registry, _bus, monitor) = setup();

        // Two healthy non-critical components plus one critical-tagged
        // component in Critical state: (1 + 1 + 0.2*2) / (1 + 1 + 2) = 0.55
        for id in ["a", "b"] {
            registry
                .register(id, ComponentSpec::new("analyzer", "1.0.0"))
                .await
                .unwrap();
            registry
                .record_activity(id, "tick", None, None, false)
                .await
                .unwrap();
        }
        registry
            .register(
                "c",
                ComponentSpec::new("analyzer", "1.0.0")
                    .critical()
                    .with_expected_response_ms(1),
            )
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        monitor.run_check_cycle().await;
        assert_eq!(
            registry.health_snapshot("c").await.unwrap().status,
            HealthStatus::Critical
        );

        let score = monitor.system_score().await;
        assert!((score - 0.55).abs() < 1e-9);

        let report = monitor.system_health_report().await;
        assert!(!report.healthy);
        assert!(!report.alerts.is_empty());
    }

    #[tokio::test]
    async fn test_empty_registry_scores_healthy() {
        let (_registry, _bus, monitor) = setup();
        assert_eq!(monitor.system_score().await, 1.0);
        assert!(monitor.system_health_report().await.healthy);
    }

    #[tokio::test]
    async fn test_critical_alert_respects_cooldown() {
        let (registry, _bus, monitor) = setup();
        registry
            .register(
                "alpha",
                ComponentSpec::new("analyzer", "1.0.0").with_expected_response_ms(1),
            )
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        monitor.run_check_cycle().await;
        monitor.run_check_cycle().await;

        // One alert recorded despite two critical cycles
        let alerts = monitor.alert_times.read().await;
        assert_eq!(alerts.len(), 1);
    }
}
