//! Component Registry
//!
//! Maps component identifiers to their registration metadata, health
//! record, circuit breaker and activity counters. The table lock is held
//! only long enough to clone an entry handle; all per-component mutation
//! happens on the entry itself so the hot update path never contends with
//! background scans. Component `initialize`/`shutdown` callbacks run
//! outside every lock and may safely reenter the registry.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::component::{ComponentSpec, ManagedComponent};
use crate::config::{BreakerConfig, RegistryConfig};
use crate::error::{Result, VigilError};
use crate::events::{EventBus, EventEnvelope, EventKind};
use crate::metrics::PerformanceTracker;
use crate::registry::breaker::CircuitBreaker;
use crate::registry::records::{
    ActivityCounters, ComponentHealth, ComponentRecord, HealthSnapshot, HealthStatus,
};

/// All registry-owned state for one live component
pub(crate) struct ComponentEntry {
    pub(crate) record: ComponentRecord,
    pub(crate) health: RwLock<ComponentHealth>,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) counters: ActivityCounters,
}

impl ComponentEntry {
    fn new(id: &str, spec: ComponentSpec, breaker_config: BreakerConfig) -> Self {
        Self {
            record: ComponentRecord::new(id, spec),
            health: RwLock::new(ComponentHealth::new()),
            breaker: CircuitBreaker::new(breaker_config),
            counters: ActivityCounters::default(),
        }
    }

    pub(crate) async fn snapshot(&self) -> HealthSnapshot {
        let health = self.health.read().await;
        HealthSnapshot {
            status: health.status,
            circuit: self.breaker.state().await,
            last_seen: health.last_seen,
            consecutive_failures: health.consecutive_failures,
            total_errors: health.total_errors,
            last_error: health.last_error.clone(),
            last_error_at: health.last_error_at,
            last_recovery_at: health.last_recovery_at,
        }
    }
}

/// Registry of managed components
pub struct ComponentRegistry {
    config: RegistryConfig,
    breaker_defaults: BreakerConfig,
    components: RwLock<HashMap<String, Arc<ComponentEntry>>>,
    runtimes: RwLock<HashMap<String, Arc<dyn ManagedComponent>>>,
    bus: Arc<EventBus>,
    tracker: Arc<PerformanceTracker>,
}

impl ComponentRegistry {
    /// Create a new registry
    pub fn new(
        config: RegistryConfig,
        breaker_defaults: BreakerConfig,
        bus: Arc<EventBus>,
        tracker: Arc<PerformanceTracker>,
    ) -> Self {
        Self {
            config,
            breaker_defaults,
            components: RwLock::new(HashMap::new()),
            runtimes: RwLock::new(HashMap::new()),
            bus,
            tracker,
        }
    }

    /// Bounded lock acquisition: expiry is a soft failure the caller logs
    /// and skips, never a deadlock.
    async fn bounded<T>(
        &self,
        what: &'static str,
        fut: impl std::future::Future<Output = T>,
    ) -> Result<T> {
        tokio::time::timeout(self.config.lock_timeout(), fut)
            .await
            .map_err(|_| VigilError::LockTimeout { what })
    }

    async fn get_entry(&self, id: &str) -> Result<Option<Arc<ComponentEntry>>> {
        let table = self.bounded("component table", self.components.read()).await?;
        Ok(table.get(id).cloned())
    }

    fn default_spec(&self) -> ComponentSpec {
        ComponentSpec {
            kind: "unregistered".to_string(),
            version: "0.0.0".to_string(),
            critical: false,
            expected_response_ms: self.config.default_expected_response_ms,
            max_memory_bytes: self.config.default_max_memory_bytes,
        }
    }

    /// Register a component under the default breaker configuration.
    ///
    /// Re-registering with an identical spec is an idempotent no-op that
    /// preserves existing health and metrics history; a conflicting spec
    /// is rejected.
    pub async fn register(&self, id: &str, spec: ComponentSpec) -> Result<()> {
        self.register_with_breaker(id, spec, self.breaker_defaults.clone())
            .await
    }

    /// Register with a per-component breaker threshold/timeout override
    pub async fn register_with_breaker(
        &self,
        id: &str,
        spec: ComponentSpec,
        breaker_config: BreakerConfig,
    ) -> Result<()> {
        if id.trim().is_empty() {
            return Err(VigilError::InvalidArgument(
                "component id must not be empty".to_string(),
            ));
        }

        {
            let mut table = self.bounded("component table", self.components.write()).await?;
            if let Some(existing) = table.get(id) {
                if existing.record.spec == spec {
                    debug!("Component {} re-registered with identical metadata", id);
                    return Ok(());
                }
                return Err(VigilError::InvalidArgument(format!(
                    "component {} already registered with conflicting metadata",
                    id
                )));
            }

            let entry = Arc::new(ComponentEntry::new(id, spec.clone(), breaker_config));
            table.insert(id.to_string(), entry);
        }

        info!(
            "Registered component {} (kind={}, version={}, critical={})",
            id, spec.kind, spec.version, spec.critical
        );
        self.bus.publish(EventEnvelope::new(
            EventKind::Registered,
            Some(id),
            serde_json::json!({
                "kind": spec.kind,
                "version": spec.version,
                "critical": spec.critical,
            }),
        ));
        Ok(())
    }

    /// Register a component that exposes the capability interface. Its
    /// `initialize` runs after registration, outside all registry locks;
    /// a failure there is recorded against the breaker, not propagated.
    pub async fn register_component(
        &self,
        component: Arc<dyn ManagedComponent>,
        spec: ComponentSpec,
    ) -> Result<()> {
        let id = component.identifier().to_string();
        self.register(&id, spec).await?;

        {
            let mut runtimes = self.bounded("runtime table", self.runtimes.write()).await?;
            runtimes.insert(id.clone(), component.clone());
        }

        if let Err(e) = component.initialize().await {
            warn!("Component {} failed to initialize: {}", id, e);
            self.record(&id, "initialize", None, None, true, Some(&e.to_string()))
                .await?;
        }
        Ok(())
    }

    /// Remove all records for a component. No-op for unknown ids; safe to
    /// call during shutdown. An attached runtime handle gets `shutdown()`
    /// after removal, so its callback may call back into the registry.
    pub async fn unregister(&self, id: &str) -> Result<()> {
        let removed = {
            let mut table = self.bounded("component table", self.components.write()).await?;
            table.remove(id)
        };
        let runtime = {
            let mut runtimes = self.bounded("runtime table", self.runtimes.write()).await?;
            runtimes.remove(id)
        };

        if removed.is_none() {
            return Ok(());
        }

        info!("Unregistered component {}", id);
        self.bus.publish(EventEnvelope::new(
            EventKind::Unregistered,
            Some(id),
            serde_json::json!({}),
        ));

        if let Some(handle) = runtime {
            if let Err(e) = handle.shutdown().await {
                warn!("Component {} shutdown raised: {}", id, e);
            }
        }
        Ok(())
    }

    /// Look up registration metadata
    pub async fn lookup(&self, id: &str) -> Result<ComponentRecord> {
        self.get_entry(id)
            .await?
            .map(|e| e.record.clone())
            .ok_or_else(|| VigilError::NotFound(id.to_string()))
    }

    /// Report component activity from the hot update path.
    ///
    /// Unknown ids are auto-registered with default metadata so producers
    /// never need to register explicitly before first use.
    pub async fn record_activity(
        &self,
        id: &str,
        operation: &str,
        duration: Option<Duration>,
        memory_bytes: Option<u64>,
        is_error: bool,
    ) -> Result<()> {
        self.record(id, operation, duration, memory_bytes, is_error, None)
            .await
    }

    /// Report a component error with a message; emits an `Error` event
    pub async fn record_error(&self, id: &str, operation: &str, message: &str) -> Result<()> {
        self.record(id, operation, None, None, true, Some(message))
            .await
    }

    async fn record(
        &self,
        id: &str,
        operation: &str,
        duration: Option<Duration>,
        memory_bytes: Option<u64>,
        is_error: bool,
        message: Option<&str>,
    ) -> Result<()> {
        if id.trim().is_empty() {
            return Err(VigilError::InvalidArgument(
                "component id must not be empty".to_string(),
            ));
        }

        let entry = match self.get_entry(id).await? {
            Some(entry) => entry,
            None => self.auto_register(id).await?,
        };
        let now = Utc::now();

        {
            let mut health = entry.health.write().await;
            health.last_seen = now;
            if is_error {
                health.consecutive_failures += 1;
                health.total_errors += 1;
                health.last_error_at = Some(now);
                if let Some(msg) = message {
                    health.last_error = Some(msg.to_string());
                }
            } else {
                health.consecutive_failures = 0;
                if health.status == HealthStatus::Unknown {
                    health.status = HealthStatus::Healthy;
                }
            }
        }

        entry.counters.activity_count.fetch_add(1, Ordering::Relaxed);
        if is_error {
            entry.counters.error_count.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(mem) = memory_bytes {
            entry.counters.last_memory_bytes.store(mem, Ordering::Relaxed);
        }

        self.tracker
            .record(id, operation, duration, memory_bytes, is_error)
            .await;

        if is_error {
            if let Some(msg) = message {
                self.bus.publish(EventEnvelope::new(
                    EventKind::Error,
                    Some(id),
                    serde_json::json!({ "operation": operation, "message": msg }),
                ));
            }
            if entry.breaker.record_failure(id).await {
                let snapshot = entry.breaker.snapshot().await;
                self.bus.publish(EventEnvelope::new(
                    EventKind::CircuitOpened,
                    Some(id),
                    serde_json::json!({
                        "failures": snapshot.failure_count,
                        "recovery_timeout_ms": snapshot.recovery_timeout_ms,
                    }),
                ));
            }
        } else if entry.breaker.record_success(id).await {
            {
                let mut health = entry.health.write().await;
                health.last_recovery_at = Some(now);
            }
            self.bus.publish(EventEnvelope::new(
                EventKind::Recovered,
                Some(id),
                serde_json::json!({ "operation": operation }),
            ));
        }

        Ok(())
    }

    async fn auto_register(&self, id: &str) -> Result<Arc<ComponentEntry>> {
        debug!("Auto-registering component {} with default metadata", id);
        match self.register(id, self.default_spec()).await {
            Ok(()) => {}
            // Raced with an explicit registration; use whatever won
            Err(VigilError::InvalidArgument(_)) => {}
            Err(e) => return Err(e),
        }
        self.get_entry(id)
            .await?
            .ok_or_else(|| VigilError::NotFound(id.to_string()))
    }

    /// Whether calls touching this component are considered safe.
    ///
    /// Closed/HalfOpen breakers (and unknown components) are safe; an Open
    /// breaker is unsafe until its timeout elapses, at which point this
    /// call lazily performs the Open -> HalfOpen transition.
    pub async fn is_safe_to_use(&self, id: &str) -> bool {
        match self.get_entry(id).await {
            Ok(Some(entry)) => entry.breaker.should_allow().await,
            Ok(None) => true,
            Err(e) => {
                warn!("Skipping safety check for {}: {}", id, e);
                true
            }
        }
    }

    /// Typed gate for callers that want a fallback on an open circuit
    pub async fn guard(&self, id: &str) -> Result<()> {
        let entry = match self.get_entry(id).await? {
            Some(entry) => entry,
            None => return Ok(()),
        };
        if entry.breaker.should_allow().await {
            Ok(())
        } else {
            Err(VigilError::CircuitOpen {
                component: id.to_string(),
                retry_in_ms: entry.breaker.time_until_recovery_ms().await,
            })
        }
    }

    /// Strict health check: true only for status Healthy
    pub async fn is_healthy(&self, id: &str) -> bool {
        match self.get_entry(id).await {
            Ok(Some(entry)) => entry.health.read().await.status == HealthStatus::Healthy,
            _ => false,
        }
    }

    /// Health snapshot for one component
    pub async fn health_snapshot(&self, id: &str) -> Option<HealthSnapshot> {
        match self.get_entry(id).await {
            Ok(Some(entry)) => Some(entry.snapshot().await),
            _ => None,
        }
    }

    /// Health snapshots for every registered component
    pub async fn component_health(&self) -> HashMap<String, HealthSnapshot> {
        let entries = match self.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping health snapshot: {}", e);
                return HashMap::new();
            }
        };

        let mut out = HashMap::with_capacity(entries.len());
        for entry in entries {
            out.insert(entry.record.id.clone(), entry.snapshot().await);
        }
        out
    }

    /// Number of registered components
    pub async fn len(&self) -> usize {
        match self.bounded("component table", self.components.read()).await {
            Ok(table) => table.len(),
            Err(_) => 0,
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Sum of the most recent memory report per component
    pub async fn reported_memory_total(&self) -> u64 {
        match self.entries().await {
            Ok(entries) => entries
                .iter()
                .map(|e| e.counters.last_memory_bytes.load(Ordering::Relaxed))
                .sum(),
            Err(_) => 0,
        }
    }

    /// Clone entry handles for a background scan
    pub(crate) async fn entries(&self) -> Result<Vec<Arc<ComponentEntry>>> {
        let table = self.bounded("component table", self.components.read()).await?;
        Ok(table.values().cloned().collect())
    }

    /// Runtime handle for the recovery path
    pub(crate) async fn runtime(&self, id: &str) -> Option<Arc<dyn ManagedComponent>> {
        match self.bounded("runtime table", self.runtimes.read()).await {
            Ok(runtimes) => runtimes.get(id).cloned(),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;

    fn registry() -> ComponentRegistry {
        let bus = Arc::new(EventBus::with_defaults());
        let tracker = Arc::new(PerformanceTracker::new(MetricsConfig::default()));
        ComponentRegistry::new(
            RegistryConfig::default(),
            BreakerConfig::default(),
            bus,
            tracker,
        )
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = registry();
        let spec = ComponentSpec::new("signal_generator", "1.0.0");

        registry.register("alpha", spec.clone()).await.unwrap();
        let record = registry.lookup("alpha").await.unwrap();
        assert_eq!(record.spec, spec);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_register_rejects_empty_id() {
        let registry = registry();
        let err = registry
            .register("", ComponentSpec::new("x", "1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_idempotent_reregistration_preserves_history() {
        let registry = registry();
        let spec = ComponentSpec::new("analyzer", "1.0.0");

        registry.register("alpha", spec.clone()).await.unwrap();
        registry
            .record_activity("alpha", "scan", None, None, false)
            .await
            .unwrap();

        registry.register("alpha", spec).await.unwrap();
        let snapshot = registry.health_snapshot("alpha").await.unwrap();
        assert_eq!(snapshot.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_conflicting_reregistration_rejected() {
        let registry = registry();
        registry
            .register("alpha", ComponentSpec::new("analyzer", "1.0.0"))
            .await
            .unwrap();
        let err = registry
            .register("alpha", ComponentSpec::new("analyzer", "2.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_lookup_unknown_is_not_found() {
        let registry = registry();
        assert!(matches!(
            registry.lookup("ghost").await.unwrap_err(),
            VigilError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_record_activity_auto_registers() {
        let registry = registry();
        registry
            .record_activity("implicit", "tick", Some(Duration::from_millis(3)), None, false)
            .await
            .unwrap();

        let record = registry.lookup("implicit").await.unwrap();
        assert_eq!(record.spec.kind, "unregistered");
        assert!(registry.is_healthy("implicit").await);
    }

    #[tokio::test]
    async fn test_unregister_is_noop_for_unknown() {
        let registry = registry();
        registry.unregister("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn test_unregister_removes_all_records() {
        let registry = registry();
        registry
            .register("alpha", ComponentSpec::new("analyzer", "1.0.0"))
            .await
            .unwrap();
        registry.unregister("alpha").await.unwrap();

        assert!(registry.lookup("alpha").await.is_err());
        assert!(registry.health_snapshot("alpha").await.is_none());
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_breaker_gates_after_threshold_errors() {
        let registry = registry();
        registry
            .register("alpha", ComponentSpec::new("analyzer", "1.0.0"))
            .await
            .unwrap();

        for _ in 0..5 {
            registry
                .record_activity("alpha", "scan", None, None, true)
                .await
                .unwrap();
        }

        assert!(!registry.is_safe_to_use("alpha").await);
        let err = registry.guard("alpha").await.unwrap_err();
        assert!(matches!(err, VigilError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn test_unknown_component_is_safe() {
        let registry = registry();
        assert!(registry.is_safe_to_use("ghost").await);
        assert!(registry.guard("ghost").await.is_ok());
    }
}
