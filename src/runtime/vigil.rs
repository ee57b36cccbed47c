//! Vigil Runtime Facade
//!
//! Constructs the registry, event bus, performance tracker and monitors
//! from one configuration and owns their background schedules. Lifecycle
//! is explicit: the process entry point builds a `Vigil`, calls `start`
//! once, and `shutdown` on the way out - there is no global static state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::VigilConfig;
use crate::events::EventBus;
use crate::metrics::PerformanceTracker;
use crate::registry::ComponentRegistry;
use crate::runtime::scheduler::Scheduler;
use crate::runtime::shutdown::ShutdownFlag;
use crate::supervisor::{HealthMonitor, MemoryMonitor};

/// Assembled resilience runtime
pub struct Vigil {
    config: VigilConfig,
    bus: Arc<EventBus>,
    tracker: Arc<PerformanceTracker>,
    registry: Arc<ComponentRegistry>,
    health: Arc<HealthMonitor>,
    memory: Arc<MemoryMonitor>,
    scheduler: Scheduler,
    shutdown_flag: Arc<ShutdownFlag>,
    started: AtomicBool,
}

impl Vigil {
    /// Build the full runtime from configuration
    pub fn new(config: VigilConfig) -> Self {
        let bus = Arc::new(EventBus::new(config.events.clone()));
        let tracker = Arc::new(PerformanceTracker::new(config.metrics.clone()));
        let registry = Arc::new(ComponentRegistry::new(
            config.registry.clone(),
            config.breaker.clone(),
            bus.clone(),
            tracker.clone(),
        ));
        let health = Arc::new(HealthMonitor::new(
            registry.clone(),
            bus.clone(),
            config.health.clone(),
        ));
        let memory = Arc::new(MemoryMonitor::new(
            registry.clone(),
            tracker.clone(),
            bus.clone(),
            config.memory.clone(),
        ));
        let shutdown_flag = Arc::new(ShutdownFlag::new());
        let scheduler = Scheduler::new(shutdown_flag.clone());

        Self {
            config,
            bus,
            tracker,
            registry,
            health,
            memory,
            scheduler,
            shutdown_flag,
            started: AtomicBool::new(false),
        }
    }

    /// Build with default configuration
    pub fn with_defaults() -> Self {
        Self::new(VigilConfig::default())
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn memory_monitor(&self) -> &Arc<MemoryMonitor> {
        &self.memory
    }

    pub fn shutdown_flag(&self) -> &Arc<ShutdownFlag> {
        &self.shutdown_flag
    }

    /// Spawn the background schedules. Idempotent: repeat calls warn and
    /// do nothing.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Vigil runtime already started");
            return;
        }

        let health = self.health.clone();
        self.scheduler
            .spawn_periodic(
                "health_check",
                Duration::from_secs(self.config.health.check_interval_secs),
                move || {
                    let health = health.clone();
                    async move {
                        health.run_check_cycle().await;
                    }
                },
            )
            .await;

        let bus = self.bus.clone();
        self.scheduler
            .spawn_periodic(
                "event_dispatch",
                Duration::from_millis(self.config.events.dispatch_interval_ms),
                move || {
                    let bus = bus.clone();
                    async move {
                        bus.dispatch_cycle().await;
                    }
                },
            )
            .await;

        let tracker = self.tracker.clone();
        self.scheduler
            .spawn_periodic(
                "metrics_prune",
                Duration::from_secs(self.config.metrics.prune_interval_secs),
                move || {
                    let tracker = tracker.clone();
                    async move {
                        tracker.prune().await;
                    }
                },
            )
            .await;

        let memory = self.memory.clone();
        self.scheduler
            .spawn_periodic(
                "memory_monitor",
                Duration::from_secs(self.config.memory.sample_interval_secs),
                move || {
                    let memory = memory.clone();
                    async move {
                        memory.run_sample_cycle().await;
                    }
                },
            )
            .await;

        info!(
            "Vigil runtime started ({} background tasks)",
            self.scheduler.task_count().await
        );
    }

    /// Stop every background task. In-flight cycles complete their batch.
    pub async fn shutdown(&self) {
        info!("Vigil runtime shutting down");
        self.scheduler.shutdown().await;
    }

    /// Wait until an external shutdown request (e.g. an OS signal handler
    /// installed over `shutdown_flag`) arrives
    pub async fn wait_for_shutdown_request(&self) {
        let mut rx = self.shutdown_flag.subscribe();
        if self.shutdown_flag.is_requested() {
            return;
        }
        let _ = rx.changed().await;
    }
}
