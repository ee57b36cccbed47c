//! Memory Monitor
//!
//! Advisory watcher over the aggregate memory picture: the sum of
//! per-component reported usage plus the estimated footprint of the
//! metrics and event stores. Soft-threshold crossings trigger gentle
//! pruning; repeated hard-threshold crossings force a full reclamation
//! pass. Best-effort only - failure to reclaim is logged, never fatal.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::MemoryMonitorConfig;
use crate::events::EventBus;
use crate::metrics::PerformanceTracker;
use crate::registry::ComponentRegistry;

// Rough per-envelope resident cost for the footprint estimate
const EVENT_FOOTPRINT_BYTES: u64 = 384;

/// Periodic aggregate memory monitor
pub struct MemoryMonitor {
    registry: Arc<ComponentRegistry>,
    tracker: Arc<PerformanceTracker>,
    bus: Arc<EventBus>,
    config: MemoryMonitorConfig,
    hard_strikes: AtomicU32,
}

impl MemoryMonitor {
    /// Create a new memory monitor
    pub fn new(
        registry: Arc<ComponentRegistry>,
        tracker: Arc<PerformanceTracker>,
        bus: Arc<EventBus>,
        config: MemoryMonitorConfig,
    ) -> Self {
        Self {
            registry,
            tracker,
            bus,
            config,
            hard_strikes: AtomicU32::new(0),
        }
    }

    /// Current aggregate sample (bytes)
    pub async fn sample_bytes(&self) -> u64 {
        let reported = self.registry.reported_memory_total().await;
        let tracker = self.tracker.estimated_footprint_bytes().await;
        let events = self.bus.queued() as u64 * EVENT_FOOTPRINT_BYTES;
        reported + tracker + events
    }

    /// Run one sampling cycle
    pub async fn run_sample_cycle(&self) {
        let total = self.sample_bytes().await;

        if total >= self.config.hard_limit_bytes {
            let strikes = self.hard_strikes.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(
                "Memory hard threshold crossed: {} bytes (strike {}/{})",
                total, strikes, self.config.hard_strikes
            );

            if strikes >= self.config.hard_strikes {
                self.force_reclaim(total).await;
                self.hard_strikes.store(0, Ordering::SeqCst);
            } else {
                self.gentle_prune().await;
            }
            return;
        }

        self.hard_strikes.store(0, Ordering::SeqCst);

        if total >= self.config.soft_limit_bytes {
            info!("Memory soft threshold crossed: {} bytes, pruning", total);
            self.gentle_prune().await;
        } else {
            debug!("Memory sample: {} bytes", total);
        }
    }

    async fn gentle_prune(&self) {
        let metrics_removed = self.tracker.prune().await;
        let events_removed = self.bus.prune_aged();
        if metrics_removed > 0 || events_removed > 0 {
            info!(
                "Gentle cleanup removed {} metric entries, {} queued events",
                metrics_removed, events_removed
            );
        }
    }

    async fn force_reclaim(&self, total: u64) {
        warn!("Forcing memory reclamation at {} bytes", total);
        let metrics_removed = self.tracker.reclaim().await;
        let events_removed = self.bus.clear();

        let after = self.sample_bytes().await;
        if after >= self.config.hard_limit_bytes {
            warn!(
                "Reclamation freed little memory ({} -> {} bytes); dominated by component-reported usage",
                total, after
            );
        } else {
            info!(
                "Reclamation removed {} metric entries and {} events ({} -> {} bytes)",
                metrics_removed, events_removed, total, after
            );
        }
    }

    /// Consecutive hard-threshold strikes so far
    pub fn strikes(&self) -> u32 {
        self.hard_strikes.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerConfig, MetricsConfig, RegistryConfig};

    fn setup(config: MemoryMonitorConfig) -> (Arc<ComponentRegistry>, MemoryMonitor) {
        let bus = Arc::new(EventBus::with_defaults());
        let tracker = Arc::new(PerformanceTracker::new(MetricsConfig::default()));
        let registry = Arc::new(ComponentRegistry::new(
            RegistryConfig::default(),
            BreakerConfig::default(),
            bus.clone(),
            tracker.clone(),
        ));
        let monitor = MemoryMonitor::new(registry.clone(), tracker, bus, config);
        (registry, monitor)
    }

    #[tokio::test]
    async fn test_sample_includes_reported_memory() {
        let (registry, monitor) = setup(MemoryMonitorConfig::default());
        registry
            .record_activity("alpha", "tick", None, Some(10_000), false)
            .await
            .unwrap();

        assert!(monitor.sample_bytes().await >= 10_000);
    }

    #[tokio::test]
    async fn test_hard_threshold_counts_strikes_then_reclaims() {
        let config = MemoryMonitorConfig {
            soft_limit_bytes: 1,
            hard_limit_bytes: 1,
            hard_strikes: 3,
            ..Default::default()
        };
        let (registry, monitor) = setup(config);
        registry
            .record_activity("alpha", "tick", None, Some(1_000_000), false)
            .await
            .unwrap();

        monitor.run_sample_cycle().await;
        assert_eq!(monitor.strikes(), 1);
        monitor.run_sample_cycle().await;
        assert_eq!(monitor.strikes(), 2);

        // Third strike forces reclamation and resets the counter
        monitor.run_sample_cycle().await;
        assert_eq!(monitor.strikes(), 0);
    }

    #[tokio::test]
    async fn test_below_thresholds_resets_strikes() {
        let config = MemoryMonitorConfig {
            soft_limit_bytes: u64::MAX,
            hard_limit_bytes: u64::MAX,
            ..Default::default()
        };
        let (_registry, monitor) = setup(config);

        monitor.run_sample_cycle().await;
        assert_eq!(monitor.strikes(), 0);
    }
}
