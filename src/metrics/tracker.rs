//! Performance Tracker
//!
//! Records component activity into per-key aggregates. The key map takes
//! a short read lock on the hot path; each aggregate is mutated behind its
//! own lock. Bounded rings and periodic pruning keep the footprint flat
//! no matter how long the process runs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::config::MetricsConfig;

/// Letter grade derived from latency and error-rate thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PerformanceGrade {
    A,
    B,
    C,
    D,
    F,
}

impl PerformanceGrade {
    fn from_profile(avg_latency_ms: f64, error_rate: f64) -> Self {
        if error_rate >= 0.25 {
            return PerformanceGrade::F;
        }
        if error_rate >= 0.10 {
            return PerformanceGrade::D;
        }
        if avg_latency_ms < 50.0 && error_rate < 0.01 {
            PerformanceGrade::A
        } else if avg_latency_ms < 200.0 {
            PerformanceGrade::B
        } else if avg_latency_ms < 1_000.0 {
            PerformanceGrade::C
        } else {
            PerformanceGrade::D
        }
    }
}

impl std::fmt::Display for PerformanceGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let grade = match self {
            PerformanceGrade::A => "A",
            PerformanceGrade::B => "B",
            PerformanceGrade::C => "C",
            PerformanceGrade::D => "D",
            PerformanceGrade::F => "F",
        };
        write!(f, "{}", grade)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetricKey {
    component: String,
    operation: String,
}

#[derive(Debug)]
struct OperationMetrics {
    count: u64,
    error_count: u64,
    latency_samples: u64,
    avg_latency_ms: f64,
    min_latency_ms: f64,
    max_latency_ms: f64,
    last_memory_bytes: u64,
    /// Recent activity timestamps, bounded, for throughput windows
    recent: VecDeque<DateTime<Utc>>,
    last_activity: DateTime<Utc>,
}

impl OperationMetrics {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            error_count: 0,
            latency_samples: 0,
            avg_latency_ms: 0.0,
            min_latency_ms: f64::MAX,
            max_latency_ms: 0.0,
            last_memory_bytes: 0,
            recent: VecDeque::new(),
            last_activity: now,
        }
    }

    fn record(
        &mut self,
        now: DateTime<Utc>,
        duration: Option<Duration>,
        memory_bytes: Option<u64>,
        is_error: bool,
        ring_capacity: usize,
    ) {
        self.count += 1;
        self.last_activity = now;
        if is_error {
            self.error_count += 1;
        }

        if let Some(duration) = duration {
            let latency_ms = duration.as_secs_f64() * 1_000.0;
            self.latency_samples += 1;
            // Welford-style moving average: never drifts from the samples
            self.avg_latency_ms +=
                (latency_ms - self.avg_latency_ms) / self.latency_samples as f64;
            self.min_latency_ms = self.min_latency_ms.min(latency_ms);
            self.max_latency_ms = self.max_latency_ms.max(latency_ms);
        }

        if let Some(mem) = memory_bytes {
            self.last_memory_bytes = mem;
        }

        if self.recent.len() >= ring_capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(now);
    }

    fn error_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.count as f64
        }
    }
}

/// Per-operation slice of a component report
#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    pub operation: String,
    pub count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
}

/// Per-component performance report over a query period
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub component: String,
    pub period_secs: u64,
    pub total_activities: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub throughput_per_sec: f64,
    pub grade: PerformanceGrade,
    pub operations: Vec<OperationReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentLatency {
    pub component: String,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentErrorRate {
    pub component: String,
    pub error_rate: f64,
}

/// System-wide aggregation of the worst offenders
#[derive(Debug, Clone, Serialize)]
pub struct SystemPerformanceReport {
    pub generated_at: DateTime<Utc>,
    pub tracked_keys: usize,
    pub slowest: Vec<ComponentLatency>,
    pub most_error_prone: Vec<ComponentErrorRate>,
}

/// Metrics collector for component activity
pub struct PerformanceTracker {
    config: MetricsConfig,
    entries: RwLock<HashMap<MetricKey, Arc<Mutex<OperationMetrics>>>>,
}

impl PerformanceTracker {
    /// Create a new tracker
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(MetricsConfig::default())
    }

    /// Record one activity sample
    pub async fn record(
        &self,
        component: &str,
        operation: &str,
        duration: Option<Duration>,
        memory_bytes: Option<u64>,
        is_error: bool,
    ) {
        let key = MetricKey {
            component: component.to_string(),
            operation: operation.to_string(),
        };
        let now = Utc::now();

        let entry = {
            let entries = self.entries.read().await;
            entries.get(&key).cloned()
        };

        let entry = match entry {
            Some(entry) => entry,
            None => {
                let mut entries = self.entries.write().await;
                entries
                    .entry(key)
                    .or_insert_with(|| Arc::new(Mutex::new(OperationMetrics::new(now))))
                    .clone()
            }
        };

        let mut metrics = entry.lock().await;
        metrics.record(now, duration, memory_bytes, is_error, self.config.recent_samples);
    }

    /// Performance report for one component over a trailing period
    pub async fn performance_report(
        &self,
        component: &str,
        period: Duration,
    ) -> Option<PerformanceReport> {
        let period_secs = period.as_secs().max(1);
        let window_start = Utc::now() - chrono::Duration::seconds(period_secs as i64);

        let matching: Vec<(String, Arc<Mutex<OperationMetrics>>)> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|(key, _)| key.component == component)
                .map(|(key, value)| (key.operation.clone(), value.clone()))
                .collect()
        };

        if matching.is_empty() {
            return None;
        }

        let mut total = 0u64;
        let mut errors = 0u64;
        let mut latency_weight = 0u64;
        let mut latency_sum = 0.0;
        let mut recent_in_period = 0u64;
        let mut operations = Vec::with_capacity(matching.len());

        for (operation, entry) in matching {
            let metrics = entry.lock().await;
            total += metrics.count;
            errors += metrics.error_count;
            if metrics.latency_samples > 0 {
                latency_weight += metrics.latency_samples;
                latency_sum += metrics.avg_latency_ms * metrics.latency_samples as f64;
            }
            recent_in_period += metrics
                .recent
                .iter()
                .filter(|t| **t >= window_start)
                .count() as u64;

            operations.push(OperationReport {
                operation,
                count: metrics.count,
                error_count: metrics.error_count,
                avg_latency_ms: metrics.avg_latency_ms,
                min_latency_ms: (metrics.latency_samples > 0).then_some(metrics.min_latency_ms),
                max_latency_ms: (metrics.latency_samples > 0).then_some(metrics.max_latency_ms),
            });
        }

        operations.sort_by(|a, b| a.operation.cmp(&b.operation));

        let error_rate = if total == 0 { 0.0 } else { errors as f64 / total as f64 };
        let avg_latency_ms = if latency_weight == 0 {
            0.0
        } else {
            latency_sum / latency_weight as f64
        };

        Some(PerformanceReport {
            component: component.to_string(),
            period_secs,
            total_activities: total,
            error_count: errors,
            error_rate,
            avg_latency_ms,
            throughput_per_sec: recent_in_period as f64 / period_secs as f64,
            grade: PerformanceGrade::from_profile(avg_latency_ms, error_rate),
            operations,
        })
    }

    /// Letter grade for one component
    pub async fn grade(&self, component: &str) -> Option<PerformanceGrade> {
        self.performance_report(component, Duration::from_secs(self.config.throughput_window_secs))
            .await
            .map(|r| r.grade)
    }

    /// System-wide report: top-N slowest and most error-prone components
    pub async fn system_report(&self) -> SystemPerformanceReport {
        let snapshot: Vec<(MetricKey, Arc<Mutex<OperationMetrics>>)> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        };

        // Collapse operations into per-component aggregates
        let mut per_component: HashMap<String, (u64, u64, u64, f64)> = HashMap::new();
        for (key, entry) in &snapshot {
            let metrics = entry.lock().await;
            let agg = per_component
                .entry(key.component.clone())
                .or_insert((0, 0, 0, 0.0));
            agg.0 += metrics.count;
            agg.1 += metrics.error_count;
            agg.2 += metrics.latency_samples;
            agg.3 += metrics.avg_latency_ms * metrics.latency_samples as f64;
        }

        let mut slowest: Vec<ComponentLatency> = per_component
            .iter()
            .filter(|(_, (_, _, samples, _))| *samples > 0)
            .map(|(component, (_, _, samples, weighted))| ComponentLatency {
                component: component.clone(),
                avg_latency_ms: weighted / *samples as f64,
            })
            .collect();
        slowest.sort_by(|a, b| {
            b.avg_latency_ms
                .partial_cmp(&a.avg_latency_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        slowest.truncate(self.config.report_top_n);

        let mut most_error_prone: Vec<ComponentErrorRate> = per_component
            .iter()
            .filter(|(_, (count, errors, _, _))| *count > 0 && *errors > 0)
            .map(|(component, (count, errors, _, _))| ComponentErrorRate {
                component: component.clone(),
                error_rate: *errors as f64 / *count as f64,
            })
            .collect();
        most_error_prone.sort_by(|a, b| {
            b.error_rate
                .partial_cmp(&a.error_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        most_error_prone.truncate(self.config.report_top_n);

        SystemPerformanceReport {
            generated_at: Utc::now(),
            tracked_keys: snapshot.len(),
            slowest,
            most_error_prone,
        }
    }

    /// Number of tracked component+operation keys
    pub async fn tracked_keys(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Rough resident footprint used by the memory monitor
    pub async fn estimated_footprint_bytes(&self) -> u64 {
        let entries = self.entries.read().await;
        let mut total = 0u64;
        for (key, entry) in entries.iter() {
            let ring = entry.lock().await.recent.len() as u64;
            total += 192 + (key.component.len() + key.operation.len()) as u64 + ring * 16;
        }
        total
    }

    /// Drop entries idle past the retention window and enforce the key
    /// cap, evicting least-recently-active keys first. Returns how many
    /// entries were removed.
    pub async fn prune(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.retention_secs as i64);
        let mut removed = 0;

        let mut stale_or_all: Vec<(MetricKey, DateTime<Utc>)> = Vec::new();
        {
            let entries = self.entries.read().await;
            for (key, entry) in entries.iter() {
                let last = entry.lock().await.last_activity;
                stale_or_all.push((key.clone(), last));
            }
        }

        let mut entries = self.entries.write().await;
        for (key, last) in &stale_or_all {
            if *last < cutoff {
                entries.remove(key);
                removed += 1;
            }
        }

        if entries.len() > self.config.max_keys {
            let mut remaining: Vec<(MetricKey, DateTime<Utc>)> = stale_or_all
                .into_iter()
                .filter(|(key, _)| entries.contains_key(key))
                .collect();
            remaining.sort_by_key(|(_, last)| *last);
            let excess = entries.len() - self.config.max_keys;
            for (key, _) in remaining.into_iter().take(excess) {
                entries.remove(&key);
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Pruned {} metric entries", removed);
        }
        removed
    }

    /// Forced reclamation: clear every activity ring and drop entries idle
    /// longer than the throughput window. Best-effort memory release.
    pub async fn reclaim(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.throughput_window_secs as i64);
        let mut removed = 0;

        let keys: Vec<(MetricKey, DateTime<Utc>)> = {
            let entries = self.entries.read().await;
            let mut out = Vec::with_capacity(entries.len());
            for (key, entry) in entries.iter() {
                let mut metrics = entry.lock().await;
                metrics.recent.clear();
                metrics.recent.shrink_to_fit();
                out.push((key.clone(), metrics.last_activity));
            }
            out
        };

        let mut entries = self.entries.write().await;
        for (key, last) in keys {
            if last < cutoff {
                entries.remove(&key);
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_moving_average_matches_samples() {
        let tracker = PerformanceTracker::with_defaults();

        for ms in [10u64, 20, 30] {
            tracker
                .record("alpha", "scan", Some(Duration::from_millis(ms)), None, false)
                .await;
        }

        let report = tracker
            .performance_report("alpha", Duration::from_secs(60))
            .await
            .unwrap();
        assert!((report.avg_latency_ms - 20.0).abs() < 1e-9);
        assert_eq!(report.total_activities, 3);

        let op = &report.operations[0];
        assert_eq!(op.min_latency_ms, Some(10.0));
        assert_eq!(op.max_latency_ms, Some(30.0));
    }

    #[tokio::test]
    async fn test_error_rate_and_grade() {
        let tracker = PerformanceTracker::with_defaults();

        for i in 0..10 {
            tracker
                .record("alpha", "scan", Some(Duration::from_millis(5)), None, i < 3)
                .await;
        }

        let report = tracker
            .performance_report("alpha", Duration::from_secs(60))
            .await
            .unwrap();
        assert!((report.error_rate - 0.3).abs() < 1e-9);
        assert_eq!(report.grade, PerformanceGrade::F);
    }

    #[tokio::test]
    async fn test_grade_thresholds() {
        assert_eq!(PerformanceGrade::from_profile(5.0, 0.0), PerformanceGrade::A);
        assert_eq!(PerformanceGrade::from_profile(100.0, 0.0), PerformanceGrade::B);
        assert_eq!(PerformanceGrade::from_profile(500.0, 0.0), PerformanceGrade::C);
        assert_eq!(PerformanceGrade::from_profile(2_000.0, 0.0), PerformanceGrade::D);
        assert_eq!(PerformanceGrade::from_profile(5.0, 0.30), PerformanceGrade::F);
    }

    #[tokio::test]
    async fn test_throughput_counts_recent_window() {
        let tracker = PerformanceTracker::with_defaults();

        for _ in 0..30 {
            tracker.record("alpha", "tick", None, None, false).await;
        }

        let report = tracker
            .performance_report("alpha", Duration::from_secs(10))
            .await
            .unwrap();
        assert!((report.throughput_per_sec - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_prune_enforces_key_cap_oldest_first() {
        let config = MetricsConfig {
            max_keys: 2,
            ..Default::default()
        };
        let tracker = PerformanceTracker::new(config);

        tracker.record("oldest", "op", None, None, false).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        tracker.record("middle", "op", None, None, false).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        tracker.record("newest", "op", None, None, false).await;

        let removed = tracker.prune().await;
        assert_eq!(removed, 1);
        assert_eq!(tracker.tracked_keys().await, 2);
        assert!(tracker
            .performance_report("oldest", Duration::from_secs(60))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_system_report_ranks_offenders() {
        let tracker = PerformanceTracker::with_defaults();

        tracker
            .record("slow", "op", Some(Duration::from_millis(500)), None, false)
            .await;
        tracker
            .record("fast", "op", Some(Duration::from_millis(1)), None, false)
            .await;
        tracker.record("flaky", "op", None, None, true).await;

        let report = tracker.system_report().await;
        assert_eq!(report.slowest[0].component, "slow");
        assert_eq!(report.most_error_prone[0].component, "flaky");
        assert_eq!(report.tracked_keys, 3);
    }
}
