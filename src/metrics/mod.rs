//! Performance Metrics
//!
//! Per component+operation activity aggregates with bounded history:
//! moving-average latency, error rates, throughput windows, letter grades
//! and a system-wide report of the worst offenders.

pub mod tracker;

pub use tracker::{
    ComponentErrorRate, ComponentLatency, OperationReport, PerformanceGrade, PerformanceReport,
    PerformanceTracker, SystemPerformanceReport,
};
