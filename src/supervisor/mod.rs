//! Supervisor Layer for System Monitoring and Recovery
//!
//! Periodic monitors that scan the registry without blocking the hot
//! update path: health reclassification with automatic recovery, and
//! advisory memory watching with graduated cleanup.

pub mod health_monitor;
pub mod memory_monitor;

pub use health_monitor::{HealthMonitor, SystemHealthReport};
pub use memory_monitor::MemoryMonitor;
