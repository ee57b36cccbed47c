//! Component Registry and Circuit Breakers
//!
//! The registry is the sole owner of every component's registration
//! record, health record, circuit breaker and activity counters. Producers
//! report activity through it from the hot update path; background
//! monitors read from it on their own schedules without blocking that
//! path.

pub mod breaker;
pub mod records;
#[allow(clippy::module_inception)]
pub mod registry;

pub use breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use records::{ComponentRecord, ComponentHealth, HealthSnapshot, HealthStatus};
pub use registry::ComponentRegistry;
