//! Component Capability Interface
//!
//! Fixed capability seam implemented by every managed analytic component
//! (signal generators, market-state analyzers, configuration holders).
//! The registry only ever talks to components through this trait, and only
//! outside its own locks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Registration metadata for a component.
///
/// Compared structurally on re-registration: an identical spec is an
/// idempotent no-op, a conflicting one is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Declared component type (e.g. "signal_generator")
    pub kind: String,
    /// Component version string
    pub version: String,
    /// Critical components get doubled weight in the system health score
    /// and are eligible for automatic recovery
    pub critical: bool,
    /// Staleness budget: activity expected at least this often (ms)
    pub expected_response_ms: u64,
    /// Declared memory budget (bytes)
    pub max_memory_bytes: u64,
}

impl ComponentSpec {
    pub fn new(kind: &str, version: &str) -> Self {
        Self {
            kind: kind.to_string(),
            version: version.to_string(),
            critical: false,
            expected_response_ms: 30_000,
            max_memory_bytes: 64 * 1024 * 1024,
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn with_expected_response_ms(mut self, ms: u64) -> Self {
        self.expected_response_ms = ms;
        self
    }

    pub fn with_max_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = bytes;
        self
    }
}

/// Capability interface for components that want lifecycle management.
///
/// `initialize` is invoked on registration and on automatic recovery,
/// `shutdown` on unregistration. Both run outside every registry lock, so
/// implementations may call back into the registry. Errors are captured at
/// the boundary and recorded against the component's circuit breaker; they
/// never propagate into registry control flow.
#[async_trait]
pub trait ManagedComponent: Send + Sync {
    /// Unique component identifier
    fn identifier(&self) -> &str;

    /// Component version
    fn version(&self) -> &str;

    /// Bring the component up (or back up, on recovery)
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Tear the component down
    async fn shutdown(&self) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_builder() {
        let spec = ComponentSpec::new("signal_generator", "1.2.0")
            .critical()
            .with_expected_response_ms(1_000);

        assert!(spec.critical);
        assert_eq!(spec.expected_response_ms, 1_000);
        assert_eq!(spec.kind, "signal_generator");
    }

    #[test]
    fn test_spec_equality_for_idempotent_registration() {
        let a = ComponentSpec::new("analyzer", "0.1.0");
        let b = ComponentSpec::new("analyzer", "0.1.0");
        let c = ComponentSpec::new("analyzer", "0.2.0");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
