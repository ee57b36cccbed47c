//! Per-Component Circuit Breaker
//!
//! Implements the circuit breaker pattern for component activity to
//! prevent cascading failures: consecutive errors trip the circuit open,
//! and recovery is probed through a half-open state after a timeout.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    /// Normal operation - activity allowed
    Closed,
    /// Failure threshold exceeded - component considered unsafe
    Open,
    /// Recovery period - next activity report decides the outcome
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker for one registered component
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    last_failure_at: RwLock<Option<DateTime<Utc>>>,
    opened_at: RwLock<Option<DateTime<Utc>>>,
    total_trips: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            last_failure_at: RwLock::new(None),
            opened_at: RwLock::new(None),
            total_trips: AtomicU64::new(0),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(BreakerConfig::default())
    }

    /// Get current state without side effects
    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    /// Current consecutive failure count
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    /// Check whether activity is considered safe.
    ///
    /// Closed and HalfOpen allow activity. An Open circuit whose recovery
    /// timeout has elapsed lazily transitions to HalfOpen on this call and
    /// allows the probe through.
    pub async fn should_allow(&self) -> bool {
        let state = self.state().await;

        if state == CircuitState::Open {
            if let Some(opened_at) = *self.opened_at.read().await {
                let elapsed = Utc::now()
                    .signed_duration_since(opened_at)
                    .num_milliseconds();
                if elapsed >= self.config.recovery_timeout_ms as i64 {
                    self.transition_to_half_open().await;
                    return true;
                }
            }
            return false;
        }

        true
    }

    /// Record a failed activity report. Returns true when this call
    /// tripped the circuit open (including a HalfOpen re-trip).
    pub async fn record_failure(&self, component: &str) -> bool {
        let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_failure_at.write().await = Some(Utc::now());

        let state = self.state().await;
        match state {
            CircuitState::Closed => {
                if failures >= self.config.failure_threshold {
                    self.trip(component, failures).await;
                    return true;
                }
                false
            }
            // The half-open probe failed: re-open and refresh opened_at
            CircuitState::HalfOpen => {
                self.trip(component, failures).await;
                true
            }
            CircuitState::Open => false,
        }
    }

    /// Record a successful activity report. Returns true when this call
    /// closed a HalfOpen circuit (the component recovered).
    pub async fn record_success(&self, component: &str) -> bool {
        let state = self.state().await;
        match state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
                false
            }
            CircuitState::HalfOpen => {
                self.close(component).await;
                true
            }
            // Success while open does not bypass the recovery probe
            CircuitState::Open => false,
        }
    }

    async fn trip(&self, component: &str, failures: u32) {
        let mut state = self.state.write().await;
        *state = CircuitState::Open;
        *self.opened_at.write().await = Some(Utc::now());
        self.total_trips.fetch_add(1, Ordering::SeqCst);

        warn!(
            "Circuit breaker for {} OPEN after {} consecutive failures",
            component, failures
        );
    }

    async fn transition_to_half_open(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::Open {
            *state = CircuitState::HalfOpen;
            info!("Circuit breaker transitioning to HALF-OPEN");
        }
    }

    async fn close(&self, component: &str) {
        let mut state = self.state.write().await;
        *state = CircuitState::Closed;
        self.failure_count.store(0, Ordering::SeqCst);
        *self.opened_at.write().await = None;

        info!("Circuit breaker for {} CLOSED - normal operation resumed", component);
    }

    /// Force the circuit to HalfOpen and clear the failure counter.
    /// Used by the health monitor's recovery path for critical components.
    pub async fn force_half_open(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::Open {
            *state = CircuitState::HalfOpen;
            debug!("Circuit breaker forced to HALF-OPEN for recovery");
        }
        self.failure_count.store(0, Ordering::SeqCst);
    }

    /// Force the circuit closed (manual or monitor-confirmed reset)
    pub async fn force_close(&self, component: &str) {
        self.close(component).await;
    }

    /// Milliseconds until an Open circuit becomes eligible for HalfOpen
    pub async fn time_until_recovery_ms(&self) -> u64 {
        if let Some(opened_at) = *self.opened_at.read().await {
            let elapsed = Utc::now()
                .signed_duration_since(opened_at)
                .num_milliseconds()
                .max(0) as u64;
            self.config.recovery_timeout_ms.saturating_sub(elapsed)
        } else {
            0
        }
    }

    /// Get breaker statistics
    pub async fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            state: self.state().await,
            failure_count: self.failure_count.load(Ordering::SeqCst),
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_ms: self.config.recovery_timeout_ms,
            last_failure_at: *self.last_failure_at.read().await,
            opened_at: *self.opened_at.read().await,
            total_trips: self.total_trips.load(Ordering::SeqCst),
        }
    }
}

/// Statistics for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub total_trips: u64,
}
