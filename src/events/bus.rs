//! Throttled Event Bus
//!
//! Producers enqueue with O(1) work and never block on subscribers; a
//! periodic drain dispatches bounded batches to per-kind callbacks.
//! Callback errors and panics are isolated so one misbehaving subscriber
//! cannot stall delivery to the rest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::EventBusConfig;

/// Closed set of event kinds carried by the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Component registered
    Registered,
    /// Component unregistered
    Unregistered,
    /// Component reported an error
    Error,
    /// Component recovered (breaker closed after HalfOpen probe)
    Recovered,
    /// Circuit breaker tripped open
    CircuitOpened,
    /// Health status reclassified
    HealthChanged,
    /// Configuration holder published a change
    ConfigChanged,
    /// High-frequency advisory signal; throttled by default
    SignalGenerated,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Registered => write!(f, "registered"),
            EventKind::Unregistered => write!(f, "unregistered"),
            EventKind::Error => write!(f, "error"),
            EventKind::Recovered => write!(f, "recovered"),
            EventKind::CircuitOpened => write!(f, "circuit_opened"),
            EventKind::HealthChanged => write!(f, "health_changed"),
            EventKind::ConfigChanged => write!(f, "config_changed"),
            EventKind::SignalGenerated => write!(f, "signal_generated"),
        }
    }
}

/// Immutable event payload handed to subscribers.
///
/// Components are referenced by identifier value, never by pointer, so a
/// queued envelope stays valid after its component is unregistered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub kind: EventKind,
    pub component: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(kind: EventKind, component: Option<&str>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            component: component.map(String::from),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
pub type SubscriptionId = Uuid;

type Callback = Box<dyn Fn(&EventEnvelope) -> anyhow::Result<()> + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    name: String,
    callback: Callback,
}

#[derive(Default)]
struct ThrottleSlot {
    pending: Option<EventEnvelope>,
    last_flush: Option<Instant>,
    coalesced: u64,
}

/// Queue statistics snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventBusStats {
    pub queued: usize,
    pub published: u64,
    pub dropped: u64,
    pub dispatched: u64,
    pub expired: u64,
    pub callback_failures: u64,
}

/// Bounded, lossy, throttled event bus
pub struct EventBus {
    config: EventBusConfig,
    queue: Mutex<VecDeque<EventEnvelope>>,
    throttle: Mutex<HashMap<EventKind, ThrottleSlot>>,
    throttled_kinds: HashSet<EventKind>,
    subscribers: RwLock<HashMap<EventKind, Vec<Arc<Subscriber>>>>,
    published: AtomicU64,
    dropped: AtomicU64,
    dispatched: AtomicU64,
    expired: AtomicU64,
    callback_failures: AtomicU64,
}

impl EventBus {
    /// Create a new event bus
    pub fn new(config: EventBusConfig) -> Self {
        let mut throttled_kinds = HashSet::new();
        throttled_kinds.insert(EventKind::SignalGenerated);

        Self {
            config,
            queue: Mutex::new(VecDeque::new()),
            throttle: Mutex::new(HashMap::new()),
            throttled_kinds,
            subscribers: RwLock::new(HashMap::new()),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            callback_failures: AtomicU64::new(0),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(EventBusConfig::default())
    }

    /// Mark an additional event kind as throttled
    pub fn with_throttled_kind(mut self, kind: EventKind) -> Self {
        self.throttled_kinds.insert(kind);
        self
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_throttle(&self) -> MutexGuard<'_, HashMap<EventKind, ThrottleSlot>> {
        self.throttle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish an event. Never blocks the caller: O(1) enqueue, and a full
    /// queue silently drops its oldest envelope.
    ///
    /// Throttled kinds are staged newest-wins in a per-kind slot and
    /// promoted to the queue at most once per throttle interval.
    pub fn publish(&self, event: EventEnvelope) {
        self.published.fetch_add(1, Ordering::Relaxed);

        if self.throttled_kinds.contains(&event.kind) {
            let mut slots = self.lock_throttle();
            let slot = slots.entry(event.kind).or_default();
            if slot.pending.replace(event).is_some() {
                slot.coalesced += 1;
            }
            return;
        }

        let mut queue = self.lock_queue();
        self.enqueue_locked(&mut queue, event);
    }

    fn enqueue_locked(&self, queue: &mut VecDeque<EventEnvelope>, event: EventEnvelope) {
        if queue.len() >= self.config.queue_capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
    }

    /// Promote staged throttled events whose interval has elapsed
    fn flush_throttled(&self) {
        let interval = Duration::from_millis(self.config.throttle_interval_ms);
        let now = Instant::now();
        let mut promoted = Vec::new();

        {
            let mut slots = self.lock_throttle();
            for slot in slots.values_mut() {
                let due = slot
                    .last_flush
                    .map_or(true, |t| now.duration_since(t) >= interval);
                if due {
                    if let Some(event) = slot.pending.take() {
                        if slot.coalesced > 0 {
                            debug!(
                                kind = %event.kind,
                                coalesced = slot.coalesced,
                                "Coalesced throttled events into most recent"
                            );
                            slot.coalesced = 0;
                        }
                        slot.last_flush = Some(now);
                        promoted.push(event);
                    }
                }
            }
        }

        if !promoted.is_empty() {
            let mut queue = self.lock_queue();
            for event in promoted {
                self.enqueue_locked(&mut queue, event);
            }
        }
    }

    /// Register a callback for one event kind. The callback receives an
    /// immutable envelope and may safely call back into the bus or the
    /// registry; it runs outside every bus lock.
    pub async fn subscribe<F>(&self, kind: EventKind, name: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&EventEnvelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        let subscriber = Arc::new(Subscriber {
            id,
            name: name.to_string(),
            callback: Box::new(callback),
        });

        let mut subs = self.subscribers.write().await;
        subs.entry(kind).or_default().push(subscriber);
        debug!("Subscribed '{}' to {} events", name, kind);
        id
    }

    /// Remove a subscription. Returns false if it was not found.
    pub async fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.write().await;
        if let Some(list) = subs.get_mut(&kind) {
            let before = list.len();
            list.retain(|s| s.id != id);
            return list.len() != before;
        }
        false
    }

    /// Drain up to one batch of queued events and dispatch them.
    ///
    /// Returns the number of envelopes delivered to at least one callback.
    /// Envelopes past the max age are expired without dispatch. A callback
    /// error or panic is logged and never stops the drain.
    pub async fn dispatch_cycle(&self) -> usize {
        self.flush_throttled();

        let batch: Vec<EventEnvelope> = {
            let mut queue = self.lock_queue();
            let take = queue.len().min(self.config.dispatch_batch);
            queue.drain(..take).collect()
        };

        if batch.is_empty() {
            return 0;
        }

        let max_age = chrono::Duration::seconds(self.config.max_event_age_secs as i64);
        let now = Utc::now();
        let mut delivered = 0;

        for event in batch {
            if now.signed_duration_since(event.created_at) > max_age {
                self.expired.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let targets: Vec<Arc<Subscriber>> = {
                let subs = self.subscribers.read().await;
                subs.get(&event.kind).cloned().unwrap_or_default()
            };

            for subscriber in &targets {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    (subscriber.callback)(&event)
                }));
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        self.callback_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            "Subscriber '{}' failed on {} event: {}",
                            subscriber.name, event.kind, e
                        );
                    }
                    Err(_) => {
                        self.callback_failures.fetch_add(1, Ordering::Relaxed);
                        error!(
                            "Subscriber '{}' panicked on {} event",
                            subscriber.name, event.kind
                        );
                    }
                }
            }

            if !targets.is_empty() {
                delivered += 1;
            }
            self.dispatched.fetch_add(1, Ordering::Relaxed);
        }

        delivered
    }

    /// Drop queued envelopes older than the max age. Used by the memory
    /// monitor's gentle cleanup pass.
    pub fn prune_aged(&self) -> usize {
        let max_age = chrono::Duration::seconds(self.config.max_event_age_secs as i64);
        let now = Utc::now();
        let mut queue = self.lock_queue();
        let before = queue.len();
        queue.retain(|e| now.signed_duration_since(e.created_at) <= max_age);
        let removed = before - queue.len();
        if removed > 0 {
            self.expired.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Discard every queued envelope. Forced reclamation only.
    pub fn clear(&self) -> usize {
        let mut queue = self.lock_queue();
        let removed = queue.len();
        queue.clear();
        if removed > 0 {
            self.dropped.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Current queue depth
    pub fn queued(&self) -> usize {
        self.lock_queue().len()
    }

    /// Snapshot of bus statistics
    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            queued: self.queued(),
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn envelope(kind: EventKind) -> EventEnvelope {
        EventEnvelope::new(kind, Some("test"), serde_json::json!({}))
    }

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let config = EventBusConfig {
            queue_capacity: 3,
            ..Default::default()
        };
        let bus = EventBus::new(config);

        for i in 0..5 {
            bus.publish(EventEnvelope::new(
                EventKind::Error,
                Some("c"),
                serde_json::json!({ "seq": i }),
            ));
        }

        assert_eq!(bus.queued(), 3);
        let stats = bus.stats();
        assert_eq!(stats.published, 5);
        assert_eq!(stats.dropped, 2);

        // Oldest were dropped, so the front of the queue is seq 2
        let front_seq = bus.lock_queue().front().unwrap().payload["seq"].clone();
        assert_eq!(front_seq, serde_json::json!(2));
    }

    #[tokio::test]
    async fn test_throttled_kind_coalesces_to_most_recent() {
        let config = EventBusConfig {
            throttle_interval_ms: 50,
            ..Default::default()
        };
        let bus = EventBus::new(config);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        bus.subscribe(EventKind::SignalGenerated, "collector", move |e| {
            seen_clone.lock().unwrap().push(e.payload["seq"].clone());
            Ok(())
        })
        .await;

        for i in 0..100 {
            bus.publish(EventEnvelope::new(
                EventKind::SignalGenerated,
                Some("alpha"),
                serde_json::json!({ "seq": i }),
            ));
        }

        bus.dispatch_cycle().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], serde_json::json!(99));
    }

    #[tokio::test]
    async fn test_throttle_window_allows_next_after_interval() {
        let config = EventBusConfig {
            throttle_interval_ms: 20,
            ..Default::default()
        };
        let bus = EventBus::new(config);

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.subscribe(EventKind::SignalGenerated, "counter", move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

        bus.publish(envelope(EventKind::SignalGenerated));
        bus.dispatch_cycle().await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        bus.publish(envelope(EventKind::SignalGenerated));
        bus.dispatch_cycle().await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_stop_drain() {
        let bus = EventBus::with_defaults();

        let ok_count = Arc::new(AtomicUsize::new(0));
        let ok_clone = ok_count.clone();

        bus.subscribe(EventKind::Error, "bad", |_| {
            anyhow::bail!("subscriber exploded")
        })
        .await;
        bus.subscribe(EventKind::Error, "panicky", |_| {
            panic!("subscriber panicked")
        })
        .await;
        bus.subscribe(EventKind::Error, "good", move |_| {
            ok_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

        bus.publish(envelope(EventKind::Error));
        bus.publish(envelope(EventKind::Error));
        bus.dispatch_cycle().await;

        assert_eq!(ok_count.load(Ordering::SeqCst), 2);
        assert_eq!(bus.stats().callback_failures, 4);
    }

    #[tokio::test]
    async fn test_dispatch_respects_batch_size() {
        let config = EventBusConfig {
            dispatch_batch: 10,
            ..Default::default()
        };
        let bus = EventBus::new(config);

        for _ in 0..25 {
            bus.publish(envelope(EventKind::HealthChanged));
        }

        bus.dispatch_cycle().await;
        assert_eq!(bus.queued(), 15);
        bus.dispatch_cycle().await;
        assert_eq!(bus.queued(), 5);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::with_defaults();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        let id = bus
            .subscribe(EventKind::Recovered, "once", move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        bus.publish(envelope(EventKind::Recovered));
        bus.dispatch_cycle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(bus.unsubscribe(EventKind::Recovered, id).await);
        bus.publish(envelope(EventKind::Recovered));
        bus.dispatch_cycle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
