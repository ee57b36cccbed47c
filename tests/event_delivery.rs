//! Event bus delivery contracts: lossy capacity, non-blocking publish,
//! coalescing, and subscriber fault isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vigil::{EventBus, EventBusConfig, EventEnvelope, EventKind};

fn envelope(kind: EventKind, seq: usize) -> EventEnvelope {
    EventEnvelope::new(kind, Some("producer"), serde_json::json!({ "seq": seq }))
}

#[tokio::test]
async fn publishing_past_capacity_retains_exactly_capacity_newest() {
    let config = EventBusConfig {
        queue_capacity: 16,
        dispatch_batch: 1_000,
        ..Default::default()
    };
    let bus = Arc::new(EventBus::new(config));

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    bus.subscribe(EventKind::Error, "collector", move |e| {
        seen_clone
            .lock()
            .unwrap()
            .push(e.payload["seq"].as_u64().unwrap());
        Ok(())
    })
    .await;

    for seq in 0..100 {
        bus.publish(envelope(EventKind::Error, seq));
    }

    let stats = bus.stats();
    assert_eq!(stats.queued, 16);
    assert_eq!(stats.dropped, 84);

    bus.dispatch_cycle().await;
    let seen = seen.lock().unwrap();
    // Oldest dropped first: only the newest 16 survive, in order
    assert_eq!(seen.len(), 16);
    assert_eq!(*seen.first().unwrap(), 84);
    assert_eq!(*seen.last().unwrap(), 99);
}

#[tokio::test]
async fn publish_is_cheap_even_when_queue_is_full() {
    let config = EventBusConfig {
        queue_capacity: 8,
        ..Default::default()
    };
    let bus = EventBus::new(config);

    let start = Instant::now();
    for seq in 0..10_000 {
        bus.publish(envelope(EventKind::HealthChanged, seq));
    }
    // O(1) work per publish: four orders of magnitude below any
    // subscriber-bound path
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(bus.queued(), 8);
}

#[tokio::test]
async fn hundred_signals_inside_window_dispatch_exactly_once() {
    let config = EventBusConfig {
        throttle_interval_ms: 50,
        ..Default::default()
    };
    let bus = EventBus::new(config);

    let dispatched = Arc::new(AtomicUsize::new(0));
    let dispatched_clone = dispatched.clone();
    bus.subscribe(EventKind::SignalGenerated, "consumer", move |_| {
        dispatched_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .await;

    let start = Instant::now();
    for seq in 0..100 {
        bus.publish(envelope(EventKind::SignalGenerated, seq));
    }
    assert!(start.elapsed() < Duration::from_millis(10));

    bus.dispatch_cycle().await;
    bus.dispatch_cycle().await;

    assert_eq!(dispatched.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn subscriber_failures_never_reach_the_publisher() {
    let bus = EventBus::with_defaults();

    bus.subscribe(EventKind::ConfigChanged, "panicky", |_| {
        panic!("subscriber bug")
    })
    .await;

    let delivered = Arc::new(AtomicUsize::new(0));
    let delivered_clone = delivered.clone();
    bus.subscribe(EventKind::ConfigChanged, "steady", move |_| {
        delivered_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .await;

    for seq in 0..5 {
        bus.publish(envelope(EventKind::ConfigChanged, seq));
    }
    bus.dispatch_cycle().await;

    assert_eq!(delivered.load(Ordering::SeqCst), 5);
    assert_eq!(bus.stats().callback_failures, 5);
}
