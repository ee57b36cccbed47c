//! Event Bus for State-Change Notifications
//!
//! A single bounded queue fans component state changes out to subscriber
//! callbacks without ever blocking the producers. Delivery is explicitly
//! lossy: when the queue is full the oldest envelope is dropped, and
//! high-frequency kinds are coalesced inside a throttle window.

pub mod bus;

pub use bus::{
    EventBus, EventBusStats, EventEnvelope, EventKind, SubscriptionId,
};
