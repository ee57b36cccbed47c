//! Runtime Assembly
//!
//! Explicit lifecycle for the resilience layer: a shutdown flag shared by
//! every background loop, a scheduler owning cancellable periodic tasks,
//! and the `Vigil` facade that wires registry, bus, tracker and monitors
//! together and starts them exactly once.

pub mod scheduler;
pub mod shutdown;
pub mod vigil;

pub use scheduler::Scheduler;
pub use shutdown::{install_signal_handlers, ShutdownFlag};
pub use vigil::Vigil;
