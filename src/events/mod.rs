//! Lifecycle events and the bus that carries them.
//!
//! Every context operation, component start and orchestrator transition is described by
//! an [`Event`] of some [`EventKind`] and sent on the [`Bus`], a `tokio::sync::broadcast`
//! channel shared by the whole tree.
//!
//! The orchestrator's listener is the single consumer: it feeds the `StartupTracker` and
//! hands each event to the `SubscriberSet`. Subscriber workers publish back onto the bus
//! when a queue overflows or a handler panics.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
