//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking event publishing from every part of the runtime (contexts, the
//! component starter, the orchestrator, subscriber workers).
//!
//! ## Architecture
//! ```text
//! Publishers (many):                    Subscriber (one):
//!   Context ops   ──┐
//!   start_component ┼──────► Bus ──────► subscriber_listener ────► SubscriberSet
//!   Orchestrator  ──┤  (broadcast chan)   (in Orchestrator)    └──► StartupTracker
//!   Sub. workers  ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks; it calls `broadcast::Sender::send`.
//! - **Bounded capacity**: a single ring buffer stores recent events for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if there are no active receivers at send time.

use tokio::sync::broadcast;

use super::event::Event;
use crate::config::MAX_BUS_CAPACITY;

/// Broadcast channel for runtime events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to `1..=MAX_BUS_CAPACITY`).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_BUS_CAPACITY);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    ///
    /// If there are no receivers the event is dropped.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that observes events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
