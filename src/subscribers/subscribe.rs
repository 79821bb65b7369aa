//! # Subscriber extension point
//!
//! Implement [`Subscribe`] to observe the events of a running tree. Subscribers are
//! registered through [`OrchestratorBuilder`](crate::OrchestratorBuilder); each one is
//! served by its own worker draining a bounded queue owned by the
//! [`SubscriberSet`](crate::SubscriberSet).
//!
//! ## Rules
//! - A slow handler delays only its own queue, never the publisher.
//! - When the queue is full the event is dropped for that subscriber and a
//!   `SubscriberOverflow` event is published.
//! - A panicking handler is reported as `SubscriberPanicked`; its worker keeps running.
//!
//! ## Example
//! ```rust
//! use strata::{Event, EventKind, Subscribe};
//!
//! struct FailureCounter(std::sync::atomic::AtomicUsize);
//!
//! #[async_trait::async_trait]
//! impl Subscribe for FailureCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::ComponentFailed {
//!             self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         }
//!     }
//!     fn name(&self) -> &'static str { "failure-counter" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Receives runtime events in publication order.
///
/// Handlers run on the subscriber's worker task; keep them async and non-blocking.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event.
    async fn on_event(&self, event: &Event);

    /// Name reported in overflow and panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Queue length before events start being dropped for this subscriber.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
