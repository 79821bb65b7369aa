//! # Startup tracker with sequence-based ordering.
//!
//! Maintains the set of components that began starting but have not finished yet,
//! using event sequence numbers to handle out-of-order delivery.
//!
//! ## Architecture
//! ```text
//! Orchestrator ──► Bus ──► subscriber_listener() ──► StartupTracker::update()
//!                                                          │
//!                                                          ▼
//!                                          HashMap<"context:component", State>
//! ```
//!
//! ## Rules
//! - `ComponentStarting` marks a component as pending.
//! - `ComponentStarted` / `ComponentFailed` clear it.
//! - Events with `seq <= last_seq` for the same component are rejected (stale).
//! - Every event, component-related or not, advances the processed high-water mark that
//!   [`StartupTracker::processed`] waits on.

use std::collections::HashMap;

use tokio::sync::{watch, RwLock};

use crate::events::{Event, EventKind};

#[derive(Debug, Clone)]
struct State {
    last_seq: u64,
    pending: bool,
}

/// Tracks which components are still inside `start`.
pub struct StartupTracker {
    state: RwLock<HashMap<String, State>>,
    high_water: watch::Sender<u64>,
}

impl Default for StartupTracker {
    fn default() -> Self {
        let (high_water, _) = watch::channel(0);
        Self {
            state: RwLock::new(HashMap::new()),
            high_water,
        }
    }
}

impl StartupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a component event if it is newer than the last one seen for that component.
    ///
    /// Returns `true` if the pending set changed.
    pub async fn update(&self, ev: &Event) -> bool {
        let changed = self.apply(ev).await;
        self.high_water.send_if_modified(|seen| {
            if ev.seq > *seen {
                *seen = ev.seq;
                true
            } else {
                false
            }
        });
        changed
    }

    /// Resolves once an event with sequence number `seq` or later has been applied.
    pub async fn processed(&self, seq: u64) {
        let mut rx = self.high_water.subscribe();
        let _ = rx.wait_for(|seen| *seen >= seq).await;
    }

    async fn apply(&self, ev: &Event) -> bool {
        let pending = match ev.kind {
            EventKind::ComponentStarting => true,
            EventKind::ComponentStarted | EventKind::ComponentFailed => false,
            _ => return false,
        };
        let Some(id) = ev.component_id() else {
            return false;
        };

        let mut state = self.state.write().await;
        let entry = state.entry(id).or_insert(State {
            last_seq: 0,
            pending: false,
        });
        if ev.seq <= entry.last_seq {
            return false;
        }
        entry.last_seq = ev.seq;
        let changed = entry.pending != pending;
        entry.pending = pending;
        changed
    }

    /// Sorted `context:component` identifiers of components still starting.
    pub async fn snapshot(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut pending: Vec<String> = state
            .iter()
            .filter(|(_, s)| s.pending)
            .map(|(id, _)| id.clone())
            .collect();
        pending.sort_unstable();
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: EventKind, comp: &str) -> Event {
        Event::new(kind).with_context("root").with_component(comp)
    }

    #[tokio::test]
    async fn tracks_pending_components() {
        let tracker = StartupTracker::new();
        tracker.update(&ev(EventKind::ComponentStarting, "db")).await;
        tracker.update(&ev(EventKind::ComponentStarting, "web")).await;
        tracker.update(&ev(EventKind::ComponentStarted, "db")).await;

        assert_eq!(tracker.snapshot().await, vec!["root:web".to_string()]);
    }

    #[tokio::test]
    async fn stale_events_are_rejected() {
        let tracker = StartupTracker::new();
        let starting = ev(EventKind::ComponentStarting, "db");
        let started = ev(EventKind::ComponentStarted, "db");

        assert!(tracker.update(&starting).await);
        assert!(tracker.update(&started).await);
        assert!(!tracker.update(&starting).await);
        assert!(tracker.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn processed_waits_for_the_high_water_mark() {
        let tracker = std::sync::Arc::new(StartupTracker::new());
        let starting = ev(EventKind::ComponentStarting, "db");
        let marker = Event::new(EventKind::StartupTimedOut);

        let waiter = {
            let tracker = std::sync::Arc::clone(&tracker);
            let seq = marker.seq;
            tokio::spawn(async move { tracker.processed(seq).await })
        };
        tracker.update(&starting).await;
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        tracker.update(&marker).await;
        waiter.await.expect("join");
        assert_eq!(tracker.snapshot().await, vec!["root:db".to_string()]);
    }
}
