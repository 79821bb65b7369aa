//! # Runtime events emitted by contexts, components and the orchestrator.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Context events**: tree lifecycle and the resource registry
//! - **Component events**: startup of individual components
//! - **Task events**: background and service tasks spawned on contexts
//! - **Runtime events**: orchestrator state, shutdown and subscriber health
//!
//! The [`Event`] struct carries additional metadata such as the context path, component
//! name, resource key and reasons.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use strata::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ComponentFailed)
//!     .with_context("root")
//!     .with_component("db")
//!     .with_reason("connection refused");
//!
//! assert_eq!(ev.kind, EventKind::ComponentFailed);
//! assert_eq!(ev.component.as_deref(), Some("db"));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::context::ResourceKey;
use crate::core::LifecycleState;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Context events ===
    /// A context was opened. Sets `context`.
    ContextOpened,
    /// A context began tearing down. Sets `context`, `reason` if the close carries a failure.
    ContextClosing,
    /// A context finished tearing down. Sets `context`.
    ContextClosed,
    /// A value was published. Sets `context`, `resource`.
    ResourcePublished,
    /// A lazy factory was published. Sets `context`, `resource`.
    FactoryPublished,
    /// A factory produced its value. Sets `context` (owner), `resource`.
    ResourceMaterialized,
    /// A `require` call is suspended waiting for publication. Sets `context`, `resource`.
    RequireWaiting,
    /// A `require` call gave up. Sets `context`, `resource`, `timeout_ms`.
    RequireTimedOut,
    /// A teardown callback failed or panicked. Sets `context`, `task` (callback label), `reason`.
    TeardownFailed,

    // === Component events ===
    /// A component is about to wait for its requirements and start.
    /// Sets `context`, `component`.
    ComponentStarting,
    /// A component's `start` returned successfully. Sets `context`, `component`.
    ComponentStarted,
    /// A component's `start` failed. Sets `context`, `component`, `reason`.
    ComponentFailed,

    // === Task events ===
    /// A background or service task was spawned. Sets `context`, `task`.
    TaskSpawned,
    /// A background task returned an error or panicked. Sets `context`, `task`, `reason`.
    TaskFailed,
    /// A service task ended; the application is going down. Sets `context`, `task`, `reason`.
    ServiceFailed,
    /// Cancelled tasks of a closing context did not finish within the grace period and
    /// were aborted. Sets `context`, `timeout_ms`.
    GraceExceeded,

    // === Runtime events ===
    /// The orchestrator moved to a new lifecycle state. Sets `state`.
    StateChanged,
    /// A shutdown was requested (OS signal or explicit request). Sets `reason`.
    ShutdownRequested,
    /// The application asked to exit. Sets `context`, `reason` (the exit code).
    ExitRequested,
    /// Startup exceeded `start_timeout`. Sets `timeout_ms`.
    StartupTimedOut,
    /// Subscriber dropped an event (queue full or worker closed). Sets `task`, `reason`.
    SubscriberOverflow,
    /// Subscriber panicked during event processing. Sets `task`, `reason`.
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Path of the context the event happened in (`root/web/api`).
    pub context: Option<Arc<str>>,
    /// Component name.
    pub component: Option<Arc<str>>,
    /// Rendered resource key (`type("name")`).
    pub resource: Option<Arc<str>>,
    /// Task, callback or subscriber name.
    pub task: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// New orchestrator state.
    pub state: Option<LifecycleState>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            context: None,
            component: None,
            resource: None,
            task: None,
            reason: None,
            timeout_ms: None,
            state: None,
        }
    }

    /// Attaches a context path.
    #[inline]
    pub fn with_context(mut self, path: impl Into<Arc<str>>) -> Self {
        self.context = Some(path.into());
        self
    }

    /// Attaches a component name.
    #[inline]
    pub fn with_component(mut self, name: impl Into<Arc<str>>) -> Self {
        self.component = Some(name.into());
        self
    }

    /// Attaches a resource key (rendered as text).
    #[inline]
    pub fn with_resource(mut self, key: &ResourceKey) -> Self {
        self.resource = Some(key.to_string().into());
        self
    }

    /// Attaches a task name.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    /// Attaches an orchestrator state.
    #[inline]
    pub fn with_state(mut self, state: LifecycleState) -> Self {
        self.state = Some(state);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }

    /// Identity used by the startup tracker: `context:component`.
    pub(crate) fn component_id(&self) -> Option<String> {
        match (self.context.as_deref(), self.component.as_deref()) {
            (Some(ctx), Some(comp)) => Some(format!("{ctx}:{comp}")),
            _ => None,
        }
    }
}
