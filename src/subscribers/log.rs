//! # LogWriter: renders runtime events as `tracing` records.
//!
//! Routine lifecycle events are logged at `debug`/`info`, failures at `warn`/`error`.
//! Install a `tracing` subscriber (the `strata` binary uses `tracing-subscriber` with an
//! `EnvFilter`) to see them.
//!
//! ## Example output
//! ```text
//! INFO  strata::events: component started context="root" component="db"
//! WARN  strata::events: resource request timed out context="root/web" resource=u32("port") timeout_ms=2000
//! ERROR strata::events: component failed context="root" component="web" reason="bind: address in use"
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let context = e.context.as_deref().unwrap_or("-");
        let component = e.component.as_deref().unwrap_or("-");
        let resource = e.resource.as_deref().unwrap_or("-");
        let task = e.task.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::ContextOpened => {
                debug!(target: "strata::events", seq = e.seq, context, "context opened");
            }
            EventKind::ContextClosing => {
                debug!(target: "strata::events", seq = e.seq, context, reason, "context closing");
            }
            EventKind::ContextClosed => {
                debug!(target: "strata::events", seq = e.seq, context, "context closed");
            }
            EventKind::ResourcePublished => {
                debug!(target: "strata::events", seq = e.seq, context, resource, "resource published");
            }
            EventKind::FactoryPublished => {
                debug!(target: "strata::events", seq = e.seq, context, resource, "resource factory published");
            }
            EventKind::ResourceMaterialized => {
                debug!(target: "strata::events", seq = e.seq, context, resource, "resource factory produced its value");
            }
            EventKind::RequireWaiting => {
                debug!(target: "strata::events", seq = e.seq, context, resource, "waiting for resource");
            }
            EventKind::RequireTimedOut => {
                warn!(target: "strata::events", seq = e.seq, context, resource, timeout_ms = e.timeout_ms, "resource request timed out");
            }
            EventKind::TeardownFailed => {
                error!(target: "strata::events", seq = e.seq, context, callback = task, reason, "teardown callback failed");
            }
            EventKind::ComponentStarting => {
                debug!(target: "strata::events", seq = e.seq, context, component, "starting component");
            }
            EventKind::ComponentStarted => {
                info!(target: "strata::events", seq = e.seq, context, component, "component started");
            }
            EventKind::ComponentFailed => {
                error!(target: "strata::events", seq = e.seq, context, component, reason, "component failed");
            }
            EventKind::TaskSpawned => {
                debug!(target: "strata::events", seq = e.seq, context, task, "task spawned");
            }
            EventKind::TaskFailed => {
                warn!(target: "strata::events", seq = e.seq, context, task, reason, "background task failed");
            }
            EventKind::ServiceFailed => {
                error!(target: "strata::events", seq = e.seq, context, task, reason, "service task ended");
            }
            EventKind::GraceExceeded => {
                warn!(target: "strata::events", seq = e.seq, context, grace_ms = e.timeout_ms, "tasks did not stop within grace period; aborted");
            }
            EventKind::StateChanged => {
                let state = e.state.map(|s| s.as_str()).unwrap_or("-");
                info!(target: "strata::events", seq = e.seq, state, "orchestrator state changed");
            }
            EventKind::ShutdownRequested => {
                info!(target: "strata::events", seq = e.seq, reason, "shutdown requested");
            }
            EventKind::ExitRequested => {
                info!(target: "strata::events", seq = e.seq, context, code = reason, "application requested exit");
            }
            EventKind::StartupTimedOut => {
                error!(target: "strata::events", seq = e.seq, timeout_ms = e.timeout_ms, "startup timed out");
            }
            EventKind::SubscriberOverflow => {
                warn!(target: "strata::events", seq = e.seq, subscriber = task, reason, "subscriber dropped an event");
            }
            EventKind::SubscriberPanicked => {
                error!(target: "strata::events", seq = e.seq, subscriber = task, reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
