//! # Start a single component.
//!
//! Runs one component's `start` in a context: waits for its declared requirements, runs
//! `start` with panic isolation and publishes lifecycle events to the context's bus.
//!
//! ## Event flow
//!
//! ```text
//! ComponentStarting
//!   ├─ requirements resolve (concurrently) ─► start()
//!   │                                          ├─ Ok    ─► ComponentStarted
//!   │                                          ├─ Err   ─► ComponentFailed
//!   │                                          └─ panic ─► ComponentFailed (Panicked)
//!   └─ a requirement fails ─► ComponentFailed (Requirement)
//! ```
//!
//! ## Rules
//! - Always publishes **exactly one** terminal event: `ComponentStarted` or `ComponentFailed`
//!   (unless the surrounding future is dropped, e.g. on a start timeout).
//! - `start` is never called before every declared requirement is available.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::try_join_all;
use futures::FutureExt;

use crate::components::Component;
use crate::context::Context;
use crate::error::{panic_message, ComponentError};
use crate::events::{Event, EventKind};

/// Starts `component` in `ctx`, publishing lifecycle events.
pub async fn start_component(
    component: &dyn Component,
    ctx: &Context,
) -> Result<(), ComponentError> {
    let name: Arc<str> = Arc::from(component.name());
    publish(ctx, EventKind::ComponentStarting, &name, None);

    let res = run(component, ctx, &name).await;
    match &res {
        Ok(()) => publish(ctx, EventKind::ComponentStarted, &name, None),
        Err(e) => publish(ctx, EventKind::ComponentFailed, &name, Some(e.to_string())),
    }
    res
}

async fn run(
    component: &dyn Component,
    ctx: &Context,
    name: &Arc<str>,
) -> Result<(), ComponentError> {
    let requirements = component.requirements();
    try_join_all(requirements.iter().map(|key| ctx.wait_for(key, None)))
        .await
        .map_err(|source| ComponentError::Requirement {
            component: Arc::clone(name),
            source,
        })?;

    match AssertUnwindSafe(component.start(ctx.clone()))
        .catch_unwind()
        .await
    {
        Ok(res) => res,
        Err(panic) => Err(ComponentError::Panicked {
            component: Arc::clone(name),
            info: panic_message(&*panic),
        }),
    }
}

fn publish(ctx: &Context, kind: EventKind, name: &Arc<str>, reason: Option<String>) {
    let mut ev = Event::new(kind)
        .with_context(ctx.path())
        .with_component(Arc::clone(name));
    if let Some(reason) = reason {
        ev = ev.with_reason(reason);
    }
    ctx.bus().publish(ev);
}
