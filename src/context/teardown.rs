//! # Teardown callbacks.
//!
//! Callbacks are stored per context in registration order and run in reverse when the
//! context closes. A failing or panicking callback is recorded and the next one runs
//! anyway.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{panic_message, BoxError, TeardownFailure};
use crate::events::{Bus, Event, EventKind};

/// Why a context is being closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownCause {
    /// Regular shutdown.
    Clean,
    /// The context is torn down because of a failure (startup error, service crash).
    Failed(Arc<str>),
}

impl TeardownCause {
    /// Builds [`TeardownCause::Failed`] from an error.
    pub fn failed(reason: impl ToString) -> Self {
        TeardownCause::Failed(reason.to_string().into())
    }

    /// `true` for [`TeardownCause::Failed`].
    pub fn is_failure(&self) -> bool {
        matches!(self, TeardownCause::Failed(_))
    }

    /// The failure message, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            TeardownCause::Clean => None,
            TeardownCause::Failed(reason) => Some(reason),
        }
    }
}

pub(crate) type TeardownFn =
    Box<dyn FnOnce(TeardownCause) -> BoxFuture<'static, Result<(), BoxError>> + Send>;

pub(crate) struct TeardownEntry {
    pub(crate) label: Arc<str>,
    pub(crate) callback: TeardownFn,
}

impl TeardownEntry {
    pub(crate) fn new<F, Fut, E>(label: Arc<str>, f: F) -> Self
    where
        F: FnOnce(TeardownCause) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let callback: TeardownFn = Box::new(move |cause| {
            let fut = f(cause);
            async move { fut.await.map_err(|e| -> BoxError { e.into() }) }.boxed()
        });
        Self { label, callback }
    }
}

/// Runs `entries` last-registered first, collecting every failure.
pub(crate) async fn run_callbacks(
    entries: Vec<TeardownEntry>,
    cause: &TeardownCause,
    context: &Arc<str>,
    bus: &Bus,
) -> Vec<TeardownFailure> {
    let mut failures = Vec::new();
    for TeardownEntry { label, callback } in entries.into_iter().rev() {
        let cause = cause.clone();
        let error = match std::panic::catch_unwind(AssertUnwindSafe(move || callback(cause))) {
            Ok(fut) => match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(panic) => Some(format!("panicked: {}", panic_message(&*panic))),
            },
            Err(panic) => Some(format!("panicked: {}", panic_message(&*panic))),
        };
        if let Some(error) = error {
            bus.publish(
                Event::new(EventKind::TeardownFailed)
                    .with_context(Arc::clone(context))
                    .with_task(Arc::clone(&label))
                    .with_reason(error.as_str()),
            );
            failures.push(TeardownFailure {
                context: Arc::clone(context),
                callback: label,
                error,
            });
        }
    }
    failures
}
