//! # Orchestrator: starts a component tree and tears it down again.
//!
//! The [`Orchestrator`] owns the event bus, a [`SubscriberSet`], the global
//! [`RuntimeConfig`] and the root [`Context`] of the application it runs.
//!
//! ## Key responsibilities
//! - subscribe to the [`Bus`] and **fan-out** events via [`SubscriberSet`]
//! - start the root component in a fresh root context, bounded by `start_timeout`
//! - on any startup failure close the root context and report the failure afterwards
//! - on `stop`, a shutdown request, an OS signal or a failed service, close the tree
//!
//! ## High-level architecture
//! ```text
//! run(root) / run_until_shutdown(root)
//!   CREATED ─► STARTING
//!              ├─ Context::root_with(cfg, bus)
//!              └─ select!
//!                   ├─ start_component(root, ctx) ── Ok ──► RUNNING
//!                   │                              └─ Err ─► STOPPING ─► close(Failed) ─► STOPPED
//!                   ├─ start_timeout elapsed ──────────────► STOPPING ─► close(Failed) ─► STOPPED
//!                   │     (stuck = StartupTracker, waiting = pending requires)
//!                   └─ shutdown request / signal / service failure ─► same teardown path
//!
//! Event flow:
//!   Context tree, components ── publish(Event) ──► Bus ──► listener ──► StartupTracker::update
//!                                                                  └─► SubscriberSet::emit
//!
//! stop():
//!   RUNNING ─► STOPPING ─► root.close() ─► STOPPED
//! ```
//!
//! ## Rules
//! - `run` may be called once; later calls fail with `InvalidState`.
//! - `stop` before RUNNING fails with `InvalidState`; once STOPPING it waits for STOPPED.
//! - The original startup failure is reported only after teardown finished, with the
//!   teardown failures attached.
//!
//! ## Example
//! ```rust
//! use strata::{ComponentError, ComponentFn, Context, OrchestratorBuilder, RuntimeConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = OrchestratorBuilder::new(RuntimeConfig::default()).build();
//!
//! let root = ComponentFn::arc("app", |ctx: Context| async move {
//!     ctx.publish(42u32)?;
//!     Ok::<(), ComponentError>(())
//! });
//!
//! orchestrator.run(root).await?;
//! assert_eq!(orchestrator.root_context().and_then(|c| c.get::<u32>()).as_deref(), Some(&42));
//! orchestrator.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::components::{start_component, ComponentRef, ComponentRegistry, ComponentSpec};
use crate::config::RuntimeConfig;
use crate::context::{Context, TeardownCause};
use crate::core::shutdown::{self, ShutdownSignal};
use crate::core::{LifecycleState, OrchestratorBuilder, StartupTracker};
use crate::error::{ComponentError, RuntimeError, TeardownError};
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::SubscriberSet;

const ROOT_ALIAS: &str = "root";

/// Upper bound on waiting for the listener to catch up before reading the tracker.
const TRACKER_FLUSH: Duration = Duration::from_secs(1);

/// Source of termination signals.
type SignalSource = fn() -> BoxFuture<'static, std::io::Result<ShutdownSignal>>;

fn os_signals() -> BoxFuture<'static, std::io::Result<ShutdownSignal>> {
    shutdown::wait_for_shutdown_signal().boxed()
}

/// Why the orchestrator stopped waiting.
enum Trigger {
    Signal(ShutdownSignal),
    SignalError(std::io::Error),
    Requested,
    ServiceFailed,
    Exited(u8),
}

/// How startup ended, when it did not succeed.
enum StartFailure {
    Component(ComponentError),
    TimedOut(Duration),
    Interrupted(Trigger),
}

/// Runs one component tree from startup to teardown.
pub struct Orchestrator {
    cfg: RuntimeConfig,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    tracker: Arc<StartupTracker>,
    state: watch::Sender<LifecycleState>,
    root: Mutex<Option<Context>>,
    shutdown: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
    listener_stop: CancellationToken,
    signals: SignalSource,
}

impl Orchestrator {
    /// Creates an orchestrator without subscribers. Must be called within a Tokio runtime.
    pub fn new(cfg: RuntimeConfig) -> Arc<Self> {
        Self::builder(cfg).build()
    }

    /// Returns a builder for subscribers and other options.
    pub fn builder(cfg: RuntimeConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(cfg)
    }

    pub(crate) fn new_internal(cfg: RuntimeConfig, bus: Bus, subs: Arc<SubscriberSet>) -> Self {
        let (state, _) = watch::channel(LifecycleState::Created);
        let orchestrator = Self {
            cfg,
            bus,
            subs,
            tracker: Arc::new(StartupTracker::new()),
            state,
            root: Mutex::new(None),
            shutdown: CancellationToken::new(),
            listener: Mutex::new(None),
            listener_stop: CancellationToken::new(),
            signals: os_signals,
        };
        orchestrator.subscriber_listener();
        orchestrator
    }

    #[cfg(test)]
    fn with_signal_source(mut self, signals: SignalSource) -> Self {
        self.signals = signals;
        self
    }

    /// Global runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.cfg
    }

    /// The event bus shared with every context of the tree.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Receiver observing lifecycle state changes.
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// The root context, from the start of `run` until teardown begins.
    pub fn root_context(&self) -> Option<Context> {
        self.root.lock().clone()
    }

    /// Starts `root` in a fresh root context.
    ///
    /// Returns once startup completed (state RUNNING). On failure the root context is
    /// closed first and the original failure is returned with the teardown failures
    /// attached. A [`request_shutdown`](Self::request_shutdown) or a failed service
    /// task during startup also aborts it.
    pub async fn run(&self, root: ComponentRef) -> Result<(), RuntimeError> {
        self.start(root, false).await
    }

    /// Builds the root component from `spec` through `registry`, then [`run`](Self::run)s it.
    pub async fn run_spec(
        &self,
        registry: &ComponentRegistry,
        spec: &ComponentSpec,
    ) -> Result<(), RuntimeError> {
        let root = registry.build(ROOT_ALIAS, spec)?;
        self.run(root).await
    }

    /// Runs `root` until an OS termination signal, a shutdown request, an exit request
    /// or a failed service task, then stops.
    ///
    /// Returns the exit code: the one passed to [`Context::request_exit`] (see
    /// [`ApplicationComponent`](crate::ApplicationComponent)), `0` otherwise. A signal
    /// during startup interrupts it ([`RuntimeError::Interrupted`]).
    pub async fn run_until_shutdown(&self, root: ComponentRef) -> Result<u8, RuntimeError> {
        self.start(root, true).await?;

        let (failure, exit) = self.tree_tokens();
        match self.next_trigger(true, &failure, Some(&exit)).await {
            Trigger::Signal(sig) => {
                tracing::info!(signal = %sig, "termination signal received");
                self.stop().await.map(|()| 0)
            }
            Trigger::Requested => self.stop().await.map(|()| 0),
            Trigger::Exited(code) => self.stop().await.map(|()| code),
            Trigger::ServiceFailed => {
                let (task, error) = self.service_failure();
                let teardown = self
                    .stop_with_cause(TeardownCause::failed(&error))
                    .await
                    .err()
                    .and_then(into_teardown);
                Err(RuntimeError::ServiceFailed {
                    task,
                    error,
                    teardown,
                })
            }
            Trigger::SignalError(source) => {
                let teardown = self.stop().await.err().and_then(into_teardown);
                Err(RuntimeError::Signal { source, teardown })
            }
        }
    }

    /// Closes the root context.
    ///
    /// Fails with `InvalidState` before startup completed. A call made while the
    /// orchestrator is already stopping waits until it is stopped and returns `Ok(())`.
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        self.stop_with_cause(TeardownCause::Clean).await
    }

    /// Asks [`run_until_shutdown`](Self::run_until_shutdown) to stop, or interrupts a
    /// startup in progress.
    pub fn request_shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            self.bus
                .publish(Event::new(EventKind::ShutdownRequested).with_reason("requested"));
            self.shutdown.cancel();
        }
    }

    /// Delivers every event published so far to the subscribers, then stops their
    /// workers. Events published afterwards are not delivered.
    pub async fn shutdown_subscribers(&self) {
        self.listener_stop.cancel();
        let listener = self.listener.lock().take();
        if let Some(handle) = listener {
            let _ = handle.await;
        }
        self.subs.shutdown().await;
    }

    async fn start(&self, root: ComponentRef, signals: bool) -> Result<(), RuntimeError> {
        self.transition(LifecycleState::Created, LifecycleState::Starting)
            .map_err(|state| RuntimeError::InvalidState { op: "run", state })?;

        let ctx = Context::root_with(self.cfg.clone(), self.bus.clone());
        *self.root.lock() = Some(ctx.clone());
        let failure = ctx.tree().failure_token();

        let mut starting = Box::pin(start_component(root.as_ref(), &ctx));
        // Exit requests are only honoured once RUNNING.
        let outcome = tokio::select! {
            res = &mut starting => match res {
                Ok(()) => None,
                Err(err) => Some(StartFailure::Component(err)),
            },
            timeout = sleep_opt(self.cfg.start_timeout_opt()) => Some(StartFailure::TimedOut(timeout)),
            trigger = self.next_trigger(signals, &failure, None) => Some(StartFailure::Interrupted(trigger)),
        };

        let Some(failure) = outcome else {
            drop(starting);
            self.set_state(LifecycleState::Running);
            return Ok(());
        };

        let (stuck, waiting) = match failure {
            StartFailure::TimedOut(timeout) => {
                self.flush_tracker(Event::new(EventKind::StartupTimedOut).with_timeout(timeout))
                    .await;
                (self.tracker.snapshot().await, ctx.tree().pending_requests())
            }
            _ => (Vec::new(), Vec::new()),
        };
        drop(starting);

        self.set_state(LifecycleState::Stopping);
        let cause = match &failure {
            StartFailure::Component(err) => TeardownCause::failed(err),
            StartFailure::TimedOut(_) => TeardownCause::failed("startup timed out"),
            StartFailure::Interrupted(Trigger::ServiceFailed) => {
                TeardownCause::failed(self.service_failure().1)
            }
            StartFailure::Interrupted(_) => TeardownCause::failed("startup interrupted"),
        };
        let teardown = self.close_root(cause).await.err();
        self.set_state(LifecycleState::Stopped);

        Err(match failure {
            StartFailure::Component(source) => RuntimeError::Startup { source, teardown },
            StartFailure::TimedOut(timeout) => RuntimeError::StartTimeout {
                timeout,
                stuck,
                waiting,
                teardown,
            },
            StartFailure::Interrupted(Trigger::ServiceFailed) => {
                let (task, error) = self.service_failure();
                RuntimeError::ServiceFailed {
                    task,
                    error,
                    teardown,
                }
            }
            StartFailure::Interrupted(Trigger::SignalError(source)) => {
                RuntimeError::Signal { source, teardown }
            }
            StartFailure::Interrupted(_) => RuntimeError::Interrupted { teardown },
        })
    }

    async fn stop_with_cause(&self, cause: TeardownCause) -> Result<(), RuntimeError> {
        if let Err(state) = self.transition(LifecycleState::Running, LifecycleState::Stopping) {
            return match state {
                LifecycleState::Created | LifecycleState::Starting => {
                    Err(RuntimeError::InvalidState { op: "stop", state })
                }
                _ => {
                    let mut rx = self.state.subscribe();
                    let _ = rx.wait_for(|s| *s == LifecycleState::Stopped).await;
                    Ok(())
                }
            };
        }

        self.shutdown.cancel();
        let res = self.close_root(cause).await;
        self.set_state(LifecycleState::Stopped);
        res.map_err(RuntimeError::Teardown)
    }

    async fn close_root(&self, cause: TeardownCause) -> Result<(), TeardownError> {
        let root = self.root.lock().take();
        match root {
            Some(ctx) => ctx.close_with_cause(cause).await,
            None => Ok(()),
        }
    }

    /// Publishes `marker` and waits until the listener has fed it to the tracker, so the
    /// tracker reflects every event published before it.
    async fn flush_tracker(&self, marker: Event) {
        let seq = marker.seq;
        self.bus.publish(marker);
        if self.listener_stop.is_cancelled() {
            return;
        }
        let _ = tokio::time::timeout(TRACKER_FLUSH, self.tracker.processed(seq)).await;
    }

    /// Waits for the next reason to stop.
    async fn next_trigger(
        &self,
        signals: bool,
        failure: &CancellationToken,
        exit: Option<&CancellationToken>,
    ) -> Trigger {
        let signal = async {
            if signals {
                (self.signals)().await
            } else {
                std::future::pending().await
            }
        };
        let exit = async {
            match exit {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            res = signal => match res {
                Ok(sig) => {
                    self.bus
                        .publish(Event::new(EventKind::ShutdownRequested).with_reason(sig.as_str()));
                    Trigger::Signal(sig)
                }
                Err(err) => Trigger::SignalError(err),
            },
            _ = self.shutdown.cancelled() => Trigger::Requested,
            _ = failure.cancelled() => Trigger::ServiceFailed,
            _ = exit => Trigger::Exited(self.exit_code()),
        }
    }

    /// Failure and exit tokens of the running tree.
    fn tree_tokens(&self) -> (CancellationToken, CancellationToken) {
        match self.root.lock().as_ref() {
            Some(ctx) => (ctx.tree().failure_token(), ctx.tree().exit_token()),
            None => (CancellationToken::new(), CancellationToken::new()),
        }
    }

    fn exit_code(&self) -> u8 {
        self.root
            .lock()
            .as_ref()
            .and_then(|ctx| ctx.tree().exit_code())
            .unwrap_or(0)
    }

    fn service_failure(&self) -> (Arc<str>, String) {
        self.root
            .lock()
            .as_ref()
            .and_then(|ctx| ctx.tree().failure())
            .unwrap_or_else(|| (Arc::from("unknown"), String::from("service failed")))
    }

    /// Moves `from → to` atomically; returns the current state otherwise.
    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<(), LifecycleState> {
        let mut current = from;
        let changed = self.state.send_if_modified(|state| {
            current = *state;
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            self.bus
                .publish(Event::new(EventKind::StateChanged).with_state(to));
            Ok(())
        } else {
            Err(current)
        }
    }

    fn set_state(&self, to: LifecycleState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == to {
                false
            } else {
                *state = to;
                true
            }
        });
        if changed {
            self.bus
                .publish(Event::new(EventKind::StateChanged).with_state(to));
        }
    }

    /// Subscribes to the bus and forwards events to the tracker and the subscriber set.
    fn subscriber_listener(&self) {
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        let tracker = Arc::clone(&self.tracker);
        let stop = self.listener_stop.clone();
        let handle = tokio::spawn(async move {
            loop {
                let ev = tokio::select! {
                    biased;
                    res = rx.recv() => match res {
                        Ok(ev) => ev,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                    _ = stop.cancelled() => break,
                };
                tracker.update(&ev).await;
                set.emit(&ev);
            }
            loop {
                match rx.try_recv() {
                    Ok(ev) => {
                        tracker.update(&ev).await;
                        set.emit(&ev);
                    }
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
        });
        *self.listener.lock() = Some(handle);
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        // Lets the listener exit, which releases the subscriber set and its workers.
        self.listener_stop.cancel();
    }
}

fn into_teardown(err: RuntimeError) -> Option<TeardownError> {
    match err {
        RuntimeError::Teardown(err) => Some(err),
        _ => None,
    }
}

async fn sleep_opt(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(timeout) => {
            tokio::time::sleep(timeout).await;
            timeout
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::ComponentFn;
    use crate::error::BoxError;

    fn idle() -> ComponentRef {
        ComponentFn::arc("idle", |_ctx: Context| async { Ok::<(), ComponentError>(()) })
    }

    #[tokio::test]
    async fn state_machine_follows_run_and_stop() {
        let orch = OrchestratorBuilder::new(RuntimeConfig::default()).build();
        assert_eq!(orch.state(), LifecycleState::Created);

        let err = orch.stop().await.unwrap_err();
        assert_eq!(err.as_label(), "runtime_invalid_state");

        orch.run(idle()).await.expect("run");
        assert_eq!(orch.state(), LifecycleState::Running);
        assert!(orch.run(idle()).await.is_err());

        orch.stop().await.expect("stop");
        assert_eq!(orch.state(), LifecycleState::Stopped);
        orch.stop().await.expect("second stop is a no-op");
        assert!(orch.root_context().is_none());
    }

    #[tokio::test]
    async fn request_shutdown_ends_run_until_shutdown() {
        let orch = OrchestratorBuilder::new(RuntimeConfig::default()).build();
        let runner = Arc::clone(&orch);
        let handle = tokio::spawn(async move { runner.run_until_shutdown(idle()).await });

        let mut state = orch.watch_state();
        state
            .wait_for(|s| *s == LifecycleState::Running)
            .await
            .expect("running");
        orch.request_shutdown();

        let code = handle.await.expect("join").expect("clean stop");
        assert_eq!(code, 0);
        assert_eq!(orch.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn failed_service_stops_the_application() {
        let orch = OrchestratorBuilder::new(RuntimeConfig::default()).build();
        let root = ComponentFn::arc("svc", |ctx: Context| async move {
            ctx.spawn_service("worker", |_token| async {
                tokio::task::yield_now().await;
                Err::<(), BoxError>("connection lost".into())
            })?;
            Ok::<(), ComponentError>(())
        });

        let err = orch.run_until_shutdown(root).await.unwrap_err();
        match err {
            RuntimeError::ServiceFailed { task, error, .. } => {
                assert_eq!(&*task, "worker");
                assert_eq!(error, "connection lost");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(orch.state(), LifecycleState::Stopped);
    }

    fn failing_signals() -> Arc<Orchestrator> {
        fn source() -> BoxFuture<'static, std::io::Result<ShutdownSignal>> {
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(std::io::Error::other("signal handlers unavailable"))
            }
            .boxed()
        }
        let cfg = RuntimeConfig::default();
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(Vec::new(), bus.clone()));
        Arc::new(Orchestrator::new_internal(cfg, bus, subs).with_signal_source(source))
    }

    fn flaky_teardown(block: bool) -> ComponentRef {
        ComponentFn::arc("app", move |ctx: Context| async move {
            ctx.add_teardown_callback("flush", || async {
                Err::<(), BoxError>("flush failed".into())
            })?;
            if block {
                ctx.require::<String>().await?;
            }
            Ok::<(), ComponentError>(())
        })
    }

    #[tokio::test]
    async fn signal_errors_during_startup_keep_teardown_failures() {
        let orch = failing_signals();
        let err = orch.run_until_shutdown(flaky_teardown(true)).await.unwrap_err();

        assert!(matches!(err, RuntimeError::Signal { .. }), "{err}");
        let teardown = err.teardown().expect("teardown failures attached");
        assert_eq!(&*teardown.failures()[0].callback, "flush");
        assert_eq!(orch.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn signal_errors_while_running_keep_teardown_failures() {
        let orch = failing_signals();
        let err = orch.run_until_shutdown(flaky_teardown(false)).await.unwrap_err();

        assert!(matches!(err, RuntimeError::Signal { .. }), "{err}");
        assert!(err.to_string().contains("flush failed"));
        assert_eq!(err.teardown().map(|t| t.failures().len()), Some(1));
    }

    #[tokio::test]
    async fn dropping_the_orchestrator_releases_subscribers() {
        struct Quiet;

        #[async_trait::async_trait]
        impl crate::subscribers::Subscribe for Quiet {
            async fn on_event(&self, _ev: &Event) {}
        }

        let sub: Arc<dyn crate::subscribers::Subscribe> = Arc::new(Quiet);
        let orch = OrchestratorBuilder::new(RuntimeConfig::default())
            .with_subscriber(Arc::clone(&sub))
            .build();
        orch.run(idle()).await.expect("run");
        orch.stop().await.expect("stop");
        drop(orch);

        tokio::time::timeout(Duration::from_secs(5), async {
            while Arc::strong_count(&sub) > 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("subscriber worker released");
    }
}
