//! Scope management of a [`Context`]: children, teardown callbacks, tasks and close.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::teardown::{run_callbacks, TeardownCause, TeardownEntry};
use super::tree::{BeginClose, ContextId, ContextState, ContextTree};
use super::Context;
use crate::error::{panic_message, BoxError, ContextError, TeardownError, TeardownFailure};
use crate::events::{Event, EventKind};

impl Context {
    // ---- Children ----

    /// Opens a child context with a generated label (`ctx1`, `ctx2`, …).
    pub fn open_child(&self) -> Result<Context, ContextError> {
        self.open_child_inner(None)
    }

    /// Opens a child context labelled `label` (used only in its path).
    pub fn open_named_child(&self, label: &str) -> Result<Context, ContextError> {
        self.open_child_inner(Some(label))
    }

    fn open_child_inner(&self, label: Option<&str>) -> Result<Context, ContextError> {
        let (id, path) = self
            .tree
            .add_child(self.id, label)
            .map_err(|_| self.closed_error())?;
        let child = self.handle(id, path);
        child.emit(Event::new(EventKind::ContextOpened));
        Ok(child)
    }

    // ---- Teardown callbacks ----

    /// Registers `callback` to run when this context closes.
    ///
    /// Callbacks run last-registered first, each exactly once, even if an earlier one
    /// fails. `label` identifies the callback in [`TeardownError`].
    pub fn add_teardown_callback<F, Fut, E>(
        &self,
        label: impl Into<Arc<str>>,
        callback: F,
    ) -> Result<(), ContextError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.add_teardown_callback_with_cause(label, move |_cause| callback())
    }

    /// Like [`add_teardown_callback`](Self::add_teardown_callback), but the callback
    /// learns whether the context is closing cleanly or because of a failure.
    pub fn add_teardown_callback_with_cause<F, Fut, E>(
        &self,
        label: impl Into<Arc<str>>,
        callback: F,
    ) -> Result<(), ContextError>
    where
        F: FnOnce(TeardownCause) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let entry = TeardownEntry::new(label.into(), callback);
        let mut nodes = self.tree.nodes.lock();
        match nodes.get_mut(&self.id) {
            Some(node) if node.state == ContextState::Open => {
                node.teardown.push(entry);
                Ok(())
            }
            _ => {
                drop(nodes);
                Err(self.closed_error())
            }
        }
    }

    // ---- Tasks ----

    /// Spawns a background task scoped to this context.
    ///
    /// `task` receives this context's cancellation token, which fires when the context
    /// starts closing. Tasks that do not finish within the configured grace period are
    /// aborted. Errors and panics are reported as `TaskFailed` events and otherwise
    /// ignored.
    pub fn spawn_task<F, Fut, E>(
        &self,
        name: impl Into<Arc<str>>,
        task: F,
    ) -> Result<(), ContextError>
    where
        F: FnOnce(CancellationToken) -> Fut + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.spawn_inner(name.into(), task, false)
    }

    /// Spawns a service task: like [`spawn_task`](Self::spawn_task), but an error or
    /// panic that is not caused by cancellation marks the application as failed, which
    /// makes [`Orchestrator::run_until_shutdown`](crate::Orchestrator::run_until_shutdown)
    /// shut everything down.
    pub fn spawn_service<F, Fut, E>(
        &self,
        name: impl Into<Arc<str>>,
        task: F,
    ) -> Result<(), ContextError>
    where
        F: FnOnce(CancellationToken) -> Fut + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.spawn_inner(name.into(), task, true)
    }

    /// Asks the application to exit with `code` once it is running.
    ///
    /// Ends [`Orchestrator::run_until_shutdown`](crate::Orchestrator::run_until_shutdown)
    /// with a clean stop and `Ok(code)`. Only the first request counts.
    pub fn request_exit(&self, code: u8) {
        self.emit(Event::new(EventKind::ExitRequested).with_reason(code.to_string()));
        self.tree.request_exit(code);
    }

    fn spawn_inner<F, Fut, E>(
        &self,
        name: Arc<str>,
        task: F,
        service: bool,
    ) -> Result<(), ContextError>
    where
        F: FnOnce(CancellationToken) -> Fut + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let token = {
            let nodes = self.tree.nodes.lock();
            match nodes.get(&self.id) {
                Some(node) if node.state == ContextState::Open => node.token.clone(),
                _ => return Err(self.closed_error()),
            }
        };

        let fut = task(token.clone());
        let tree = Arc::clone(&self.tree);
        let path = Arc::clone(&self.path);
        let task_name = Arc::clone(&name);
        let wrapped = async move {
            let failure = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(err)) => {
                    let err: BoxError = err.into();
                    err.to_string()
                }
                Err(panic) => format!("panicked: {}", panic_message(&*panic)),
            };
            let kind = if service {
                EventKind::ServiceFailed
            } else {
                EventKind::TaskFailed
            };
            tree.bus.publish(
                Event::new(kind)
                    .with_context(path)
                    .with_task(Arc::clone(&task_name))
                    .with_reason(failure.as_str()),
            );
            if service && !token.is_cancelled() {
                tree.mark_failed(task_name, failure);
            }
        };

        let rejected = {
            let mut nodes = self.tree.nodes.lock();
            match nodes.get_mut(&self.id) {
                Some(node) if node.state == ContextState::Open => {
                    while node.tasks.try_join_next().is_some() {}
                    node.tasks.spawn(wrapped);
                    None
                }
                _ => Some(wrapped),
            }
        };
        if let Some(wrapped) = rejected {
            drop(wrapped);
            return Err(self.closed_error());
        }
        self.emit(Event::new(EventKind::TaskSpawned).with_task(name));
        Ok(())
    }

    // ---- Close ----

    /// Closes this context cleanly. See [`close_with_cause`](Self::close_with_cause).
    pub async fn close(&self) -> Result<(), TeardownError> {
        self.close_with_cause(TeardownCause::Clean).await
    }

    /// Tears this context down.
    ///
    /// 1. Marks the context closing and wakes its pending `require` calls.
    /// 2. Cancels its scope (and thereby every descendant scope).
    /// 3. Closes still-open children, newest first.
    /// 4. Waits up to `grace` for its tasks, then aborts the rest.
    /// 5. Runs its teardown callbacks last-registered first with `cause`.
    ///
    /// Every callback failure in the subtree is collected into one [`TeardownError`].
    /// A second call is a no-op; a call made while another close is in progress waits
    /// for it and returns `Ok(())`.
    pub async fn close_with_cause(&self, cause: TeardownCause) -> Result<(), TeardownError> {
        let failures = close_node(Arc::clone(&self.tree), self.id, cause).await;
        match TeardownError::from_failures(failures) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn close_node(
    tree: Arc<ContextTree>,
    id: ContextId,
    cause: TeardownCause,
) -> BoxFuture<'static, Vec<TeardownFailure>> {
    async move {
        let plan = match tree.begin_close(id) {
            BeginClose::Done => return Vec::new(),
            BeginClose::InProgress(done) => {
                done.cancelled().await;
                return Vec::new();
            }
            BeginClose::Begin(plan) => plan,
        };

        let mut closing = Event::new(EventKind::ContextClosing).with_context(Arc::clone(&plan.path));
        if let Some(reason) = cause.reason() {
            closing = closing.with_reason(reason);
        }
        tree.bus.publish(closing);
        plan.token.cancel();

        let mut failures = Vec::new();
        for child in plan.children.iter().rev() {
            failures.extend(close_node(Arc::clone(&tree), *child, cause.clone()).await);
        }

        drain_tasks(&tree, &plan.path, plan.tasks).await;
        failures.extend(run_callbacks(plan.teardown, &cause, &plan.path, &tree.bus).await);

        drop(tree.finish_close(id));
        plan.done.cancel();
        tree.bus
            .publish(Event::new(EventKind::ContextClosed).with_context(plan.path));
        failures
    }
    .boxed()
}

async fn drain_tasks(tree: &ContextTree, path: &Arc<str>, mut tasks: JoinSet<()>) {
    if tasks.is_empty() {
        return;
    }
    let grace = tree.config.grace;
    let drained = tokio::time::timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tree.bus.publish(
            Event::new(EventKind::GraceExceeded)
                .with_context(Arc::clone(path))
                .with_timeout(grace),
        );
        tasks.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn children_close_before_parent_callbacks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let root = Context::root();
        let child = root.open_child().expect("child");

        let l = Arc::clone(&log);
        root.add_teardown_callback("root", move || async move {
            l.lock().push("root");
            Ok::<(), BoxError>(())
        })
        .expect("register");
        let l = Arc::clone(&log);
        child
            .add_teardown_callback("child", move || async move {
                l.lock().push("child");
                Ok::<(), BoxError>(())
            })
            .expect("register");

        root.close().await.expect("clean close");
        assert_eq!(*log.lock(), vec!["child", "root"]);
        assert_eq!(child.state(), ContextState::Closed);
    }

    #[tokio::test]
    async fn closed_context_rejects_mutation() {
        let root = Context::root();
        root.close().await.expect("close");
        assert!(root.is_closed());
        assert!(root.publish(1u8).is_err());
        assert!(root.open_child().is_err());
        assert!(root
            .add_teardown_callback("late", || async { Ok::<(), BoxError>(()) })
            .is_err());
        assert!(root
            .spawn_task("late", |_t| async { Ok::<(), BoxError>(()) })
            .is_err());
        root.close().await.expect("second close is a no-op");
    }

    #[tokio::test(start_paused = true)]
    async fn stubborn_tasks_are_aborted_after_grace() {
        let root = Context::root();
        root.spawn_task("stubborn", |_token| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<(), BoxError>(())
        })
        .expect("spawn");

        let start = tokio::time::Instant::now();
        root.close().await.expect("close");
        assert!(start.elapsed() >= root.config().grace);
    }

    #[tokio::test]
    async fn failing_service_marks_the_tree_failed() {
        let root = Context::root();
        let failed = root.tree().failure_token();
        root.spawn_service("svc", |_token| async {
            Err::<(), BoxError>("crashed".into())
        })
        .expect("spawn");

        failed.cancelled().await;
        let (task, reason) = root.tree().failure().expect("recorded");
        assert_eq!(&*task, "svc");
        assert_eq!(reason, "crashed");
        root.close().await.expect("close");
    }
}
