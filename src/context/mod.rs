//! # Contexts: scoped, hierarchical resource containers.
//!
//! A [`Context`] is a cheap, cloneable handle to one node of a context tree. Each node
//! owns a resource registry, a stack of teardown callbacks, a cancellation scope and
//! the background tasks spawned on it.
//!
//! ## Architecture
//! ```text
//! Context (handle: tree + id)
//!   ├─ publish / publish_factory ──► Registry of this node ──► wake waiters on this node
//!   ├─ require ──► walk node → parent → … → root
//!   │               ├─ hit: value (factories run once, outside the lock)
//!   │               └─ miss: register waiter on every node of the chain, await Notify
//!   ├─ open_child ──► new node, token = parent.token.child_token()
//!   ├─ spawn_task / spawn_service ──► node JoinSet
//!   └─ close ──► closing ─► cancel token ─► close children (newest first)
//!                          ─► drain tasks (grace) ─► callbacks LIFO ─► closed
//! ```
//!
//! ## Rules
//! - Resources are visible to the publishing context and its descendants, never to
//!   ancestors or siblings.
//! - `(type, name)` is unique per context; re-publishing fails with `DuplicateResource`.
//! - Publishing, opening children, registering callbacks and spawning tasks require an
//!   open context; lookups keep working while the context is closing.
//! - A context finishes teardown only after every child has.
//! - `close` is idempotent; concurrent callers wait for the first close to finish.
//!
//! ## Example
//! ```rust
//! use strata::Context;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let root = Context::root();
//! root.publish(String::from("postgres://localhost/app"))?;
//!
//! let child = root.open_child()?;
//! let dsn = child.require::<String>().await?;
//! assert_eq!(dsn.as_str(), "postgres://localhost/app");
//!
//! root.close().await?;
//! # Ok(())
//! # }
//! ```

mod key;
mod registry;
mod scope;
mod teardown;
mod tree;

use std::any::TypeId;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::RuntimeConfig;
use crate::error::{BoxError, ContextError};
use crate::events::{Bus, Event, EventKind};

pub use key::{is_valid_name, ResourceKey, DEFAULT_NAME};
pub use registry::Resources;
pub use teardown::TeardownCause;
pub use tree::{ContextId, ContextState};

use registry::{FactoryFn, LazyResource, ResourceValue, Slot};
use teardown::TeardownEntry;
use tree::{ContextTree, Lookup};

/// Handle to a node of a context tree.
///
/// Cloning is cheap; all clones refer to the same node.
#[derive(Clone)]
pub struct Context {
    tree: Arc<ContextTree>,
    id: ContextId,
    path: Arc<str>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

impl Context {
    /// Opens a standalone root context with the default [`RuntimeConfig`] and a private
    /// event bus.
    pub fn root() -> Self {
        let cfg = RuntimeConfig::default();
        let bus = Bus::new(cfg.bus_capacity_clamped());
        Self::root_with(cfg, bus)
    }

    /// Opens a root context that uses `config` and publishes events to `bus`.
    pub fn root_with(config: RuntimeConfig, bus: Bus) -> Self {
        let (tree, id) = ContextTree::new(config, bus, "root");
        let ctx = Self {
            tree,
            id,
            path: Arc::from("root"),
        };
        ctx.emit(Event::new(EventKind::ContextOpened));
        ctx
    }

    /// Identifier of this context within its tree.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Slash-separated path from the root (`root/web/ctx1`).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContextState {
        self.tree.state(self.id)
    }

    /// `true` once teardown has begun.
    pub fn is_closed(&self) -> bool {
        self.state() != ContextState::Open
    }

    /// The parent context, if this is not a root and the parent still exists.
    pub fn parent(&self) -> Option<Context> {
        let nodes = self.tree.nodes.lock();
        let parent = nodes.get(&self.id)?.parent?;
        let path = Arc::clone(&nodes.get(&parent)?.path);
        Some(Context {
            tree: Arc::clone(&self.tree),
            id: parent,
            path,
        })
    }

    /// Runtime configuration shared by the whole tree.
    pub fn config(&self) -> &RuntimeConfig {
        &self.tree.config
    }

    /// Event bus shared by the whole tree.
    pub fn bus(&self) -> &Bus {
        &self.tree.bus
    }

    pub(crate) fn tree(&self) -> &Arc<ContextTree> {
        &self.tree
    }

    fn handle(&self, id: ContextId, path: Arc<str>) -> Context {
        Context {
            tree: Arc::clone(&self.tree),
            id,
            path,
        }
    }

    fn emit(&self, ev: Event) {
        self.tree.bus.publish(ev.with_context(Arc::clone(&self.path)));
    }

    fn closed_error(&self) -> ContextError {
        ContextError::ContextClosed {
            context: Arc::clone(&self.path),
        }
    }

    // ---- Publishing ----

    /// Publishes `value` under the default name.
    pub fn publish<T: Send + Sync + 'static>(&self, value: T) -> Result<(), ContextError> {
        self.publish_named(DEFAULT_NAME, value)
    }

    /// Publishes `value` under `name`.
    ///
    /// Fails with [`ContextError::DuplicateResource`] if this context already holds a
    /// resource (or factory) of type `T` named `name`. Ancestors' entries are not
    /// conflicts; they are shadowed.
    pub fn publish_named<T: Send + Sync + 'static>(
        &self,
        name: impl Into<Arc<str>>,
        value: T,
    ) -> Result<(), ContextError> {
        let key = ResourceKey::named::<T>(name);
        self.insert(key, Slot::Value(Arc::new(value)), None, EventKind::ResourcePublished)
    }

    /// Publishes `value` and registers `teardown` to run with it when this context
    /// closes.
    ///
    /// Both happen atomically: if the publication fails, the callback is not registered.
    pub fn publish_with_teardown<T, F, Fut, E>(
        &self,
        name: impl Into<Arc<str>>,
        value: T,
        teardown: F,
    ) -> Result<(), ContextError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let key = ResourceKey::named::<T>(name);
        let value = Arc::new(value);
        let for_teardown = Arc::clone(&value);
        let entry = TeardownEntry::new(key.to_string().into(), move |_cause| {
            teardown(for_teardown)
        });
        self.insert(key, Slot::Value(value), Some(entry), EventKind::ResourcePublished)
    }

    /// Registers a lazy resource under `name`.
    ///
    /// The factory receives this context and runs at most once successfully, on the first
    /// `require` that resolves to it; the value is cached here for the context's
    /// lifetime. A failed run is reported as [`ContextError::FactoryFailed`] and retried
    /// by the next request.
    pub fn publish_factory<T, F, Fut, E>(
        &self,
        name: impl Into<Arc<str>>,
        factory: F,
    ) -> Result<(), ContextError>
    where
        T: Send + Sync + 'static,
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let key = ResourceKey::named::<T>(name);
        let factory: FactoryFn = Arc::new(move |ctx| {
            let fut = factory(ctx);
            async move {
                match fut.await {
                    Ok(value) => Ok(Arc::new(value) as ResourceValue),
                    Err(err) => {
                        let err: BoxError = err.into();
                        Err(err)
                    }
                }
            }
            .boxed()
        });
        let slot = Slot::Factory(Arc::new(LazyResource::new(factory)));
        self.insert(key, slot, None, EventKind::FactoryPublished)
    }

    fn insert(
        &self,
        key: ResourceKey,
        slot: Slot,
        teardown: Option<TeardownEntry>,
        kind: EventKind,
    ) -> Result<(), ContextError> {
        key.validate()?;
        {
            let mut nodes = self.tree.nodes.lock();
            let node = match nodes.get_mut(&self.id) {
                Some(node) if node.state == ContextState::Open => node,
                _ => return Err(self.closed_error()),
            };
            if !node.registry.insert(key.clone(), slot) {
                return Err(ContextError::DuplicateResource {
                    context: Arc::clone(&self.path),
                    key,
                });
            }
            if let Some(entry) = teardown {
                node.teardown.push(entry);
            }
            node.wake(&key);
        }
        self.emit(Event::new(kind).with_resource(&key));
        Ok(())
    }

    // ---- Lookup ----

    /// Waits for the default-named resource of type `T`.
    ///
    /// Uses the global `require_timeout`; waits forever when it is unset.
    pub async fn require<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ContextError> {
        self.require_named::<T>(DEFAULT_NAME).await
    }

    /// Waits for the resource of type `T` named `name` (global timeout).
    pub async fn require_named<T: Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<Arc<T>, ContextError> {
        self.require_within::<T>(name, None).await
    }

    /// Waits for the resource of type `T` named `name`.
    ///
    /// Returns the nearest matching entry on the path to the root. If there is none,
    /// suspends until one is published in this context or an ancestor; fails with
    /// [`ContextError::ResourceNotFound`] once `timeout` (or, when `None`, the global
    /// `require_timeout`) elapses, and with [`ContextError::ContextClosed`] if this
    /// context starts closing first.
    pub async fn require_within<T: Send + Sync + 'static>(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> Result<Arc<T>, ContextError> {
        let key = ResourceKey::named::<T>(name);
        let value = self.require_key(&key, timeout).await?;
        value
            .downcast::<T>()
            .map_err(|_| ContextError::TypeMismatch { key })
    }

    /// Type-erased [`require_within`](Self::require_within); resolves `key` and discards
    /// the value's type.
    pub async fn wait_for(
        &self,
        key: &ResourceKey,
        timeout: Option<Duration>,
    ) -> Result<(), ContextError> {
        self.require_key(key, timeout).await.map(|_| ())
    }

    async fn require_key(
        &self,
        key: &ResourceKey,
        timeout: Option<Duration>,
    ) -> Result<ResourceValue, ContextError> {
        key.validate()?;
        let timeout = timeout.or_else(|| self.tree.config.require_timeout_opt());
        // A deadline past the clock's range means no deadline.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut announced = false;

        loop {
            let notify = Arc::new(Notify::new());
            let lookup = self
                .tree
                .lookup_or_register(self.id, key, &self.path, &notify)
                .map_err(|()| self.closed_error())?;

            let guard = match lookup {
                Lookup::Found {
                    owner,
                    owner_path,
                    slot,
                } => return self.materialize(owner, owner_path, key, slot).await,
                Lookup::Registered { waiter, nodes } => WaiterGuard {
                    tree: Arc::clone(&self.tree),
                    key,
                    waiter,
                    nodes,
                },
            };

            if !announced {
                announced = true;
                self.emit(Event::new(EventKind::RequireWaiting).with_resource(key));
            }

            let woken = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, notify.notified())
                    .await
                    .is_ok(),
                None => {
                    notify.notified().await;
                    true
                }
            };
            drop(guard);

            if !woken {
                let mut ev = Event::new(EventKind::RequireTimedOut).with_resource(key);
                if let Some(t) = timeout {
                    ev = ev.with_timeout(t);
                }
                self.emit(ev);
                return Err(ContextError::ResourceNotFound {
                    key: key.clone(),
                    timeout,
                });
            }
        }
    }

    async fn materialize(
        &self,
        owner: ContextId,
        owner_path: Arc<str>,
        key: &ResourceKey,
        slot: Slot,
    ) -> Result<ResourceValue, ContextError> {
        match slot {
            Slot::Value(value) => Ok(value),
            Slot::Factory(lazy) => {
                let owner = self.handle(owner, owner_path);
                let (value, fresh) = lazy.materialize(owner.clone()).await.map_err(|err| {
                    ContextError::FactoryFailed {
                        key: key.clone(),
                        error: err.to_string(),
                    }
                })?;
                if fresh {
                    owner.emit(Event::new(EventKind::ResourceMaterialized).with_resource(key));
                }
                Ok(value)
            }
        }
    }

    /// Returns the nearest default-named `T` without waiting.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.get_named::<T>(DEFAULT_NAME)
    }

    /// Returns the nearest `T` named `name` without waiting.
    ///
    /// Factories are not run; a factory that has not produced its value yet counts as
    /// absent.
    pub fn get_named<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        let key = ResourceKey::named::<T>(name);
        let (_, _, slot) = {
            let nodes = self.tree.nodes.lock();
            ContextTree::find(&nodes, self.id, &key)?
        };
        slot.current()?.downcast::<T>().ok()
    }

    /// Every available resource of type `T` on the path to the root, as `(name, value)`
    /// pairs sorted by name.
    ///
    /// A name published in a nearer context shadows the same name farther up. Factories
    /// are not triggered. The result is a snapshot taken at call time.
    pub fn resources<T: Send + Sync + 'static>(&self) -> Resources<T> {
        let nodes = self.tree.nodes.lock();
        let mut seen: HashSet<Arc<str>> = HashSet::new();
        let mut out = Vec::new();
        for id in ContextTree::chain(&nodes, self.id) {
            let Some(node) = nodes.get(&id) else {
                continue;
            };
            for (name, value) in node.registry.snapshot(TypeId::of::<T>()) {
                if seen.insert(Arc::clone(&name)) {
                    out.push((name, value));
                }
            }
        }
        drop(nodes);
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Resources::new(out)
    }

    /// Keys of the entries published directly in this context.
    pub fn local_keys(&self) -> Vec<ResourceKey> {
        self.tree
            .nodes
            .lock()
            .get(&self.id)
            .map(|n| n.registry.keys())
            .unwrap_or_default()
    }
}

/// Deregisters a pending `require` from every node it was registered on.
///
/// Never dropped while the arena lock is held.
struct WaiterGuard<'a> {
    tree: Arc<ContextTree>,
    key: &'a ResourceKey,
    waiter: u64,
    nodes: Vec<ContextId>,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.tree.deregister(self.key, self.waiter, &self.nodes);
    }
}
