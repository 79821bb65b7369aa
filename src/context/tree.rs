//! # Context arena.
//!
//! All contexts of one application live in a single [`ContextTree`], keyed by
//! [`ContextId`]. A node stores its parent as an id and its children as a list of ids;
//! [`Context`](super::Context) handles are `(tree, id)` pairs, so a handle never keeps a
//! node alive and a closed node simply disappears from the map.
//!
//! ```text
//! ContextTree { nodes: Mutex<HashMap<ContextId, Node>> }
//!
//!   root ─┬─ root/db
//!         └─ root/web ── root/web/api
//!
//! lookup(root/web/api, key): api → web → root   (first hit wins)
//! ```
//!
//! ## Rules
//! - The arena lock is held only for short synchronous sections and never across `.await`.
//! - User code (factories, callbacks, task bodies) never runs under the lock.
//! - A node is removed from the arena only after its children are gone and its teardown
//!   callbacks have run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::key::ResourceKey;
use super::registry::{Registry, Slot};
use super::teardown::TeardownEntry;
use crate::config::RuntimeConfig;
use crate::events::Bus;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_WAITER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier of a context within its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle of a single context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    /// Accepting publications, children, callbacks and tasks.
    Open,
    /// Teardown has begun; lookups still work, mutations are rejected.
    Closing,
    /// Teardown finished.
    Closed,
}

/// A suspended `require` call, registered on every node of the requester's chain.
pub(crate) struct Waiter {
    id: u64,
    origin: Arc<str>,
    notify: Arc<Notify>,
}

pub(crate) struct Node {
    pub(crate) path: Arc<str>,
    pub(crate) parent: Option<ContextId>,
    pub(crate) children: Vec<ContextId>,
    pub(crate) state: ContextState,
    pub(crate) registry: Registry,
    pub(crate) teardown: Vec<TeardownEntry>,
    pub(crate) waiters: HashMap<ResourceKey, Vec<Waiter>>,
    pub(crate) token: CancellationToken,
    pub(crate) tasks: JoinSet<()>,
    pub(crate) done: CancellationToken,
    child_seq: u64,
}

impl Node {
    fn new(path: Arc<str>, parent: Option<ContextId>, token: CancellationToken) -> Self {
        Self {
            path,
            parent,
            children: Vec::new(),
            state: ContextState::Open,
            registry: Registry::default(),
            teardown: Vec::new(),
            waiters: HashMap::new(),
            token,
            tasks: JoinSet::new(),
            done: CancellationToken::new(),
            child_seq: 0,
        }
    }

    /// Wakes every `require` call suspended on `key` at this node.
    pub(crate) fn wake(&self, key: &ResourceKey) {
        if let Some(list) = self.waiters.get(key) {
            for w in list {
                w.notify.notify_one();
            }
        }
    }

    fn wake_all(&self) {
        for w in self.waiters.values().flatten() {
            w.notify.notify_one();
        }
    }
}

/// What [`ContextTree::begin_close`] decided.
pub(crate) enum BeginClose {
    /// Already closed (or never existed).
    Done,
    /// Another caller is closing it; wait for the token.
    InProgress(CancellationToken),
    /// The caller owns the close.
    Begin(ClosePlan),
}

/// Everything a close needs, moved out of the node under the lock.
pub(crate) struct ClosePlan {
    pub(crate) path: Arc<str>,
    pub(crate) children: Vec<ContextId>,
    pub(crate) tasks: JoinSet<()>,
    pub(crate) teardown: Vec<TeardownEntry>,
    pub(crate) token: CancellationToken,
    pub(crate) done: CancellationToken,
}

/// Result of a locked lookup on a requester's chain.
pub(crate) enum Lookup {
    Found {
        owner: ContextId,
        owner_path: Arc<str>,
        slot: Slot,
    },
    /// Not found; a waiter was registered on these nodes.
    Registered { waiter: u64, nodes: Vec<ContextId> },
}

/// Shared state of one context tree.
pub(crate) struct ContextTree {
    pub(crate) nodes: Mutex<HashMap<ContextId, Node>>,
    pub(crate) config: RuntimeConfig,
    pub(crate) bus: Bus,
    failure: CancellationToken,
    failure_reason: Mutex<Option<(Arc<str>, String)>>,
    exit: CancellationToken,
    exit_code: Mutex<Option<u8>>,
}

impl ContextTree {
    /// Creates a tree holding only a root node named `root_name`.
    pub(crate) fn new(config: RuntimeConfig, bus: Bus, root_name: &str) -> (Arc<Self>, ContextId) {
        let id = ContextId::next();
        let root = Node::new(Arc::from(root_name), None, CancellationToken::new());
        let mut nodes = HashMap::new();
        nodes.insert(id, root);
        let tree = Arc::new(Self {
            nodes: Mutex::new(nodes),
            config,
            bus,
            failure: CancellationToken::new(),
            failure_reason: Mutex::new(None),
            exit: CancellationToken::new(),
            exit_code: Mutex::new(None),
        });
        (tree, id)
    }

    /// Adds an open child under `parent`. `label = None` picks the next `ctxN` label.
    pub(crate) fn add_child(
        &self,
        parent: ContextId,
        label: Option<&str>,
    ) -> Result<(ContextId, Arc<str>), Option<Arc<str>>> {
        let mut nodes = self.nodes.lock();
        let Some(node) = nodes.get_mut(&parent) else {
            return Err(None);
        };
        if node.state != ContextState::Open {
            return Err(Some(Arc::clone(&node.path)));
        }
        node.child_seq += 1;
        let path: Arc<str> = match label {
            Some(label) => format!("{}/{label}", node.path).into(),
            None => format!("{}/ctx{}", node.path, node.child_seq).into(),
        };
        let id = ContextId::next();
        let token = node.token.child_token();
        node.children.push(id);
        nodes.insert(id, Node::new(Arc::clone(&path), Some(parent), token));
        Ok((id, path))
    }

    /// Ids from `start` up to the root, nearest first.
    pub(crate) fn chain(nodes: &HashMap<ContextId, Node>, start: ContextId) -> Vec<ContextId> {
        let mut out = Vec::new();
        let mut cur = Some(start);
        while let Some(id) = cur {
            match nodes.get(&id) {
                Some(node) => {
                    out.push(id);
                    cur = node.parent;
                }
                None => break,
            }
        }
        out
    }

    /// Nearest entry for `key` on the chain starting at `start`.
    pub(crate) fn find(
        nodes: &HashMap<ContextId, Node>,
        start: ContextId,
        key: &ResourceKey,
    ) -> Option<(ContextId, Arc<str>, Slot)> {
        Self::chain(nodes, start).into_iter().find_map(|id| {
            let node = nodes.get(&id)?;
            let slot = node.registry.get(key)?;
            Some((id, Arc::clone(&node.path), slot.clone()))
        })
    }

    /// Looks `key` up on the chain; on a miss registers `notify` as a waiter on every
    /// node of the chain.
    ///
    /// Fails with the requester's path if the requester is not open and nothing matched.
    pub(crate) fn lookup_or_register(
        &self,
        start: ContextId,
        key: &ResourceKey,
        origin: &Arc<str>,
        notify: &Arc<Notify>,
    ) -> Result<Lookup, ()> {
        let mut nodes = self.nodes.lock();
        if let Some((owner, owner_path, slot)) = Self::find(&nodes, start, key) {
            return Ok(Lookup::Found {
                owner,
                owner_path,
                slot,
            });
        }
        match nodes.get(&start) {
            Some(node) if node.state == ContextState::Open => {}
            _ => return Err(()),
        }

        let waiter = NEXT_WAITER_ID.fetch_add(1, Ordering::Relaxed);
        let chain = Self::chain(&nodes, start);
        for id in &chain {
            if let Some(node) = nodes.get_mut(id) {
                node.waiters.entry(key.clone()).or_default().push(Waiter {
                    id: waiter,
                    origin: Arc::clone(origin),
                    notify: Arc::clone(notify),
                });
            }
        }
        Ok(Lookup::Registered {
            waiter,
            nodes: chain,
        })
    }

    /// Removes a waiter registered by [`lookup_or_register`](Self::lookup_or_register).
    pub(crate) fn deregister(&self, key: &ResourceKey, waiter: u64, on: &[ContextId]) {
        let mut nodes = self.nodes.lock();
        for id in on {
            let Some(node) = nodes.get_mut(id) else {
                continue;
            };
            if let Some(list) = node.waiters.get_mut(key) {
                list.retain(|w| w.id != waiter);
                if list.is_empty() {
                    node.waiters.remove(key);
                }
            }
        }
    }

    /// Marks `id` as closing and moves out what the close needs.
    pub(crate) fn begin_close(&self, id: ContextId) -> BeginClose {
        let mut nodes = self.nodes.lock();
        let Some(node) = nodes.get_mut(&id) else {
            return BeginClose::Done;
        };
        match node.state {
            ContextState::Closed => BeginClose::Done,
            ContextState::Closing => BeginClose::InProgress(node.done.clone()),
            ContextState::Open => {
                node.state = ContextState::Closing;
                node.wake_all();
                BeginClose::Begin(ClosePlan {
                    path: Arc::clone(&node.path),
                    children: node.children.clone(),
                    tasks: std::mem::take(&mut node.tasks),
                    teardown: std::mem::take(&mut node.teardown),
                    token: node.token.clone(),
                    done: node.done.clone(),
                })
            }
        }
    }

    /// Removes a fully torn down node and unlinks it from its parent.
    ///
    /// Returns the node so that its registry is dropped outside the lock.
    pub(crate) fn finish_close(&self, id: ContextId) -> Option<Node> {
        let mut nodes = self.nodes.lock();
        let mut node = nodes.remove(&id)?;
        node.state = ContextState::Closed;
        if let Some(parent) = node.parent.and_then(|p| nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
        }
        Some(node)
    }

    /// State of `id`; missing nodes count as closed.
    pub(crate) fn state(&self, id: ContextId) -> ContextState {
        self.nodes
            .lock()
            .get(&id)
            .map(|n| n.state)
            .unwrap_or(ContextState::Closed)
    }

    /// Pending `require` calls as `path: key`, sorted.
    pub(crate) fn pending_requests(&self) -> Vec<String> {
        let nodes = self.nodes.lock();
        let mut out: Vec<String> = nodes
            .values()
            .flat_map(|node| {
                node.waiters.iter().flat_map(move |(key, list)| {
                    list.iter()
                        .filter(move |w| w.origin == node.path)
                        .map(move |w| format!("{}: {key}", w.origin))
                })
            })
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Records the first service failure and fires the failure token.
    pub(crate) fn mark_failed(&self, task: Arc<str>, reason: String) {
        {
            let mut slot = self.failure_reason.lock();
            if slot.is_none() {
                *slot = Some((task, reason));
            }
        }
        self.failure.cancel();
    }

    /// Fires once a service task has failed.
    pub(crate) fn failure_token(&self) -> CancellationToken {
        self.failure.clone()
    }

    /// The first recorded service failure.
    pub(crate) fn failure(&self) -> Option<(Arc<str>, String)> {
        self.failure_reason.lock().clone()
    }

    /// Records the first exit request and fires the exit token.
    pub(crate) fn request_exit(&self, code: u8) {
        {
            let mut slot = self.exit_code.lock();
            if slot.is_none() {
                *slot = Some(code);
            }
        }
        self.exit.cancel();
    }

    /// Fires once the application asked to exit.
    pub(crate) fn exit_token(&self) -> CancellationToken {
        self.exit.clone()
    }

    /// The first requested exit code.
    pub(crate) fn exit_code(&self) -> Option<u8> {
        *self.exit_code.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> (Arc<ContextTree>, ContextId) {
        ContextTree::new(RuntimeConfig::default(), Bus::new(8), "root")
    }

    #[test]
    fn children_get_generated_or_explicit_labels() {
        let (tree, root) = tree();
        let (_, a) = tree.add_child(root, None).expect("open");
        let (b_id, b) = tree.add_child(root, Some("web")).expect("open");
        let (_, c) = tree.add_child(b_id, None).expect("open");
        assert_eq!(&*a, "root/ctx1");
        assert_eq!(&*b, "root/web");
        assert_eq!(&*c, "root/web/ctx1");
    }

    #[test]
    fn waiters_are_registered_on_the_whole_chain_and_removed() {
        let (tree, root) = tree();
        let (child, path) = tree.add_child(root, None).expect("open");
        let key = ResourceKey::of::<u8>();
        let notify = Arc::new(Notify::new());

        let Ok(Lookup::Registered { waiter, nodes }) =
            tree.lookup_or_register(child, &key, &path, &notify)
        else {
            panic!("expected a registration");
        };
        assert_eq!(nodes, vec![child, root]);
        assert_eq!(tree.pending_requests(), vec![format!("root/ctx1: {key}")]);

        tree.deregister(&key, waiter, &nodes);
        assert!(tree.pending_requests().is_empty());
    }

    #[test]
    fn closing_nodes_reject_children() {
        let (tree, root) = tree();
        assert!(matches!(tree.begin_close(root), BeginClose::Begin(_)));
        assert!(matches!(tree.begin_close(root), BeginClose::InProgress(_)));
        assert!(tree.add_child(root, None).is_err());

        assert!(tree.finish_close(root).is_some());
        assert_eq!(tree.state(root), ContextState::Closed);
        assert!(matches!(tree.begin_close(root), BeginClose::Done));
    }
}
