//! # Resource registry owned by a single context.
//!
//! Stores published values and lazy factories keyed by [`ResourceKey`]. The registry
//! itself knows nothing about the context chain; [`Context`](crate::Context) walks the
//! chain and consults each node's registry in turn.
//!
//! ## Rules
//! - Exact-key lookup is a single hash lookup.
//! - Keys are unique: a value and a factory cannot share a key either.
//! - Entries are append-only; they are dropped together with the owning context.
//! - Enumeration takes a snapshot under the arena lock; publications made after the
//!   snapshot are not observed by the returned iterator.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::OnceCell;

use super::key::ResourceKey;
use super::Context;
use crate::error::BoxError;

/// Type-erased resource value.
pub(crate) type ResourceValue = Arc<dyn Any + Send + Sync>;

/// Type-erased factory: receives the context that published it.
pub(crate) type FactoryFn =
    Arc<dyn Fn(Context) -> BoxFuture<'static, Result<ResourceValue, BoxError>> + Send + Sync>;

/// A factory plus the cell caching its value.
pub(crate) struct LazyResource {
    factory: FactoryFn,
    cell: OnceCell<ResourceValue>,
}

impl LazyResource {
    pub(crate) fn new(factory: FactoryFn) -> Self {
        Self {
            factory,
            cell: OnceCell::new(),
        }
    }

    /// Runs the factory unless a value is already cached.
    ///
    /// Concurrent callers share one factory run. A failed run caches nothing, so the
    /// next request runs the factory again. Returns the value and whether this call
    /// produced it.
    pub(crate) async fn materialize(
        &self,
        owner: Context,
    ) -> Result<(ResourceValue, bool), BoxError> {
        let mut fresh = false;
        let value = self
            .cell
            .get_or_try_init(|| {
                fresh = true;
                (self.factory)(owner)
            })
            .await?;
        Ok((Arc::clone(value), fresh))
    }

    fn cached(&self) -> Option<ResourceValue> {
        self.cell.get().cloned()
    }
}

/// A registry entry.
#[derive(Clone)]
pub(crate) enum Slot {
    Value(ResourceValue),
    Factory(Arc<LazyResource>),
}

impl Slot {
    /// The value, if one exists without running a factory.
    pub(crate) fn current(&self) -> Option<ResourceValue> {
        match self {
            Slot::Value(v) => Some(Arc::clone(v)),
            Slot::Factory(lazy) => lazy.cached(),
        }
    }
}

/// Typed, named storage of one context's resources.
#[derive(Default)]
pub(crate) struct Registry {
    entries: HashMap<ResourceKey, Slot>,
}

impl Registry {
    /// Inserts a new entry; returns `false` (and leaves the registry untouched) if the
    /// key is taken.
    pub(crate) fn insert(&mut self, key: ResourceKey, slot: Slot) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, slot);
        true
    }

    pub(crate) fn get(&self, key: &ResourceKey) -> Option<&Slot> {
        self.entries.get(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Name/value pairs of every available resource of type `type_id`, sorted by name.
    ///
    /// Factories that have not produced a value yet are skipped.
    pub(crate) fn snapshot(&self, type_id: TypeId) -> Vec<(Arc<str>, ResourceValue)> {
        let mut out: Vec<(Arc<str>, ResourceValue)> = self
            .entries
            .iter()
            .filter(|(key, _)| key.resource_type_id() == type_id)
            .filter_map(|(key, slot)| slot.current().map(|v| (key.name_arc(), v)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// All keys, sorted by their display form.
    pub(crate) fn keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = self.entries.keys().cloned().collect();
        keys.sort_by_key(|k| k.to_string());
        keys
    }
}

/// Lazy iterator over a snapshot of resources of type `T`.
///
/// Returned by [`Context::resources`](crate::Context::resources). Downcasting happens
/// as the iterator advances.
pub struct Resources<T> {
    inner: std::vec::IntoIter<(Arc<str>, ResourceValue)>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Resources<T> {
    pub(crate) fn new(snapshot: Vec<(Arc<str>, ResourceValue)>) -> Self {
        Self {
            inner: snapshot.into_iter(),
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static> Iterator for Resources<T> {
    type Item = (Arc<str>, Arc<T>);

    fn next(&mut self) -> Option<Self::Item> {
        for (name, value) in self.inner.by_ref() {
            if let Ok(typed) = value.downcast::<T>() {
                return Some((name, typed));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.inner.len()))
    }
}
