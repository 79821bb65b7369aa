//! # Resource keys.
//!
//! A [`ResourceKey`] identifies a resource by its Rust type and a name. Two keys are
//! equal when both the [`TypeId`] and the name match; the type name is carried along
//! only for diagnostics.
//!
//! ## Rules
//! - The default name is [`DEFAULT_NAME`] (`"default"`).
//! - Names are nonempty and contain only ASCII alphanumerics and `_`.

use std::any::{type_name, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::ContextError;

/// Name used when a resource is published or requested without one.
pub const DEFAULT_NAME: &str = "default";

/// Explicit `(type, name)` identifier of a resource.
#[derive(Clone)]
pub struct ResourceKey {
    type_id: TypeId,
    type_name: &'static str,
    name: Arc<str>,
}

impl ResourceKey {
    /// Key for `T` under the default name.
    pub fn of<T: 'static>() -> Self {
        Self::named::<T>(DEFAULT_NAME)
    }

    /// Key for `T` under `name`.
    pub fn named<T: 'static>(name: impl Into<Arc<str>>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            name: name.into(),
        }
    }

    /// The resource type's [`TypeId`].
    pub fn resource_type_id(&self) -> TypeId {
        self.type_id
    }

    /// The resource type's name (diagnostics only).
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Rejects names that are empty or contain characters other than `[A-Za-z0-9_]`.
    pub(crate) fn validate(&self) -> Result<(), ContextError> {
        if is_valid_name(&self.name) {
            Ok(())
        } else {
            Err(ContextError::InvalidResourceName {
                name: self.name_arc(),
            })
        }
    }
}

/// Returns `true` if `name` is usable as a resource name.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl PartialEq for ResourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.name == other.name
    }
}

impl Eq for ResourceKey {}

impl Hash for ResourceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.type_name, self.name)
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Database;

    #[test]
    fn keys_compare_by_type_and_name() {
        assert_eq!(ResourceKey::of::<Database>(), ResourceKey::named::<Database>("default"));
        assert_ne!(ResourceKey::of::<Database>(), ResourceKey::named::<Database>("replica"));
        assert_ne!(ResourceKey::of::<Database>(), ResourceKey::of::<String>());
    }

    #[test]
    fn resource_type_id_resolves_through_references() {
        let key = ResourceKey::named::<Database>("main");
        let keys = [&key];
        let matching = keys
            .iter()
            .filter(|k| k.resource_type_id() == TypeId::of::<Database>())
            .count();
        assert_eq!(matching, 1);
    }

    #[test]
    fn names_are_validated() {
        assert!(is_valid_name("primary_db2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("has space"));
        assert!(!is_valid_name("dotted.name"));

        let err = ResourceKey::named::<Database>("bad-name").validate().unwrap_err();
        assert_eq!(err.as_label(), "invalid_resource_name");
    }

    #[test]
    fn display_includes_type_and_name() {
        let key = ResourceKey::named::<String>("greeting");
        assert_eq!(key.to_string(), "alloc::string::String(\"greeting\")");
    }
}
