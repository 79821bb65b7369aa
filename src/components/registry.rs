//! # Component type registry.
//!
//! Maps the string type identifiers used in configuration (`type: postgres`) to
//! constructors. A constructor receives the component's alias, its [`ComponentSpec`] and
//! the registry itself (so that containers can build their children).
//!
//! [`ComponentRegistry::with_builtins`] pre-registers:
//! - `container` → [`ContainerComponent`]
//!
//! ## Example
//! ```rust
//! use serde::Deserialize;
//! use strata::{ComponentError, ComponentFn, ComponentRegistry, ComponentSpec, Context};
//!
//! #[derive(Deserialize)]
//! struct GreeterSettings { greeting: String }
//!
//! let mut registry = ComponentRegistry::with_builtins();
//! registry.register_with_settings("greeter", |alias, settings: GreeterSettings| {
//!     let greeting = settings.greeting;
//!     Ok(ComponentFn::arc(alias.to_string(), move |ctx: Context| {
//!         let greeting = greeting.clone();
//!         async move {
//!             ctx.publish(greeting)?;
//!             Ok::<_, ComponentError>(())
//!         }
//!     }))
//! });
//!
//! let spec = ComponentSpec::new("greeter").with_setting("greeting", "hello");
//! let component = registry.build("root", &spec).unwrap();
//! assert_eq!(component.name(), "root");
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::components::{ComponentRef, ComponentSpec, ContainerComponent};
use crate::error::ConfigError;

/// Constructor stored in a [`ComponentRegistry`].
pub type ComponentCtor = Arc<
    dyn Fn(&str, &ComponentSpec, &ComponentRegistry) -> Result<ComponentRef, ConfigError>
        + Send
        + Sync,
>;

/// String type identifier → constructor table.
#[derive(Clone)]
pub struct ComponentRegistry {
    ctors: HashMap<String, ComponentCtor>,
}

impl ComponentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    /// Registry with the built-in component types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("container", |alias, spec, registry| {
            let container = ContainerComponent::from_spec(alias, spec, registry)?;
            Ok(Arc::new(container) as ComponentRef)
        });
        registry
    }

    /// Registers (or replaces) the constructor for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, ctor: F) -> &mut Self
    where
        F: Fn(&str, &ComponentSpec, &ComponentRegistry) -> Result<ComponentRef, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.ctors.insert(kind.into(), Arc::new(ctor));
        self
    }

    /// Registers a constructor that takes the spec's settings deserialized into `S`.
    ///
    /// Components registered this way are leaves: a spec with children is rejected.
    pub fn register_with_settings<S, F, C>(&mut self, kind: impl Into<String>, ctor: F) -> &mut Self
    where
        S: DeserializeOwned,
        F: Fn(&str, S) -> Result<Arc<C>, ConfigError> + Send + Sync + 'static,
        C: crate::components::Component,
    {
        self.register(kind, move |alias, spec, _registry| {
            if !spec.components.is_empty() {
                return Err(ConfigError::InvalidSpec {
                    alias: alias.to_string(),
                    reason: "this component type does not take child components".to_string(),
                });
            }
            let settings = spec.settings::<S>(alias)?;
            Ok(ctor(alias, settings)? as ComponentRef)
        })
    }

    /// `true` if a constructor is registered for `kind`.
    pub fn contains(&self, kind: &str) -> bool {
        self.ctors.contains_key(kind)
    }

    /// Registered type identifiers, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.ctors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Instantiates the component `alias` described by `spec`.
    ///
    /// The type identifier is `spec.kind`, or `alias` when absent.
    pub fn build(&self, alias: &str, spec: &ComponentSpec) -> Result<ComponentRef, ConfigError> {
        let kind = spec.kind_or(alias);
        let ctor = self
            .ctors
            .get(kind)
            .ok_or_else(|| ConfigError::UnknownComponentType {
                alias: alias.to_string(),
                kind: kind.to_string(),
            })?;
        ctor(alias, spec, self)
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::ComponentFn;
    use crate::context::Context;
    use crate::error::ComponentError;

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::with_builtins();
        registry.register("noop", |alias, _spec, _registry| {
            Ok(ComponentFn::arc(alias.to_string(), |_ctx: Context| async {
                Ok::<_, ComponentError>(())
            }) as ComponentRef)
        });
        registry
    }

    #[test]
    fn builds_nested_containers() {
        let spec = ComponentSpec::new("container")
            .with_child("a", ComponentSpec::new("noop"))
            .with_child(
                "inner",
                ComponentSpec::new("container").with_child("noop", ComponentSpec::default()),
            );
        let root = registry().build("root", &spec).expect("build");
        assert_eq!(root.name(), "root");
        assert_eq!(registry().kinds(), vec!["container", "noop"]);
    }

    #[test]
    fn unknown_types_are_reported_with_their_alias() {
        let spec = ComponentSpec::new("container").with_child("web", ComponentSpec::default());
        let err = match registry().build("root", &spec) {
            Err(err) => err,
            Ok(_) => panic!("web is not registered"),
        };
        assert!(matches!(
            err,
            ConfigError::UnknownComponentType { ref alias, ref kind } if alias == "web" && kind == "web"
        ));
    }

    #[test]
    fn containers_reject_settings() {
        let spec = ComponentSpec::new("container").with_setting("port", 1);
        assert!(registry().build("root", &spec).is_err());
    }
}
