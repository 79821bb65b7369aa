//! # Container component.
//!
//! [`ContainerComponent`] owns an ordered set of child components, keyed by alias, and
//! starts them all concurrently **in its own context**. Children share one registry, so
//! a child publishing a resource unblocks any sibling that requires it; siblings without
//! dependencies on each other start fully in parallel.
//!
//! ```text
//! container.start(ctx)
//!   ├─ spawn start_component(child_1, ctx) ┐
//!   ├─ spawn start_component(child_2, ctx) ├─ JoinSet
//!   └─ spawn start_component(child_N, ctx) ┘
//!   first failure ─► abort remaining children ─► Err(Child { alias, source })
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::components::{start_component, Component, ComponentRef, ComponentRegistry, ComponentSpec};
use crate::context::Context;
use crate::error::{ComponentError, ConfigError};

/// Component that starts a set of children concurrently.
pub struct ContainerComponent {
    name: String,
    children: Vec<(Arc<str>, ComponentRef)>,
}

impl ContainerComponent {
    /// Creates an empty container.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// Adds a child under `alias`.
    ///
    /// Fails with [`ComponentError::DuplicateChild`] if the alias is taken.
    pub fn add(&mut self, alias: &str, child: ComponentRef) -> Result<(), ComponentError> {
        if self.children.iter().any(|(a, _)| &**a == alias) {
            return Err(ComponentError::DuplicateChild {
                alias: Arc::from(alias),
            });
        }
        self.children.push((Arc::from(alias), child));
        Ok(())
    }

    /// Builder form of [`add`](Self::add).
    pub fn with_child(mut self, alias: &str, child: ComponentRef) -> Result<Self, ComponentError> {
        self.add(alias, child)?;
        Ok(self)
    }

    /// Aliases of the children, in start order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|(a, _)| &**a)
    }

    /// Builds a container and its children from `spec`.
    ///
    /// Containers take no settings of their own.
    pub fn from_spec(
        alias: &str,
        spec: &ComponentSpec,
        registry: &ComponentRegistry,
    ) -> Result<Self, ConfigError> {
        if !spec.settings.is_empty() {
            let keys: Vec<&str> = spec.settings.keys().filter_map(|k| k.as_str()).collect();
            return Err(ConfigError::InvalidSpec {
                alias: alias.to_string(),
                reason: format!("container components take no settings, got: {}", keys.join(", ")),
            });
        }
        let mut container = Self::new(alias);
        for (child_alias, child_spec) in &spec.components {
            let child = registry.build(child_alias, child_spec)?;
            container.children.push((Arc::from(child_alias.as_str()), child));
        }
        Ok(container)
    }

    /// Like [`from_spec`](Self::from_spec), with `spec` merged over built-in `defaults`.
    pub fn from_spec_with_defaults(
        alias: &str,
        defaults: &ComponentSpec,
        spec: &ComponentSpec,
        registry: &ComponentRegistry,
    ) -> Result<Self, ConfigError> {
        let merged = spec.merged_over(alias, defaults)?;
        Self::from_spec(alias, &merged, registry)
    }
}

#[async_trait]
impl Component for ContainerComponent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, ctx: Context) -> Result<(), ComponentError> {
        let mut set = JoinSet::new();
        for (alias, child) in &self.children {
            let alias = Arc::clone(alias);
            let child = Arc::clone(child);
            let ctx = ctx.clone();
            set.spawn(async move {
                start_component(child.as_ref(), &ctx)
                    .await
                    .map_err(|e| ComponentError::Child {
                        alias,
                        source: Box::new(e),
                    })
            });
        }

        while let Some(joined) = set.join_next().await {
            let err = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(join_err) => ComponentError::Panicked {
                    component: Arc::from(self.name.as_str()),
                    info: join_err.to_string(),
                },
            };
            set.shutdown().await;
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::ComponentFn;

    fn noop(name: &'static str) -> ComponentRef {
        ComponentFn::arc(name, |_ctx: Context| async { Ok::<_, ComponentError>(()) })
    }

    #[test]
    fn duplicate_aliases_are_rejected() {
        let mut c = ContainerComponent::new("root");
        c.add("a", noop("a")).expect("first");
        let err = c.add("a", noop("a")).unwrap_err();
        assert_eq!(err.as_label(), "component_duplicate_child");
        assert_eq!(c.aliases().collect::<Vec<_>>(), vec!["a"]);
    }

    #[tokio::test]
    async fn siblings_resolve_dependencies_through_the_shared_context() {
        struct Port(u16);

        let consumer = ComponentFn::arc("consumer", |ctx: Context| async move {
            let port = ctx.require::<Port>().await?;
            ctx.publish_named("seen", port.0)?;
            Ok::<_, ComponentError>(())
        });
        let producer = ComponentFn::arc("producer", |ctx: Context| async move {
            tokio::task::yield_now().await;
            ctx.publish(Port(8080))?;
            Ok::<_, ComponentError>(())
        });
        let container = ContainerComponent::new("root")
            .with_child("consumer", consumer)
            .and_then(|c| c.with_child("producer", producer))
            .expect("children");

        let ctx = Context::root();
        start_component(&container, &ctx).await.expect("start");
        assert_eq!(ctx.get_named::<u16>("seen").as_deref(), Some(&8080));
    }

    #[tokio::test]
    async fn child_failures_carry_the_alias() {
        let failing = ComponentFn::arc("bad", |_ctx: Context| async {
            Err::<(), _>(ComponentError::fail("value error"))
        });
        let container = ContainerComponent::new("root")
            .with_child("bad", failing)
            .expect("child");

        let err = start_component(&container, &Context::root()).await.unwrap_err();
        assert_eq!(err.path(), vec!["bad"]);
        assert!(err.to_string().contains("value error"));
    }
}
