//! # Function-backed component (`ComponentFn`)
//!
//! [`ComponentFn`] wraps a closure `F: Fn(Context) -> Fut`, producing a fresh future per
//! start.
//!
//! ## Example
//! ```rust
//! use strata::{Component, ComponentError, ComponentFn, ComponentRef, Context, ResourceKey};
//!
//! struct Greeting(String);
//!
//! let greeter: ComponentRef = ComponentFn::arc("greeter", |ctx: Context| async move {
//!     ctx.publish(Greeting("hello".into()))?;
//!     Ok::<_, ComponentError>(())
//! });
//! assert_eq!(greeter.name(), "greeter");
//!
//! let printer = ComponentFn::new("printer", |ctx: Context| async move {
//!     let greeting = ctx.require::<Greeting>().await?;
//!     println!("{}", greeting.0);
//!     Ok::<_, ComponentError>(())
//! })
//! .requiring(ResourceKey::of::<Greeting>());
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::components::Component;
use crate::context::{Context, ResourceKey};
use crate::error::ComponentError;

/// Function-backed component implementation.
pub struct ComponentFn<F> {
    name: Cow<'static, str>,
    requires: Vec<ResourceKey>,
    f: F,
}

impl<F> ComponentFn<F> {
    /// Creates a new function-backed component.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            requires: Vec::new(),
            f,
        }
    }

    /// Creates the component and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }

    /// Declares a resource that must be available before the closure runs.
    pub fn requiring(mut self, key: ResourceKey) -> Self {
        self.requires.push(key);
        self
    }
}

#[async_trait]
impl<F, Fut> Component for ComponentFn<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ComponentError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn requirements(&self) -> Vec<ResourceKey> {
        self.requires.clone()
    }

    async fn start(&self, ctx: Context) -> Result<(), ComponentError> {
        (self.f)(ctx).await
    }
}
