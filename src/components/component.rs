//! # Component abstraction.
//!
//! This module defines the [`Component`] trait. The common handle type is
//! [`ComponentRef`], an `Arc<dyn Component>` suitable for sharing across the runtime.
//!
//! A component's `start` runs once, bound to the [`Context`] it is given. It may publish
//! resources, open child contexts, spawn tasks and register teardown callbacks; none of
//! the component itself survives the call except through what it registered.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{Context, ResourceKey};
use crate::error::ComponentError;

/// Shared handle to a component.
pub type ComponentRef = Arc<dyn Component>;

/// # Unit of startup logic.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use strata::{Component, ComponentError, Context, ResourceKey};
///
/// struct Pool;
/// struct Api;
///
/// #[async_trait]
/// impl Component for Api {
///     fn name(&self) -> &str { "api" }
///
///     fn requirements(&self) -> Vec<ResourceKey> {
///         vec![ResourceKey::of::<Pool>()]
///     }
///
///     async fn start(&self, ctx: Context) -> Result<(), ComponentError> {
///         let _pool = ctx.require::<Pool>().await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Component: Send + Sync + 'static {
    /// Returns a stable, human-readable component name.
    fn name(&self) -> &str;

    /// Resources that must be available before [`start`](Component::start) runs.
    fn requirements(&self) -> Vec<ResourceKey> {
        Vec::new()
    }

    /// Starts the component in `ctx`.
    async fn start(&self, ctx: Context) -> Result<(), ComponentError>;
}
