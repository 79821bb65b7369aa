//! # strata
//!
//! **Strata** is a lightweight application runtime for async Rust services.
//!
//! An application is a tree of [`Component`]s. Each component starts inside a
//! [`Context`]: a scoped, hierarchical container of shared resources, teardown
//! callbacks and background tasks. Components that need a resource simply `require`
//! it and wait until a sibling publishes it, so startup order follows from resource
//! availability without an explicit dependency graph. Teardown runs in strict reverse
//! order.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   config.yaml ──► ConfigLoader ──► ComponentSpec ──► ComponentRegistry::build
//!                                                             │
//!                                                             ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Orchestrator (lifecycle: CREATED → STARTING → RUNNING → STOPPED) │
//! │  - Bus (broadcast events)                                         │
//! │  - StartupTracker (components still starting, sequence-based)     │
//! │  - SubscriberSet (fans out to user subscribers)                   │
//! └──────────────────────────────┬────────────────────────────────────┘
//!                                ▼
//!                      root Context ◄── start(root component)
//!                     ╱      │       ╲
//!            resources   teardown    tasks / services
//!                        callbacks
//!                     ╲      │       ╱
//!               child Context  child Context ...   (open_child)
//!                      │
//!                      ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │               (capacity: RuntimeConfig::bus_capacity)             │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │  subscriber_listener   │
//!                       │   (in Orchestrator)    │
//!                       └───┬────────────────┬───┘
//!                           ▼                ▼
//!                   StartupTracker     SubscriberSet
//!                                  ┌─────────┼─────────┐
//!                                  ▼         ▼         ▼
//!                               worker1   worker2   workerN
//! ```
//!
//! ### Resource lookup
//! ```text
//! ctx.require::<T>(name)
//!   ├─ found in ctx / parent / … / root ─► Arc<T>   (factories run once, cached)
//!   └─ missing ─► wait until published anywhere on the chain
//!                  ├─ published ─► Arc<T>
//!                  ├─ timeout   ─► ResourceNotFound
//!                  └─ closing   ─► ContextClosed
//! ```
//!
//! ## Features
//! | Area              | Description                                                    | Key types / traits                          |
//! |-------------------|----------------------------------------------------------------|---------------------------------------------|
//! | **Contexts**      | Scoped resources, teardown callbacks, tasks, reverse teardown. | [`Context`], [`ResourceKey`]                |
//! | **Components**    | Units of startup logic, composable into trees.                 | [`Component`], [`ComponentFn`], [`ContainerComponent`] |
//! | **Orchestration** | Startup with timeout, stop, run until a signal arrives.        | [`Orchestrator`], [`LifecycleState`]        |
//! | **Configuration** | YAML files, overrides, services, component specs.              | [`ConfigLoader`], [`ComponentSpec`], [`ComponentRegistry`] |
//! | **Subscriber API**| Hook into runtime events (logging, metrics, custom).           | [`Subscribe`], [`Event`]                    |
//! | **Errors**        | Typed errors per layer.                                        | [`ContextError`], [`ComponentError`], [`RuntimeError`], [`ConfigError`] |
//!
//! ## Optional features
//! - `logging`: exports a built-in [`LogWriter`] rendering events as `tracing` records.
//! - `cli`: builds the `strata` binary.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use strata::{
//!     ComponentError, ComponentFn, ContainerComponent, Context, Orchestrator, ResourceKey,
//!     RuntimeConfig,
//! };
//!
//! struct Pool(&'static str);
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = RuntimeConfig::default();
//!     cfg.start_timeout = Duration::from_secs(5);
//!
//!     let db = ComponentFn::arc("db", |ctx: Context| async move {
//!         ctx.publish(Pool("postgres://localhost/app"))?;
//!         ctx.add_teardown_callback("close pool", || async {
//!             Ok::<(), ComponentError>(())
//!         })?;
//!         Ok::<(), ComponentError>(())
//!     });
//!     let web = ComponentFn::new("web", |ctx: Context| async move {
//!         let pool = ctx.require::<Pool>().await?;
//!         assert_eq!(pool.0, "postgres://localhost/app");
//!         Ok::<(), ComponentError>(())
//!     })
//!     .requiring(ResourceKey::of::<Pool>());
//!
//!     let root = ContainerComponent::new("app")
//!         .with_child("web", std::sync::Arc::new(web))?
//!         .with_child("db", db)?;
//!
//!     let orchestrator = Orchestrator::new(cfg);
//!     orchestrator.run(std::sync::Arc::new(root)).await?;
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
mod components;
mod config;
mod context;
mod core;
mod error;
mod events;
mod loader;
mod subscribers;

// ---- Public re-exports ----

pub use components::{
    start_component, Application, ApplicationComponent, Component, ComponentCtor, ComponentFn,
    ComponentRef, ComponentRegistry, ComponentSpec, ContainerComponent,
};
pub use config::{RuntimeConfig, MAX_BUS_CAPACITY};
pub use context::{
    is_valid_name, Context, ContextId, ContextState, ResourceKey, Resources, TeardownCause,
    DEFAULT_NAME,
};
pub use core::{
    wait_for_shutdown_signal, LifecycleState, Orchestrator, OrchestratorBuilder, ShutdownSignal,
    StartupTracker,
};
pub use error::{
    BoxError, ComponentError, ConfigError, ContextError, RuntimeError, TeardownError,
    TeardownFailure,
};
pub use events::{Bus, Event, EventKind};
pub use loader::{merge_config, AppConfig, ConfigLoader, DEFAULT_SERVICE, SERVICE_ENV};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: expose a built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
