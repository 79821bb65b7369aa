//! # Components and their instantiation.
//!
//! - [`Component`]: trait for units of startup logic
//! - [`ComponentFn`]: function-backed component
//! - [`ComponentRef`]: shared handle (`Arc<dyn Component>`)
//! - [`ContainerComponent`]: starts child components concurrently in one context
//! - [`ApplicationComponent`]: container plus an [`Application`] whose result is the exit code
//! - [`ComponentSpec`]: declarative description read from configuration
//! - [`ComponentRegistry`]: type identifier → constructor table
//! - [`start_component`]: waits for requirements, runs `start`, publishes events

mod application;
mod component;
mod component_fn;
mod container;
mod registry;
mod spec;
mod starter;

pub use application::{Application, ApplicationComponent};
pub use component::{Component, ComponentRef};
pub use component_fn::ComponentFn;
pub use container::ContainerComponent;
pub use registry::{ComponentCtor, ComponentRegistry};
pub use spec::ComponentSpec;
pub use starter::start_component;
