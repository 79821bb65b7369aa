//! Runtime core: orchestration and lifecycle.
//!
//! The public API of this module is [`Orchestrator`] (built with
//! [`OrchestratorBuilder`]), which starts a component tree, tracks its lifecycle and
//! tears it down.
//!
//! Internal modules:
//! - [`orchestrator`]: startup with timeout, stop, run-until-shutdown;
//! - [`tracker`]: components still starting, used in start-timeout reports;
//! - [`state`]: lifecycle states;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod builder;
mod orchestrator;
mod shutdown;
mod state;
mod tracker;

pub use builder::OrchestratorBuilder;
pub use orchestrator::Orchestrator;
pub use shutdown::{wait_for_shutdown_signal, ShutdownSignal};
pub use state::LifecycleState;
pub use tracker::StartupTracker;
