//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out and the
//! built-in [`LogWriter`] (feature `logging`).
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   Context / Orchestrator ── publish(Event) ──► Bus ──► subscriber_listener
//!                                                            │
//!                                                            ├──► StartupTracker
//!                                                            └──► SubscriberSet::emit
//!                                                                     │
//!                                                          ┌──────────┼──────────┐
//!                                                          ▼          ▼          ▼
//!                                                      LogWriter   Metrics    Custom
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
