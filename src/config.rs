//! # Global runtime configuration.
//!
//! Provides [`RuntimeConfig`], the settings shared by the orchestrator and every context
//! of the tree it runs.
//!
//! ## Sentinel values
//! - `start_timeout = 0s` → startup may take forever
//! - `require_timeout = None` → `require` without an explicit timeout waits forever
//! - `grace = 0s` → cancelled tasks of a closing context are aborted immediately
//! - `bus_capacity = 0` → clamped to 1; values above [`MAX_BUS_CAPACITY`] are clamped to it

use std::time::Duration;

/// Largest event bus capacity; the ring buffer is allocated up front.
pub const MAX_BUS_CAPACITY: usize = 1 << 20;

/// Global configuration for the runtime.
///
/// All fields are public. Prefer the helper accessors to sprinkling sentinel checks
/// across the codebase.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeConfig {
    /// Maximum time the root component may take to start.
    ///
    /// When exceeded, startup is abandoned, the root context is torn down and
    /// `RuntimeError::StartTimeout` names the components still starting.
    pub start_timeout: Duration,

    /// Default timeout applied to `require` calls that do not pass their own.
    pub require_timeout: Option<Duration>,

    /// How long a closing context waits for its cancelled tasks before aborting them.
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,
}

impl RuntimeConfig {
    /// Returns the start timeout as an `Option` (`None` = no limit).
    #[inline]
    pub fn start_timeout_opt(&self) -> Option<Duration> {
        if self.start_timeout == Duration::ZERO {
            None
        } else {
            Some(self.start_timeout)
        }
    }

    /// Returns the global `require` timeout; a zero duration counts as "none".
    #[inline]
    pub fn require_timeout_opt(&self) -> Option<Duration> {
        self.require_timeout.filter(|d| *d > Duration::ZERO)
    }

    /// Returns the bus capacity clamped to `1..=MAX_BUS_CAPACITY`.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.clamp(1, MAX_BUS_CAPACITY)
    }
}

impl Default for RuntimeConfig {
    /// - `start_timeout = 10s`
    /// - `require_timeout = None`
    /// - `grace = 5s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(10),
            require_timeout: None,
            grace: Duration::from_secs(5),
            bus_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_map_to_none() {
        let cfg = RuntimeConfig {
            start_timeout: Duration::ZERO,
            require_timeout: Some(Duration::ZERO),
            bus_capacity: 0,
            ..RuntimeConfig::default()
        };
        assert_eq!(cfg.start_timeout_opt(), None);
        assert_eq!(cfg.require_timeout_opt(), None);
        assert_eq!(cfg.bus_capacity_clamped(), 1);

        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.start_timeout_opt(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn oversized_bus_capacity_is_clamped() {
        let cfg = RuntimeConfig {
            bus_capacity: usize::MAX,
            ..RuntimeConfig::default()
        };
        assert_eq!(cfg.bus_capacity_clamped(), MAX_BUS_CAPACITY);
    }
}
