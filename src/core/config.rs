//! # Runtime configuration.
//!
//! Provides [`ConnectorConfig`] (dial retry policy) and [`SupervisorConfig`]
//! (everything the supervisor loop needs). Both are plain values: build them
//! once, hand them to [`Supervisor::builder`](crate::Supervisor::builder), and
//! they are never mutated afterwards.
//!
//! ## Sentinel values
//! - `max_attempts = 0` → treated as 1 (a dial is always attempted once)
//! - `grace = 0s` → generation tasks are aborted immediately on teardown
//! - `bus_capacity = 0` → treated as 1

use std::time::Duration;

/// Dial retry policy.
///
/// The connector dials up to `max_attempts` times and sleeps `delay` between
/// attempts (never after the last one). No backoff, no jitter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// Number of dial attempts before giving up.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
}

impl ConnectorConfig {
    /// Returns the attempt count clamped to a minimum of 1.
    #[inline]
    pub fn attempts_clamped(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for ConnectorConfig {
    /// `max_attempts = 5`, `delay = 2s`.
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

/// Configuration of the supervisor loop.
///
/// ## Field semantics
/// - `connector`: dial retry policy used at the start of every generation
/// - `grace`: maximum wait for a generation's tasks to stop after its token is
///   cancelled; stragglers are aborted and `GraceExceeded` is published
/// - `bus_capacity`: event bus ring buffer size (min 1)
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Dial retry policy.
    pub connector: ConnectorConfig,

    /// Maximum time to wait for generation tasks to stop during teardown.
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Subscribers lagging behind more than `bus_capacity` events skip older items.
    pub bus_capacity: usize,
}

impl SupervisorConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for SupervisorConfig {
    /// Default configuration:
    ///
    /// - `connector = ConnectorConfig::default()` (5 attempts, 2s apart)
    /// - `grace = 10s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            connector: ConnectorConfig::default(),
            grace: Duration::from_secs(10),
            bus_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_clamps() {
        let cfg = SupervisorConfig::default();
        assert_eq!(cfg.connector.max_attempts, 5);
        assert_eq!(cfg.connector.delay, Duration::from_secs(2));
        assert_eq!(cfg.grace, Duration::from_secs(10));

        let zero = SupervisorConfig {
            connector: ConnectorConfig {
                max_attempts: 0,
                delay: Duration::ZERO,
            },
            grace: Duration::ZERO,
            bus_capacity: 0,
        };
        assert_eq!(zero.connector.attempts_clamped(), 1);
        assert_eq!(zero.bus_capacity_clamped(), 1);
    }
}
