//! Coordinator configuration
//!
//! Intervals are stored as integer milliseconds so configurations stay
//! serde-friendly; accessors convert to [`Duration`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy applied when a logical node's phase fails
///
/// A logical node failure consumes one attempt. While attempts remain the
/// node re-arms at the `Resource` phase; once exhausted, `Failed` is
/// terminal. `max_attempts = 1` therefore means "fail on first error".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed per logical node (minimum 1)
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 1 }
    }
}

/// Tunable parameters for the coordinator actor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Period of the internal refresh tick driving promotion, assignment,
    /// and timeout enforcement
    pub refresh_interval_ms: u64,

    /// Wall-clock deadline armed on a session entering the Resource,
    /// Prepare, or Execute state; firing is equivalent to a session error
    pub phase_timeout_ms: u64,

    /// Retry policy for failed logical nodes
    pub retry: RetryPolicy,

    /// Capacity of each lifecycle event subscriber queue
    pub event_queue_capacity: usize,

    /// Whether sessions idling in Wait with no assignable work are closed
    pub autoclose_idle: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 1_000,
            phase_timeout_ms: 60_000,
            retry: RetryPolicy::default(),
            event_queue_capacity: 256,
            autoclose_idle: false,
        }
    }
}

impl CoordinatorConfig {
    /// Refresh tick period
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Per-phase session deadline
    pub fn phase_timeout(&self) -> Duration {
        Duration::from_millis(self.phase_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CoordinatorConfig::default();
        assert!(config.refresh_interval() < config.phase_timeout());
        assert_eq!(config.retry.max_attempts, 1);
        assert!(config.event_queue_capacity > 0);
        assert!(!config.autoclose_idle);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = CoordinatorConfig {
            refresh_interval_ms: 50,
            phase_timeout_ms: 500,
            retry: RetryPolicy { max_attempts: 3 },
            event_queue_capacity: 16,
            autoclose_idle: true,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: CoordinatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.retry, config.retry);
        assert_eq!(back.phase_timeout_ms, 500);
        assert!(back.autoclose_idle);
    }
}
