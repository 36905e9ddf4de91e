//! Reconnect policy and connection lifecycle states
//!
//! Modeled as an explicit state machine so the backoff and give-up schedule
//! can be tested without timers or sockets.

use std::time::Duration;

use crate::constants::connection;

/// Lifecycle of the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Exponential reconnect backoff: base delay doubling per attempt, capped,
/// abandoned after a fixed number of consecutive attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(connection::RECONNECT_BASE_DELAY_SECS),
            max_delay: Duration::from_secs(connection::RECONNECT_MAX_DELAY_SECS),
            max_attempts: connection::RECONNECT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based reconnect attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(shift));
        delay.min(self.max_delay)
    }

    /// True once the attempt counter has exhausted the budget.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_one_second() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
    }

    #[test]
    fn backoff_caps_at_thirty_seconds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(60), Duration::from_secs(30));
    }

    #[test]
    fn gives_up_after_five_attempts() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.exhausted(4));
        assert!(policy.exhausted(5));
        assert!(policy.exhausted(6));
    }

    #[test]
    fn custom_policy_shapes_schedule() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            max_attempts: 3,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert!(policy.exhausted(3));
    }
}
