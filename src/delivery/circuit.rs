//! Per-webhook circuit breakers
//!
//! One breaker per webhook id, created lazily on first use and kept for the
//! process lifetime. The state machine is deliberately small: a run of
//! consecutive failures opens the circuit, an open circuit short-circuits
//! every send until the cool-down elapses, and the first probe after
//! cool-down decides whether to close or reopen.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::constants::circuit as consts;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Cool-down before an open circuit lets one probe through.
    #[serde(with = "humantime_secs")]
    pub open_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: consts::DEFAULT_FAILURE_THRESHOLD,
            open_timeout: Duration::from_secs(consts::DEFAULT_OPEN_TIMEOUT_SECS),
        }
    }
}

/// Serializes the cool-down as whole seconds in config files.
mod humantime_secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    /// True while a half-open probe is in flight.
    probe_in_flight: bool,
}

impl CircuitStats {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Thread-safe registry of per-webhook circuit breakers.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    config: CircuitConfig,
    circuits: Mutex<HashMap<String, CircuitStats>>,
}

impl CircuitBreakerManager {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Gate check before a send. An open circuit whose cool-down has elapsed
    /// moves to half-open and admits exactly one probe; concurrent callers
    /// are blocked until the probe reports its outcome.
    pub async fn should_allow_request(&self, webhook_id: &str) -> bool {
        let mut circuits = self.circuits.lock().await;
        let stats = circuits
            .entry(webhook_id.to_string())
            .or_insert_with(CircuitStats::new);

        match stats.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = stats
                    .opened_at
                    .map(|t| t.elapsed() >= self.config.open_timeout)
                    .unwrap_or(true);
                if cooled_down {
                    info!("Circuit for webhook '{webhook_id}' half-open, probing");
                    stats.state = CircuitState::HalfOpen;
                    stats.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if stats.probe_in_flight {
                    false
                } else {
                    stats.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Success closes a half-open circuit and clears the failure run.
    pub async fn record_success(&self, webhook_id: &str) {
        let mut circuits = self.circuits.lock().await;
        let stats = circuits
            .entry(webhook_id.to_string())
            .or_insert_with(CircuitStats::new);

        stats.consecutive_failures = 0;
        stats.probe_in_flight = false;
        if stats.state != CircuitState::Closed {
            info!("Circuit for webhook '{webhook_id}' closed");
            stats.state = CircuitState::Closed;
            stats.opened_at = None;
        }
    }

    /// Failure extends the run; at the threshold (or on a failed probe) the
    /// circuit opens and the cool-down restarts.
    pub async fn record_failure(&self, webhook_id: &str) {
        let mut circuits = self.circuits.lock().await;
        let stats = circuits
            .entry(webhook_id.to_string())
            .or_insert_with(CircuitStats::new);

        stats.consecutive_failures += 1;
        stats.probe_in_flight = false;

        let should_open = match stats.state {
            CircuitState::Closed => stats.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if should_open {
            warn!(
                "Circuit for webhook '{webhook_id}' opened after {} consecutive failures",
                stats.consecutive_failures
            );
            stats.state = CircuitState::Open;
            stats.opened_at = Some(Instant::now());
        }
    }

    pub async fn state(&self, webhook_id: &str) -> CircuitState {
        let circuits = self.circuits.lock().await;
        circuits
            .get(webhook_id)
            .map(|s| s.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub async fn stats(&self, webhook_id: &str) -> Option<CircuitStats> {
        self.circuits.lock().await.get(webhook_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(threshold: u32, timeout_ms: u64) -> CircuitBreakerManager {
        CircuitBreakerManager::new(CircuitConfig {
            failure_threshold: threshold,
            open_timeout: Duration::from_millis(timeout_ms),
        })
    }

    #[tokio::test]
    async fn unknown_webhook_starts_closed() {
        let mgr = manager(3, 1000);
        assert!(mgr.should_allow_request("wh").await);
        assert_eq!(mgr.state("wh").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let mgr = manager(3, 60_000);
        for _ in 0..2 {
            mgr.record_failure("wh").await;
        }
        assert_eq!(mgr.state("wh").await, CircuitState::Closed);

        mgr.record_failure("wh").await;
        assert_eq!(mgr.state("wh").await, CircuitState::Open);
        assert!(!mgr.should_allow_request("wh").await);
    }

    #[tokio::test]
    async fn success_resets_the_failure_run() {
        let mgr = manager(3, 60_000);
        mgr.record_failure("wh").await;
        mgr.record_failure("wh").await;
        mgr.record_success("wh").await;
        mgr.record_failure("wh").await;
        mgr.record_failure("wh").await;
        assert_eq!(mgr.state("wh").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_admits_a_single_probe() {
        let mgr = manager(1, 10);
        mgr.record_failure("wh").await;
        assert_eq!(mgr.state("wh").await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(mgr.should_allow_request("wh").await);
        assert_eq!(mgr.state("wh").await, CircuitState::HalfOpen);
        // Second caller is held back while the probe is in flight.
        assert!(!mgr.should_allow_request("wh").await);
    }

    #[tokio::test]
    async fn probe_success_closes_probe_failure_reopens() {
        let mgr = manager(1, 10);
        mgr.record_failure("wh").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(mgr.should_allow_request("wh").await);
        mgr.record_success("wh").await;
        assert_eq!(mgr.state("wh").await, CircuitState::Closed);
        assert_eq!(mgr.stats("wh").await.unwrap().consecutive_failures, 0);

        mgr.record_failure("wh").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(mgr.should_allow_request("wh").await);
        mgr.record_failure("wh").await;
        assert_eq!(mgr.state("wh").await, CircuitState::Open);
    }

    #[tokio::test]
    async fn breakers_are_independent_per_webhook() {
        let mgr = manager(1, 60_000);
        mgr.record_failure("a").await;
        assert_eq!(mgr.state("a").await, CircuitState::Open);
        assert_eq!(mgr.state("b").await, CircuitState::Closed);
        assert!(mgr.should_allow_request("b").await);
    }
}
