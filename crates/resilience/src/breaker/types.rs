//! Circuit breaker types and configuration.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskward_core::ProviderId;

/// Availability state of one provider's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// All calls allowed.
    Closed,
    /// Calls rejected until the recovery timeout elapses.
    Open,
    /// Probe calls allowed to test recovery.
    HalfOpen,
}

impl CircuitState {
    /// Stable lowercase name, used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl core::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within `failure_window` that trip the circuit.
    pub failure_threshold: u32,
    /// Trailing window over which failures are counted.
    pub failure_window: Duration,
    /// How long an open circuit waits before allowing probes.
    pub recovery_timeout: Duration,
    /// Successful probes required to close a half-open circuit.
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(30),
            half_open_success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_failure_window(mut self, window: Duration) -> Self {
        self.failure_window = window;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_half_open_success_threshold(mut self, threshold: u32) -> Self {
        self.half_open_success_threshold = threshold;
        self
    }
}

/// The persisted per-provider record.
///
/// Stored as one JSON string; read, mutated in memory, and written back as a
/// whole (not atomic across the round trip; see [`super::CircuitBreaker`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BreakerRecord {
    pub state: CircuitState,
    /// Failures observed in the current window (Closed) or since the last
    /// transition (informational).
    pub failure_count: u32,
    /// Successful probes in the current HalfOpen period.
    pub success_count: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub opened_at: Option<DateTime<Utc>>,
    pub half_opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

impl BreakerRecord {
    /// A fresh record: closed as of `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_failures: 0,
            total_successes: 0,
            opened_at: None,
            half_opened_at: None,
            closed_at: Some(now),
            last_failure: None,
            last_success: None,
        }
    }

    /// When the current state was entered (best effort).
    pub fn state_entered_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            CircuitState::Closed => self.closed_at,
            CircuitState::Open => self.opened_at,
            CircuitState::HalfOpen => self.half_opened_at,
        }
    }
}

/// Snapshot returned to monitoring/admin callers.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub provider: ProviderId,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    /// Lifetime successes / (successes + failures); 1.0 with no data.
    pub success_rate: f64,
    /// Seconds spent in the current state.
    pub seconds_in_state: i64,
    pub opened_at: Option<DateTime<Utc>>,
    pub half_opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_and_builders() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(3)
            .with_recovery_timeout(Duration::from_secs(10));

        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.recovery_timeout, Duration::from_secs(10));
        assert_eq!(config.failure_window, Duration::from_secs(60));
        assert_eq!(config.half_open_success_threshold, 2);
    }

    #[test]
    fn record_round_trips_through_json() {
        let now = Utc::now();
        let mut record = BreakerRecord::new(now);
        record.state = CircuitState::Open;
        record.opened_at = Some(now);
        record.total_failures = 7;

        let raw = serde_json::to_string(&record).unwrap();
        let back: BreakerRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.state, CircuitState::Open);
        assert_eq!(back.total_failures, 7);
        assert_eq!(back.opened_at, Some(now));
    }

    #[test]
    fn state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&CircuitState::HalfOpen).unwrap(),
            "\"half_open\""
        );
    }
}
