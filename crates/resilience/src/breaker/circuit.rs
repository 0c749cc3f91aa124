//! The circuit breaker itself.

use std::sync::Arc;

use tracing::{debug, info, warn};

use taskward_core::{Clock, ProviderId, SystemClock};
use taskward_store::{StateStore, StoreError};

use super::types::{BreakerRecord, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};

pub(crate) const STATE_KEY_PREFIX: &str = "taskward:breaker:state";
const FAILURES_KEY_PREFIX: &str = "taskward:breaker:failures";

/// Circuit breaker for one provider.
///
/// The failure window rides on atomic sorted-set commands, so the open/close
/// decision is sound under concurrent workers. The stats record, however, is
/// a composite JSON blob read, mutated in memory, and written back across
/// separate store round trips: two workers recording outcomes at the same
/// instant can clobber each other's counter update. This approximation is
/// accepted: the counters are informational, and exact accounting would
/// require multi-key transactions this layer deliberately avoids.
pub struct CircuitBreaker {
    provider: ProviderId,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    config: CircuitBreakerConfig,
    state_key: String,
    failures_key: String,
}

impl CircuitBreaker {
    pub fn new(
        provider: ProviderId,
        store: Arc<dyn StateStore>,
        config: CircuitBreakerConfig,
    ) -> Self {
        Self::with_clock(provider, store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        provider: ProviderId,
        store: Arc<dyn StateStore>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state_key = format!("{STATE_KEY_PREFIX}:{provider}");
        let failures_key = format!("{FAILURES_KEY_PREFIX}:{provider}");
        Self {
            provider,
            store,
            clock,
            config,
            state_key,
            failures_key,
        }
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// Whether a call to the provider may be dispatched right now.
    ///
    /// Observing an expired recovery timeout transitions Open → HalfOpen and
    /// persists the transition, so the first caller past the timeout lets
    /// probes through everywhere.
    pub fn is_call_allowed(&self) -> bool {
        match self.check_call_allowed() {
            Ok(allowed) => allowed,
            Err(e) => self.allow_on_store_error("is_call_allowed", &e),
        }
    }

    /// Report a successful provider call.
    pub fn record_success(&self) {
        if let Err(e) = self.try_record_success() {
            self.skip_on_store_error("record_success", &e);
        }
    }

    /// Report a failed provider call.
    pub fn record_failure(&self, error: &str) {
        if let Err(e) = self.try_record_failure(error) {
            self.skip_on_store_error("record_failure", &e);
        }
    }

    /// Administrative override: open the circuit regardless of counters.
    pub fn force_open(&self) -> bool {
        let result = self.mutate_record(|record, now| {
            record.state = CircuitState::Open;
            record.opened_at = Some(now);
            record.success_count = 0;
        });
        match result {
            Ok(()) => {
                warn!(provider = %self.provider, "circuit force-opened");
                true
            }
            Err(e) => {
                self.skip_on_store_error("force_open", &e);
                false
            }
        }
    }

    /// Administrative override: close the circuit and forget window state.
    pub fn force_close(&self) -> bool {
        let result = self.mutate_record(|record, now| {
            record.state = CircuitState::Closed;
            record.closed_at = Some(now);
            record.failure_count = 0;
            record.success_count = 0;
        });
        match result {
            Ok(()) => {
                let _ = self.store.delete(&self.failures_key);
                info!(provider = %self.provider, "circuit force-closed");
                true
            }
            Err(e) => {
                self.skip_on_store_error("force_close", &e);
                false
            }
        }
    }

    /// Drop all persisted state for this provider, returning it to a fresh
    /// closed circuit.
    pub fn reset(&self) -> bool {
        let wiped = self
            .store
            .delete(&self.state_key)
            .and_then(|_| self.store.delete(&self.failures_key));
        match wiped {
            Ok(_) => {
                info!(provider = %self.provider, "circuit reset");
                true
            }
            Err(e) => {
                self.skip_on_store_error("reset", &e);
                false
            }
        }
    }

    /// Current snapshot for monitoring.
    ///
    /// Refreshes the state first (an expired recovery timeout shows up as
    /// HalfOpen, not a stale Open), then reads the record.
    pub fn stats(&self) -> CircuitBreakerStats {
        let _ = self.is_call_allowed();

        let now = self.clock.now();
        let record = match self.load_record() {
            Ok(record) => record.unwrap_or_else(|| BreakerRecord::new(now)),
            Err(e) => {
                self.skip_on_store_error("stats", &e);
                BreakerRecord::new(now)
            }
        };

        let attempts = record.total_successes + record.total_failures;
        let success_rate = if attempts == 0 {
            1.0
        } else {
            record.total_successes as f64 / attempts as f64
        };
        let seconds_in_state = record
            .state_entered_at()
            .map(|at| (now - at).num_seconds().max(0))
            .unwrap_or(0);

        CircuitBreakerStats {
            provider: self.provider.clone(),
            state: record.state,
            failure_count: record.failure_count,
            success_count: record.success_count,
            total_failures: record.total_failures,
            total_successes: record.total_successes,
            success_rate,
            seconds_in_state,
            opened_at: record.opened_at,
            half_opened_at: record.half_opened_at,
            closed_at: record.closed_at,
            last_failure: record.last_failure,
            last_success: record.last_success,
        }
    }

    // -- named degradation paths ------------------------------------------

    /// Fail open: with the store unreachable, the protected call path wins
    /// over breaker correctness.
    fn allow_on_store_error(&self, op: &str, err: &StoreError) -> bool {
        warn!(
            provider = %self.provider,
            op,
            error = %err,
            "state store unavailable, assuming provider available"
        );
        true
    }

    /// Fail silent: bookkeeping is dropped, never surfaced to the caller.
    fn skip_on_store_error(&self, op: &str, err: &StoreError) {
        warn!(
            provider = %self.provider,
            op,
            error = %err,
            "state store unavailable, skipping circuit bookkeeping"
        );
    }

    // -- internals ---------------------------------------------------------

    fn check_call_allowed(&self) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut record = self
            .load_record()?
            .unwrap_or_else(|| BreakerRecord::new(now));

        match record.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(true),
            CircuitState::Open => {
                let opened_at = record.opened_at.unwrap_or(now);
                let elapsed = (now - opened_at).to_std().unwrap_or_default();
                if elapsed >= self.config.recovery_timeout {
                    record.state = CircuitState::HalfOpen;
                    record.half_opened_at = Some(now);
                    record.success_count = 0;
                    self.save_record(&record)?;
                    debug!(provider = %self.provider, "recovery timeout elapsed, circuit half-open");
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    fn try_record_success(&self) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut record = self
            .load_record()?
            .unwrap_or_else(|| BreakerRecord::new(now));

        record.total_successes += 1;
        record.last_success = Some(now);

        match record.state {
            CircuitState::Closed => {
                record.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                record.success_count += 1;
                if record.success_count >= self.config.half_open_success_threshold {
                    record.state = CircuitState::Closed;
                    record.closed_at = Some(now);
                    record.failure_count = 0;
                    record.success_count = 0;
                    self.store.delete(&self.failures_key)?;
                    info!(provider = %self.provider, "probes succeeded, circuit closed");
                }
            }
            // A call admitted before the circuit opened may report late.
            CircuitState::Open => {}
        }

        self.save_record(&record)
    }

    fn try_record_failure(&self, error: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        let now_secs = self.clock.epoch_secs();

        // Trailing window: append, prune, recount. These are individually
        // atomic commands, so the count is sound under concurrent workers.
        let member = format!("{now_secs:.6}:{}", uuid::Uuid::now_v7());
        self.store.zadd(&self.failures_key, &member, now_secs)?;
        let window_start = now_secs - self.config.failure_window.as_secs_f64();
        self.store.zrem_range_by_score(
            &self.failures_key,
            f64::NEG_INFINITY,
            window_start,
        )?;
        self.store
            .expire(&self.failures_key, self.config.failure_window * 2)?;
        let in_window = self.store.zcard(&self.failures_key)? as u32;

        let mut record = self
            .load_record()?
            .unwrap_or_else(|| BreakerRecord::new(now));
        record.total_failures += 1;
        record.last_failure = Some(now);
        record.failure_count = in_window;

        match record.state {
            CircuitState::Closed => {
                if in_window >= self.config.failure_threshold {
                    record.state = CircuitState::Open;
                    record.opened_at = Some(now);
                    record.success_count = 0;
                    warn!(
                        provider = %self.provider,
                        failures_in_window = in_window,
                        error,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                record.state = CircuitState::Open;
                record.opened_at = Some(now);
                record.success_count = 0;
                warn!(provider = %self.provider, error, "probe failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }

        self.save_record(&record)
    }

    fn mutate_record(
        &self,
        f: impl FnOnce(&mut BreakerRecord, chrono::DateTime<chrono::Utc>),
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut record = self
            .load_record()?
            .unwrap_or_else(|| BreakerRecord::new(now));
        f(&mut record, now);
        self.save_record(&record)
    }

    fn load_record(&self) -> Result<Option<BreakerRecord>, StoreError> {
        let Some(raw) = self.store.get(&self.state_key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(
                    provider = %self.provider,
                    error = %e,
                    "corrupt circuit breaker record, treating as absent"
                );
                Ok(None)
            }
        }
    }

    fn save_record(&self, record: &BreakerRecord) -> Result<(), StoreError> {
        let raw = serde_json::to_string(record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.set(&self.state_key, &raw, None)
    }

    #[cfg(test)]
    pub(crate) fn current_state(&self) -> CircuitState {
        self.load_record()
            .ok()
            .flatten()
            .map(|r| r.state)
            .unwrap_or(CircuitState::Closed)
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("provider", &self.provider)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use taskward_core::ManualClock;
    use taskward_store::{InMemoryStateStore, StateStore, UnavailableStateStore};

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
            .with_failure_threshold(3)
            .with_failure_window(Duration::from_secs(60))
            .with_recovery_timeout(Duration::from_secs(30))
            .with_half_open_success_threshold(2)
    }

    fn breaker() -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryStateStore::with_clock(clock.clone()));
        let breaker = CircuitBreaker::with_clock(
            ProviderId::new("openai"),
            store,
            test_config(),
            clock.clone(),
        );
        (breaker, clock)
    }

    #[test]
    fn opens_after_threshold_failures_within_window() {
        let (breaker, _clock) = breaker();

        breaker.record_failure("timeout");
        breaker.record_failure("timeout");
        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert!(breaker.is_call_allowed());

        breaker.record_failure("timeout");
        assert_eq!(breaker.current_state(), CircuitState::Open);
        assert!(!breaker.is_call_allowed());
    }

    #[test]
    fn stays_closed_below_threshold() {
        let (breaker, _clock) = breaker();

        for _ in 0..2 {
            breaker.record_failure("boom");
        }
        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert!(breaker.is_call_allowed());
    }

    #[test]
    fn failures_outside_window_do_not_count() {
        let (breaker, clock) = breaker();

        breaker.record_failure("a");
        breaker.record_failure("b");
        // the first two fall out of the 60s window
        clock.advance(Duration::from_secs(61));
        breaker.record_failure("c");

        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[test]
    fn half_opens_after_recovery_timeout() {
        let (breaker, clock) = breaker();
        for _ in 0..3 {
            breaker.record_failure("down");
        }
        assert!(!breaker.is_call_allowed());

        clock.advance(Duration::from_secs(31));
        assert!(breaker.is_call_allowed());
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);
    }

    #[test]
    fn probe_failure_reopens() {
        let (breaker, clock) = breaker();
        for _ in 0..3 {
            breaker.record_failure("down");
        }
        clock.advance(Duration::from_secs(31));
        assert!(breaker.is_call_allowed());

        breaker.record_failure("still down");
        assert_eq!(breaker.current_state(), CircuitState::Open);
        assert!(!breaker.is_call_allowed());
    }

    #[test]
    fn probe_successes_close_the_circuit() {
        let (breaker, clock) = breaker();
        for _ in 0..3 {
            breaker.record_failure("down");
        }
        clock.advance(Duration::from_secs(31));
        assert!(breaker.is_call_allowed());

        breaker.record_success();
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.current_state(), CircuitState::Closed);

        let stats = breaker.stats();
        assert_eq!(stats.failure_count, 0);
        assert!(breaker.is_call_allowed());
    }

    #[test]
    fn success_in_closed_state_resets_failure_count() {
        let (breaker, _clock) = breaker();
        breaker.record_failure("x");
        breaker.record_failure("x");
        breaker.record_success();

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.total_failures, 2);
        assert_eq!(stats.total_successes, 1);
    }

    #[test]
    fn forced_transitions_bypass_counters() {
        let (breaker, _clock) = breaker();

        assert!(breaker.force_open());
        assert!(!breaker.is_call_allowed());

        assert!(breaker.force_close());
        assert!(breaker.is_call_allowed());
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[test]
    fn reset_wipes_all_state() {
        let (breaker, _clock) = breaker();
        for _ in 0..3 {
            breaker.record_failure("down");
        }
        assert!(breaker.reset());

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.total_failures, 0);
        assert!(breaker.is_call_allowed());
    }

    #[test]
    fn stats_reflects_recovery_timeout() {
        let (breaker, clock) = breaker();
        for _ in 0..3 {
            breaker.record_failure("down");
        }
        assert_eq!(breaker.stats().state, CircuitState::Open);

        clock.advance(Duration::from_secs(31));
        // stats() itself observes the elapsed timeout
        assert_eq!(breaker.stats().state, CircuitState::HalfOpen);
    }

    #[test]
    fn success_rate_defaults_to_one() {
        let (breaker, _clock) = breaker();
        let stats = breaker.stats();
        assert_eq!(stats.success_rate, 1.0);

        breaker.record_success();
        breaker.record_failure("x");
        let stats = breaker.stats();
        assert!((stats.success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn store_outage_fails_open() {
        let breaker = CircuitBreaker::new(
            ProviderId::new("openai"),
            Arc::new(UnavailableStateStore),
            test_config(),
        );

        assert!(breaker.is_call_allowed());
        breaker.record_failure("down");
        breaker.record_success();
        assert!(!breaker.force_open());
        assert!(!breaker.reset());
        assert!(breaker.is_call_allowed());

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.success_rate, 1.0);
    }

    #[test]
    fn corrupt_record_treated_as_absent() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryStateStore::with_clock(clock.clone()));
        store
            .set("taskward:breaker:state:openai", "{not json", None)
            .unwrap();

        let breaker = CircuitBreaker::with_clock(
            ProviderId::new("openai"),
            store,
            test_config(),
            clock,
        );
        assert!(breaker.is_call_allowed());
        assert_eq!(breaker.stats().state, CircuitState::Closed);
    }
}
