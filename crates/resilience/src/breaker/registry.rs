//! Factory and admin surface for per-provider breakers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::warn;

use taskward_core::{Clock, ProviderId, SystemClock};
use taskward_store::StateStore;

use super::circuit::{CircuitBreaker, STATE_KEY_PREFIX};
use super::types::{CircuitBreakerConfig, CircuitBreakerStats};

/// Hands out one [`CircuitBreaker`] per provider, all sharing the same
/// store, clock, and config.
///
/// Constructed once at process start and passed by reference to whatever
/// dispatches provider calls; the local cache only avoids re-allocating
/// breaker handles; the authoritative state is in the store.
pub struct CircuitBreakerRegistry {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<ProviderId, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(store: Arc<dyn StateStore>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn StateStore>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// The breaker for a provider, creating it on first use.
    pub fn breaker(&self, provider: &ProviderId) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().unwrap().get(provider) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write().unwrap();
        breakers
            .entry(provider.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_clock(
                    provider.clone(),
                    self.store.clone(),
                    self.config.clone(),
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    /// Stats for every provider with persisted breaker state, including
    /// providers first seen by other worker processes.
    pub fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        let providers = match self.store.scan_keys(&format!("{STATE_KEY_PREFIX}:*")) {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|key| {
                    key.strip_prefix(&format!("{STATE_KEY_PREFIX}:"))
                        .map(ProviderId::from)
                })
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!(error = %e, "state store unavailable, reporting locally known breakers only");
                self.breakers.read().unwrap().keys().cloned().collect()
            }
        };

        let mut stats: Vec<CircuitBreakerStats> = providers
            .iter()
            .map(|provider| self.breaker(provider).stats())
            .collect();
        stats.sort_by(|a, b| a.provider.as_str().cmp(b.provider.as_str()));
        stats
    }

    /// Administrative reset of one provider's circuit.
    pub fn reset(&self, provider: &ProviderId) -> bool {
        self.breaker(provider).reset()
    }

    /// Administrative force-open of one provider's circuit.
    pub fn force_open(&self, provider: &ProviderId) -> bool {
        self.breaker(provider).force_open()
    }

    /// Administrative force-close of one provider's circuit.
    pub fn force_close(&self, provider: &ProviderId) -> bool {
        self.breaker(provider).force_close()
    }

    /// Wipe every provider's persisted breaker state. Returns how many
    /// keys were removed, 0 if the store was unreachable.
    pub fn reset_all(&self) -> u64 {
        match self.store.delete_pattern("taskward:breaker:*") {
            Ok(removed) => {
                warn!(removed, "all circuit breaker state wiped");
                removed
            }
            Err(e) => {
                warn!(error = %e, "state store unavailable, reset_all skipped");
                0
            }
        }
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use taskward_core::ManualClock;
    use taskward_store::InMemoryStateStore;

    use crate::breaker::CircuitState;

    fn registry_on(store: Arc<InMemoryStateStore>, clock: Arc<ManualClock>) -> CircuitBreakerRegistry {
        let config = CircuitBreakerConfig::default().with_failure_threshold(2);
        CircuitBreakerRegistry::with_clock(store, config, clock)
    }

    #[test]
    fn returns_same_breaker_instance_per_provider() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryStateStore::with_clock(clock.clone()));
        let registry = registry_on(store, clock);

        let a = registry.breaker(&ProviderId::new("openai"));
        let b = registry.breaker(&ProviderId::new("openai"));
        let c = registry.breaker(&ProviderId::new("gemini"));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn all_stats_sees_breakers_from_other_processes() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryStateStore::with_clock(clock.clone()));

        // "another worker" trips a breaker through its own registry
        let other = registry_on(store.clone(), clock.clone());
        let breaker = other.breaker(&ProviderId::new("gemini"));
        breaker.record_failure("down");
        breaker.record_failure("down");

        let registry = registry_on(store, clock);
        let stats = registry.all_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].provider, ProviderId::new("gemini"));
        assert_eq!(stats[0].state, CircuitState::Open);
    }

    #[test]
    fn admin_passthroughs_reach_the_circuit() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryStateStore::with_clock(clock.clone()));
        let registry = registry_on(store, clock.clone());
        let provider = ProviderId::new("openai");

        assert!(registry.force_open(&provider));
        assert!(!registry.breaker(&provider).is_call_allowed());

        assert!(registry.force_close(&provider));
        assert!(registry.breaker(&provider).is_call_allowed());

        clock.advance(Duration::from_secs(1));
        assert!(registry.reset(&provider));
        assert_eq!(registry.all_stats().len(), 0);
    }

    #[test]
    fn reset_all_wipes_every_provider() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryStateStore::with_clock(clock.clone()));
        let registry = registry_on(store, clock);

        registry.breaker(&ProviderId::new("openai")).record_failure("x");
        registry.breaker(&ProviderId::new("gemini")).record_failure("x");
        assert_eq!(registry.all_stats().len(), 2);

        // state blob + failure window per provider
        assert_eq!(registry.reset_all(), 4);
        assert!(registry.all_stats().is_empty());
    }
}
