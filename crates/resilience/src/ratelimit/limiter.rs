//! The rate limiter: blocking, whitelist, strategy dispatch, violations.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use taskward_core::{Clock, Identifier, SystemClock};
use taskward_store::{StateStore, StoreError};

use super::endpoint::normalize_endpoint;
use super::strategies::{check_fixed_window, check_sliding_window, check_token_bucket};
use super::types::{
    ActiveBlock, RateLimitConfig, RateLimitDecision, RateLimitStatistics, RateLimitStrategy,
    ViolationRecord,
};

const KEY_PREFIX: &str = "taskward:ratelimit";

/// Admission control for one shared store.
///
/// Construct once at process start and share; all state lives in the store,
/// so any number of worker processes converge on the same counts.
pub struct RateLimiter {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn StateStore>, config: RateLimitConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn StateStore>,
        config: RateLimitConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Check admission using the configured default strategy.
    pub fn check(&self, identifier: &Identifier, endpoint: &str) -> RateLimitDecision {
        self.check_with_strategy(identifier, endpoint, self.config.default_strategy)
    }

    /// Check admission with an explicit strategy.
    ///
    /// Order matters: whitelist, then active block, then quota. A blocked
    /// identifier fails regardless of remaining quota; a whitelisted one
    /// passes regardless of everything.
    pub fn check_with_strategy(
        &self,
        identifier: &Identifier,
        endpoint: &str,
        strategy: RateLimitStrategy,
    ) -> RateLimitDecision {
        let now = self.clock.now();

        if self.config.whitelist.contains(identifier) {
            return RateLimitDecision::unlimited(now);
        }

        let category = normalize_endpoint(endpoint);
        let rule = self.config.rule_for(&category);

        match self.blocked_until(identifier) {
            Ok(Some(until)) if until > now => {
                let retry = (until - now).to_std().unwrap_or_default();
                return RateLimitDecision {
                    allowed: false,
                    limit: rule.limit,
                    remaining: 0,
                    reset_at: until,
                    retry_after: Some(retry),
                };
            }
            Ok(_) => {}
            Err(e) => return self.allow_on_store_error(identifier, &e),
        }

        let key = self.quota_key(strategy, identifier, &category);
        let outcome = match strategy {
            RateLimitStrategy::FixedWindow => {
                check_fixed_window(self.store.as_ref(), self.clock.as_ref(), &key, rule)
            }
            RateLimitStrategy::SlidingWindow => {
                check_sliding_window(self.store.as_ref(), self.clock.as_ref(), &key, rule)
            }
            RateLimitStrategy::TokenBucket => {
                check_token_bucket(self.store.as_ref(), self.clock.as_ref(), &key, rule)
            }
        };

        match outcome {
            Ok(outcome) => {
                if !outcome.allowed {
                    debug!(
                        identifier = %identifier,
                        endpoint = %category,
                        limit = rule.limit,
                        "rate limit exceeded"
                    );
                    self.record_violation(identifier, &category, rule.limit, rule.window);
                }
                RateLimitDecision {
                    allowed: outcome.allowed,
                    limit: rule.limit,
                    remaining: outcome.remaining,
                    reset_at: outcome.reset_at,
                    retry_after: outcome.retry_after,
                }
            }
            Err(e) => self.allow_on_store_error(identifier, &e),
        }
    }

    /// Lift a block and forget the identifier's violation counter.
    pub fn unblock_identifier(&self, identifier: &Identifier) -> bool {
        let result = self
            .store
            .delete(&self.block_key(identifier))
            .and_then(|unblocked| {
                self.store.delete(&self.violations_key(identifier))?;
                Ok(unblocked)
            });
        match result {
            Ok(unblocked) => {
                if unblocked {
                    debug!(identifier = %identifier, "identifier unblocked");
                }
                unblocked
            }
            Err(e) => {
                warn!(identifier = %identifier, error = %e, "state store unavailable, unblock skipped");
                false
            }
        }
    }

    /// Admin snapshot: active blocks and live violation counters.
    pub fn statistics(&self) -> RateLimitStatistics {
        match self.try_statistics() {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "state store unavailable, rate limit statistics empty");
                RateLimitStatistics {
                    whitelist_size: self.config.whitelist.len(),
                    configured_rules: self.config.rules.len(),
                    ..RateLimitStatistics::default()
                }
            }
        }
    }

    // -- named degradation path -------------------------------------------

    /// Fail open: with the store unreachable, requests are admitted.
    fn allow_on_store_error(
        &self,
        identifier: &Identifier,
        err: &StoreError,
    ) -> RateLimitDecision {
        warn!(
            identifier = %identifier,
            error = %err,
            "state store unavailable, allowing request"
        );
        RateLimitDecision::unlimited(self.clock.now())
    }

    // -- internals ---------------------------------------------------------

    fn quota_key(
        &self,
        strategy: RateLimitStrategy,
        identifier: &Identifier,
        category: &str,
    ) -> String {
        format!(
            "{KEY_PREFIX}:{}:{}:{category}",
            strategy.as_str(),
            identifier.key_fragment()
        )
    }

    fn violations_key(&self, identifier: &Identifier) -> String {
        format!("{KEY_PREFIX}:violations:{}", identifier.key_fragment())
    }

    fn block_key(&self, identifier: &Identifier) -> String {
        format!("{KEY_PREFIX}:block:{}", identifier.key_fragment())
    }

    fn blocked_until(&self, identifier: &Identifier) -> Result<Option<DateTime<Utc>>, StoreError> {
        let Some(raw) = self.store.get(&self.block_key(identifier))? else {
            return Ok(None);
        };
        match raw.parse::<i64>() {
            Ok(epoch) => Ok(DateTime::from_timestamp(epoch, 0)),
            Err(_) => {
                warn!(identifier = %identifier, "corrupt block entry, ignoring");
                Ok(None)
            }
        }
    }

    /// Violation bookkeeping is fail-silent: the admission decision was
    /// already made, and audit must never break the request path.
    fn record_violation(
        &self,
        identifier: &Identifier,
        category: &str,
        limit: u32,
        window: Duration,
    ) {
        if let Err(e) = self.try_record_violation(identifier, category, limit, window) {
            warn!(
                identifier = %identifier,
                error = %e,
                "state store unavailable, violation not recorded"
            );
        }
    }

    fn try_record_violation(
        &self,
        identifier: &Identifier,
        category: &str,
        limit: u32,
        window: Duration,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();

        let violations_key = self.violations_key(identifier);
        let count = self.store.incr(&violations_key, 1)?;
        if count == 1 {
            self.store.expire(&violations_key, self.config.violation_ttl)?;
        }

        let blocked = count >= i64::from(self.config.violation_threshold);
        if blocked {
            let until = now + chrono::Duration::from_std(self.config.block_duration).unwrap_or_default();
            self.store.set(
                &self.block_key(identifier),
                &until.timestamp().to_string(),
                Some(self.config.block_duration),
            )?;
            warn!(
                identifier = %identifier,
                violations = count,
                blocked_until = %until,
                "identifier blocked after repeated rate limit violations"
            );
        }

        let record = ViolationRecord {
            identifier: identifier.clone(),
            endpoint: category.to_string(),
            limit,
            window,
            violation_count: count.max(0) as u32,
            blocked,
            occurred_at: now,
        };
        let raw = serde_json::to_string(&record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let record_key = format!(
            "{KEY_PREFIX}:violation:{}:{}",
            identifier.key_fragment(),
            now.timestamp_millis()
        );
        self.store
            .set(&record_key, &raw, Some(self.config.violation_record_ttl))
    }

    fn try_statistics(&self) -> Result<RateLimitStatistics, StoreError> {
        let mut active_blocks = Vec::new();
        for key in self.store.scan_keys(&format!("{KEY_PREFIX}:block:*"))? {
            let identifier = key
                .strip_prefix(&format!("{KEY_PREFIX}:block:"))
                .unwrap_or(&key)
                .to_string();
            let seconds_remaining = self
                .store
                .ttl(&key)?
                .map(|ttl| ttl.as_secs())
                .unwrap_or(0);
            active_blocks.push(ActiveBlock {
                identifier,
                seconds_remaining,
            });
        }
        active_blocks.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        let identifiers_with_violations = self
            .store
            .scan_keys(&format!("{KEY_PREFIX}:violations:*"))?
            .len() as u64;

        Ok(RateLimitStatistics {
            active_blocks,
            identifiers_with_violations,
            whitelist_size: self.config.whitelist.len(),
            configured_rules: self.config.rules.len(),
        })
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
