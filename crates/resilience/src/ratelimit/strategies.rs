//! The three admission strategies.
//!
//! Each works against the shared store only through individually atomic
//! commands; none holds state in process memory. The token bucket's
//! read-refill-write of its two hash fields can race between workers (one
//! refill may be lost), which under-admits, never over-admits.

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use taskward_core::Clock;
use taskward_store::{StateStore, StoreError};

use super::types::EndpointRule;

/// What a strategy decided for one request.
#[derive(Debug, Clone)]
pub(crate) struct StrategyOutcome {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after: Option<Duration>,
}

fn from_std(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_default()
}

/// Fixed window: one counter per window, TTL set on the first increment.
pub(crate) fn check_fixed_window(
    store: &dyn StateStore,
    clock: &dyn Clock,
    key: &str,
    rule: EndpointRule,
) -> Result<StrategyOutcome, StoreError> {
    let now = clock.now();

    let current: u32 = store
        .get(key)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if current >= rule.limit {
        let retry = store.ttl(key)?.unwrap_or(rule.window);
        return Ok(StrategyOutcome {
            allowed: false,
            remaining: 0,
            reset_at: now + from_std(retry),
            retry_after: Some(retry),
        });
    }

    let count = store.incr(key, 1)?;
    if count == 1 {
        store.expire(key, rule.window)?;
    }
    let ttl = store.ttl(key)?.unwrap_or(rule.window);

    Ok(StrategyOutcome {
        allowed: true,
        remaining: rule.limit.saturating_sub(count.max(0) as u32),
        reset_at: now + from_std(ttl),
        retry_after: None,
    })
}

/// Sliding window: timestamp set pruned to the trailing window on each
/// check.
pub(crate) fn check_sliding_window(
    store: &dyn StateStore,
    clock: &dyn Clock,
    key: &str,
    rule: EndpointRule,
) -> Result<StrategyOutcome, StoreError> {
    let now = clock.now();
    let now_secs = clock.epoch_secs();
    let window_secs = rule.window.as_secs_f64();
    let window_start = now_secs - window_secs;

    store.zrem_range_by_score(key, f64::NEG_INFINITY, window_start)?;
    let in_window = store.zcard(key)? as u32;

    if in_window >= rule.limit {
        // A retry can succeed once the oldest request ages out.
        let oldest = store.zrange_by_score(key, f64::NEG_INFINITY, f64::INFINITY)?;
        let retry_secs = oldest
            .first()
            .map(|(_, score)| (score + window_secs - now_secs).max(0.0))
            .unwrap_or(window_secs);
        let retry = Duration::from_secs_f64(retry_secs);
        return Ok(StrategyOutcome {
            allowed: false,
            remaining: 0,
            reset_at: now + from_std(retry),
            retry_after: Some(retry),
        });
    }

    let member = format!("{now_secs:.6}:{}", Uuid::now_v7());
    store.zadd(key, &member, now_secs)?;
    store.expire(key, rule.window)?;

    Ok(StrategyOutcome {
        allowed: true,
        remaining: rule.limit - in_window - 1,
        reset_at: now + from_std(rule.window),
        retry_after: None,
    })
}

/// Token bucket: continuous refill at `limit / window` tokens per second,
/// bursts up to `limit`.
pub(crate) fn check_token_bucket(
    store: &dyn StateStore,
    clock: &dyn Clock,
    key: &str,
    rule: EndpointRule,
) -> Result<StrategyOutcome, StoreError> {
    let now = clock.now();
    let now_secs = clock.epoch_secs();
    let capacity = rule.limit as f64;
    let refill_rate = capacity / rule.window.as_secs_f64();

    let fields = store.hget_all(key)?;
    let stored_tokens = fields
        .get("tokens")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(capacity);
    let last_refill = fields
        .get("last_refill")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(now_secs);

    let elapsed = (now_secs - last_refill).max(0.0);
    let tokens = (stored_tokens + elapsed * refill_rate).min(capacity);

    let persist = |tokens: f64| -> Result<(), StoreError> {
        store.hset(key, "tokens", &format!("{tokens:.6}"))?;
        store.hset(key, "last_refill", &format!("{now_secs:.6}"))?;
        store.expire(key, rule.window * 2)?;
        Ok(())
    };

    if tokens < 1.0 {
        persist(tokens)?;
        let retry = Duration::from_secs_f64((1.0 - tokens) / refill_rate);
        return Ok(StrategyOutcome {
            allowed: false,
            remaining: 0,
            reset_at: now + from_std(Duration::from_secs_f64((capacity - tokens) / refill_rate)),
            retry_after: Some(retry),
        });
    }

    let tokens = tokens - 1.0;
    persist(tokens)?;

    Ok(StrategyOutcome {
        allowed: true,
        remaining: tokens.floor() as u32,
        reset_at: now + from_std(Duration::from_secs_f64((capacity - tokens) / refill_rate)),
        retry_after: None,
    })
}
