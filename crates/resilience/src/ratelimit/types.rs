//! Rate limiter types and configuration.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskward_core::Identifier;

/// How request admission is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Counter with a TTL; cheap, allows bursts at window edges.
    FixedWindow,
    /// Timestamp set pruned to the trailing window; precise.
    SlidingWindow,
    /// Continuous refill; allows bursts up to capacity.
    TokenBucket,
}

impl RateLimitStrategy {
    /// Stable name used in store keys and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitStrategy::FixedWindow => "fixed",
            RateLimitStrategy::SlidingWindow => "sliding",
            RateLimitStrategy::TokenBucket => "bucket",
        }
    }
}

impl core::fmt::Display for RateLimitStrategy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limit for one endpoint category: `limit` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRule {
    pub limit: u32,
    pub window: Duration,
}

impl EndpointRule {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// Rate limiter tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Strategy used when the caller doesn't pick one per call.
    pub default_strategy: RateLimitStrategy,
    /// Endpoint-category prefix → rule. Longest matching prefix wins.
    pub rules: HashMap<String, EndpointRule>,
    /// Rule for categories with no table entry.
    pub default_rule: EndpointRule,
    /// Rejections within `violation_ttl` that trigger a block.
    pub violation_threshold: u32,
    /// Lifetime of the per-identifier violation counter.
    pub violation_ttl: Duration,
    /// Retention of persisted violation audit records.
    pub violation_record_ttl: Duration,
    /// How long a blocked identifier stays blocked.
    pub block_duration: Duration,
    /// Identifiers exempt from all limits.
    pub whitelist: HashSet<Identifier>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut rules = HashMap::new();
        // Auth-like endpoints attract credential stuffing; keep them tight.
        rules.insert(
            "/api/auth".to_string(),
            EndpointRule::new(5, Duration::from_secs(60)),
        );
        rules.insert(
            "/api".to_string(),
            EndpointRule::new(60, Duration::from_secs(60)),
        );

        Self {
            default_strategy: RateLimitStrategy::SlidingWindow,
            rules,
            default_rule: EndpointRule::new(100, Duration::from_secs(60)),
            violation_threshold: 3,
            violation_ttl: Duration::from_secs(3600),
            violation_record_ttl: Duration::from_secs(24 * 3600),
            block_duration: Duration::from_secs(15 * 60),
            whitelist: HashSet::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn with_default_strategy(mut self, strategy: RateLimitStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    pub fn with_rule(mut self, category_prefix: impl Into<String>, rule: EndpointRule) -> Self {
        self.rules.insert(category_prefix.into(), rule);
        self
    }

    pub fn with_default_rule(mut self, rule: EndpointRule) -> Self {
        self.default_rule = rule;
        self
    }

    pub fn with_block_duration(mut self, duration: Duration) -> Self {
        self.block_duration = duration;
        self
    }

    pub fn with_violation_threshold(mut self, threshold: u32) -> Self {
        self.violation_threshold = threshold;
        self
    }

    pub fn with_whitelisted(mut self, identifier: Identifier) -> Self {
        self.whitelist.insert(identifier);
        self
    }

    /// Rule for a normalized endpoint category (longest prefix wins).
    pub fn rule_for(&self, category: &str) -> EndpointRule {
        self.rules
            .iter()
            .filter(|(prefix, _)| category.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, rule)| *rule)
            .unwrap_or(self.default_rule)
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the current window/bucket is fully replenished, or when a block
    /// lifts.
    pub reset_at: DateTime<Utc>,
    /// Present on rejection: seconds until a retry can succeed.
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    pub(crate) fn unlimited(now: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            limit: u32::MAX,
            remaining: u32::MAX,
            reset_at: now,
            retry_after: None,
        }
    }
}

/// Audit record persisted on every rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub identifier: Identifier,
    pub endpoint: String,
    pub limit: u32,
    pub window: Duration,
    /// Value of the violation counter when this record was written.
    pub violation_count: u32,
    /// Whether this violation tripped a block.
    pub blocked: bool,
    pub occurred_at: DateTime<Utc>,
}

/// One currently blocked identifier.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveBlock {
    /// `kind:value` form of the blocked identifier.
    pub identifier: String,
    pub seconds_remaining: u64,
}

/// Admin snapshot of limiter state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RateLimitStatistics {
    pub active_blocks: Vec<ActiveBlock>,
    /// Identifiers with a live violation counter.
    pub identifiers_with_violations: u64,
    pub whitelist_size: usize,
    pub configured_rules: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_resolution_prefers_longest_prefix() {
        let config = RateLimitConfig::default();

        assert_eq!(config.rule_for("/api/auth/login").limit, 5);
        assert_eq!(config.rule_for("/api/chapters/{id}").limit, 60);
        assert_eq!(config.rule_for("/healthz").limit, 100);
    }

    #[test]
    fn custom_rules_override_defaults() {
        let config = RateLimitConfig::default().with_rule(
            "/api/chapters/{id}/generate",
            EndpointRule::new(2, Duration::from_secs(300)),
        );

        assert_eq!(config.rule_for("/api/chapters/{id}/generate").limit, 2);
        assert_eq!(config.rule_for("/api/chapters/{id}").limit, 60);
    }

    #[test]
    fn config_deserializes_from_json() {
        let config: RateLimitConfig = serde_json::from_str(
            r#"{
                "default_strategy": "token_bucket",
                "violation_threshold": 5
            }"#,
        )
        .unwrap();
        assert_eq!(config.default_strategy, RateLimitStrategy::TokenBucket);
        assert_eq!(config.violation_threshold, 5);
        assert_eq!(config.rule_for("/api/auth/login").limit, 5);
    }
}
