//! Aggregated configuration for the flow-control layer.

use serde::{Deserialize, Serialize};

use crate::breaker::CircuitBreakerConfig;
use crate::checkpoint::CheckpointConfig;
use crate::dlq::DlqConfig;
use crate::ratelimit::RateLimitConfig;

/// One config object for everything, built once at process start and handed
/// to each component by the wiring code.
///
/// There are no module-level singletons in this workspace: whoever owns the
/// process builds a `ResilienceConfig` (from a config file, env, or
/// defaults), constructs the components with it, and passes shared
/// references down.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub breaker: CircuitBreakerConfig,
    pub ratelimit: RateLimitConfig,
    pub dlq: DlqConfig,
    pub checkpoint: CheckpointConfig,
}
