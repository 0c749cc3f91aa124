//! Per-identifier rate limiting with interchangeable strategies.
//!
//! ## Data flow
//!
//! ```text
//! check(identifier, endpoint):
//!     → whitelist?            (exempt identifiers always pass)
//!     → active block?         (blocked identifiers always fail, with retry_after)
//!     → normalize endpoint    (ids collapsed to a placeholder)
//!     → resolve rule          (category table, longest prefix wins)
//!     → evaluate strategy     (fixed window | sliding window | token bucket)
//!     → on rejection: count the violation, block repeat offenders
//! ```
//!
//! ## Design
//!
//! - Limits hang off (identifier kind, identifier, endpoint category), so a
//!   user hammering one endpoint doesn't starve their other traffic
//! - The category → (limit, window) table comes from configuration, not
//!   per-route code
//! - Violation bookkeeping is fail-silent: losing an audit record never
//!   changes an admission decision
//! - Store failures fail open: with the store down, requests are allowed

pub mod endpoint;
pub mod limiter;
pub mod strategies;
pub mod types;

pub use endpoint::normalize_endpoint;
pub use limiter::RateLimiter;
pub use types::{
    ActiveBlock, EndpointRule, RateLimitConfig, RateLimitDecision, RateLimitStatistics,
    RateLimitStrategy, ViolationRecord,
};
