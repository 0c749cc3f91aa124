//! Per-provider circuit breaker.
//!
//! ## States
//!
//! - Closed: normal operation, calls pass through
//! - Open: provider assumed down, calls rejected fast
//! - HalfOpen: recovery timeout elapsed, probe calls allowed
//!
//! ## State transitions
//!
//! ```text
//! Closed   → Open:     failures within the trailing window reach threshold
//! Open     → HalfOpen: recovery timeout elapsed (observed by isCallAllowed)
//! HalfOpen → Closed:   success threshold reached
//! HalfOpen → Open:     any probe failure
//! ```
//!
//! ## Design
//!
//! - One breaker per provider; state lives in the shared store, so every
//!   worker process sees the same circuit
//! - The failure window is a sorted set maintained with atomic commands;
//!   the stats blob is a JSON record written wholesale (see
//!   [`CircuitBreaker`] on the accepted race)
//! - Store failures never reject a call: the breaker assumes the provider
//!   is available and logs the degradation

pub mod circuit;
pub mod registry;
pub mod types;

pub use circuit::CircuitBreaker;
pub use registry::CircuitBreakerRegistry;
pub use types::{CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
