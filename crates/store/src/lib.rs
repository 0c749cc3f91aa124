//! `taskward-store` — the shared-state-store boundary.
//!
//! Every flow-control component (circuit breaker, rate limiter, dead letter
//! queue, checkpoint) keeps its state in a shared Redis-like store so that
//! any number of worker processes see one view of the world. This crate
//! defines that boundary without making storage assumptions:
//!
//! - [`StateStore`]: the operations consumed (strings with TTL, atomic
//!   counters, hashes, sorted sets, pattern scans)
//! - [`InMemoryStateStore`]: full-semantics in-memory implementation for
//!   tests/dev
//! - [`RedisStateStore`]: production implementation over a Redis server
//! - [`UnavailableStateStore`]: a store whose every operation fails, for
//!   exercising fail-open paths in tests

pub mod in_memory;
pub mod redis;
pub mod r#trait;
pub mod unavailable;

pub use in_memory::InMemoryStateStore;
pub use redis::RedisStateStore;
pub use r#trait::{StateStore, StoreError};
pub use unavailable::UnavailableStateStore;
