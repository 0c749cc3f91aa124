//! `taskward-resilience` — flow control for calls to unreliable providers.
//!
//! Four mutually independent components, all backed by the shared state
//! store so every worker process sees the same view:
//!
//! - [`breaker`]: per-provider circuit breaker (closed → open → half-open)
//! - [`ratelimit`]: per-identifier admission control with interchangeable
//!   strategies, violation tracking, and temporary blocking
//! - [`dlq`]: durable record of tasks that exhausted all retries
//! - [`checkpoint`]: step-completion ledger so retried tasks skip finished
//!   work
//!
//! ## Design
//!
//! - No background execution: every operation runs synchronously on the
//!   caller's thread; the only suspension point is the store round trip
//! - No in-process locks guard shared state; correctness relies on the
//!   atomicity of individual store commands
//! - Bookkeeping never fails the protected call: on any store error each
//!   component takes a named fail-open/fail-silent path and logs it
//!
//! A task-execution harness composes these: consult the rate limiter and
//! circuit breaker before dispatching a provider call, report the outcome
//! after, check/mark checkpoint steps during multi-stage work, and
//! dead-letter the task once retries are exhausted.

pub mod breaker;
pub mod checkpoint;
pub mod config;
pub mod dlq;
pub mod ratelimit;

#[cfg(test)]
mod integration_tests;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats, CircuitState};
pub use checkpoint::{CheckpointConfig, CheckpointStepRecord, StepStatus, TaskCheckpoint};
pub use config::ResilienceConfig;
pub use dlq::{DeadLetterQueue, DlqConfig, DlqEntry, DlqStatistics, DlqStatus};
pub use ratelimit::{
    EndpointRule, RateLimitConfig, RateLimitDecision, RateLimitStatistics, RateLimitStrategy,
    RateLimiter,
};
