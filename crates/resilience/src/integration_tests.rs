//! Integration tests composing all four components the way a task-execution
//! harness does.
//!
//! The harness contract: consult the rate limiter before dispatching a
//! provider call, consult the circuit breaker before dispatching and report
//! the outcome after, check/mark checkpoint steps while executing a
//! multi-stage task, and dead-letter the task once retries are exhausted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use taskward_core::{Identifier, ManualClock, ProviderId, TaskKey};
use taskward_store::InMemoryStateStore;

use crate::breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
use crate::checkpoint::TaskCheckpoint;
use crate::config::ResilienceConfig;
use crate::dlq::{DeadLetterQueue, DlqConfig, DlqStatus};
use crate::ratelimit::{EndpointRule, RateLimitConfig, RateLimiter};

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<InMemoryStateStore>,
    breakers: CircuitBreakerRegistry,
    limiter: RateLimiter,
    dlq: DeadLetterQueue,
}

fn harness(config: ResilienceConfig) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(InMemoryStateStore::with_clock(clock.clone()));
    Harness {
        breakers: CircuitBreakerRegistry::with_clock(
            store.clone(),
            config.breaker.clone(),
            clock.clone(),
        ),
        limiter: RateLimiter::with_clock(store.clone(), config.ratelimit.clone(), clock.clone()),
        dlq: DeadLetterQueue::with_clock(store.clone(), config.dlq.clone(), clock.clone()),
        clock,
        store,
    }
}

impl Harness {
    fn checkpoint(&self, config: &ResilienceConfig, task: TaskKey) -> TaskCheckpoint {
        TaskCheckpoint::with_clock(
            self.store.clone(),
            task,
            config.checkpoint.clone(),
            self.clock.clone(),
        )
    }
}

#[test]
fn failing_provider_trips_breaker_then_task_dead_letters() -> anyhow::Result<()> {
    let config = ResilienceConfig {
        breaker: CircuitBreakerConfig::default().with_failure_threshold(3),
        dlq: DlqConfig::default().with_critical_task("chapter_generation"),
        ..ResilienceConfig::default()
    };
    let h = harness(config.clone());

    let provider = ProviderId::new("openai");
    let user = Identifier::user("author-1");
    let task = TaskKey::new("chapter_generation", "book-7");
    let checkpoint = h.checkpoint(&config, task.clone());

    // step 1 succeeds on the first attempt
    checkpoint.mark_step_complete("fetch_source", None);

    // the provider call fails across three retries
    let breaker = h.breakers.breaker(&provider);
    let mut retries = 0u32;
    for _ in 0..3 {
        assert!(h.limiter.check(&user, "/api/chapters/7/generate").allowed);
        assert!(breaker.is_call_allowed());
        // ... dispatch fails ...
        breaker.record_failure("upstream 503");
        checkpoint.mark_step_failed("call_provider", "upstream 503", retries);
        retries += 1;
        h.clock.advance(Duration::from_secs(1));
    }

    // the third failure opened the circuit
    assert!(!breaker.is_call_allowed());
    assert_eq!(breaker.stats().state, CircuitState::Open);

    // retries exhausted: the harness dead-letters the task
    assert!(h.dlq.add_failed_task(
        &task.task_type,
        &task.task_id,
        serde_json::json!({ "book": 7 }),
        "upstream 503",
        None,
        retries,
        Some(serde_json::json!({ "provider": "openai" })),
    ));

    let entry = h
        .dlq
        .failed_task("book-7")
        .context("dead letter for book-7 should exist")?;
    assert_eq!(entry.retry_count, 3);
    assert_eq!(entry.status, DlqStatus::Failed);

    // the checkpoint still knows step 1 finished; a resumed run skips it
    assert!(checkpoint.is_step_complete("fetch_source"));
    assert!(!checkpoint.is_step_complete("call_provider"));
    assert_eq!(checkpoint.progress_percent(4), 25);
    Ok(())
}

#[test]
fn recovered_provider_lets_resumed_task_finish() {
    let config = ResilienceConfig {
        breaker: CircuitBreakerConfig::default()
            .with_failure_threshold(2)
            .with_recovery_timeout(Duration::from_secs(30))
            .with_half_open_success_threshold(1),
        ..ResilienceConfig::default()
    };
    let h = harness(config.clone());

    let provider = ProviderId::new("openai");
    let task = TaskKey::new("chapter_generation", "book-9");
    let breaker = h.breakers.breaker(&provider);

    // first run: two failures open the circuit, one step already done
    let checkpoint = h.checkpoint(&config, task.clone());
    checkpoint.mark_step_complete("fetch_source", None);
    breaker.record_failure("timeout");
    breaker.record_failure("timeout");
    assert!(!breaker.is_call_allowed());

    // resume after the recovery timeout, as a fresh worker would
    h.clock.advance(Duration::from_secs(31));
    let resumed = h.checkpoint(&config, task);
    assert!(resumed.has_checkpoint());
    assert!(resumed.is_step_complete("fetch_source"));

    assert!(breaker.is_call_allowed()); // probe admitted
    breaker.record_success();
    assert_eq!(breaker.stats().state, CircuitState::Closed);

    resumed.mark_step_complete("call_provider", None);
    resumed.mark_step_complete("post_process", None);
    resumed.mark_step_complete("persist", None);
    assert_eq!(resumed.progress_percent(4), 100);

    // finished: the ledger is cleared and nothing is dead-lettered
    assert!(resumed.clear());
    assert!(!resumed.has_checkpoint());
    assert_eq!(h.dlq.statistics().total_failed_tasks, 0);
}

#[test]
fn blocked_identifier_cannot_reach_a_healthy_provider() {
    let config = ResilienceConfig {
        ratelimit: RateLimitConfig::default()
            .with_default_rule(EndpointRule::new(1, Duration::from_secs(60)))
            .with_violation_threshold(2)
            .with_block_duration(Duration::from_secs(600)),
        ..ResilienceConfig::default()
    };
    let h = harness(config);

    let provider = ProviderId::new("openai");
    let scraper = Identifier::ip("203.0.113.9");

    assert!(h.limiter.check(&scraper, "/summaries").allowed);
    // two rejections reach the violation threshold and block the identifier
    assert!(!h.limiter.check(&scraper, "/summaries").allowed);
    assert!(!h.limiter.check(&scraper, "/summaries").allowed);

    // the breaker would admit the call, but admission control says no
    assert!(h.breakers.breaker(&provider).is_call_allowed());
    let decision = h.limiter.check(&scraper, "/api/anything/else");
    assert!(!decision.allowed);
    assert!(decision.retry_after.unwrap() > Duration::ZERO);

    // components are independent: the breaker saw nothing
    assert_eq!(
        h.breakers.breaker(&provider).stats().total_failures,
        0
    );
}

#[test]
fn components_share_the_store_across_worker_processes() {
    let config = ResilienceConfig::default();
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(InMemoryStateStore::with_clock(clock.clone()));

    // two "processes", each with its own wiring over the same store
    let worker_a =
        CircuitBreakerRegistry::with_clock(store.clone(), config.breaker.clone(), clock.clone());
    let worker_b =
        CircuitBreakerRegistry::with_clock(store.clone(), config.breaker.clone(), clock.clone());

    let provider = ProviderId::new("gemini");
    for _ in 0..5 {
        worker_a.breaker(&provider).record_failure("down");
    }

    // worker B observes the open circuit immediately
    assert!(!worker_b.breaker(&provider).is_call_allowed());

    let checkpoint_a = TaskCheckpoint::with_clock(
        store.clone(),
        TaskKey::new("pdf_extraction", "doc-1"),
        config.checkpoint.clone(),
        clock.clone(),
    );
    checkpoint_a.mark_step_complete("extract_text", None);

    let checkpoint_b = TaskCheckpoint::with_clock(
        store,
        TaskKey::new("pdf_extraction", "doc-1"),
        config.checkpoint,
        clock,
    );
    assert!(checkpoint_b.is_step_complete("extract_text"));
}
