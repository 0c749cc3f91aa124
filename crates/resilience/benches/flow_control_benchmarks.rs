use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;
use std::time::Duration;

use taskward_core::{Identifier, ProviderId};
use taskward_resilience::breaker::{CircuitBreaker, CircuitBreakerConfig};
use taskward_resilience::ratelimit::{RateLimitConfig, RateLimitStrategy, RateLimiter};
use taskward_store::InMemoryStateStore;

/// Admission checks per strategy against the in-memory store.
///
/// This measures the component overhead (key building, record codec, window
/// arithmetic), not a real Redis round trip.
fn bench_rate_limit_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limit_check");
    group.throughput(Throughput::Elements(1));

    for strategy in [
        RateLimitStrategy::FixedWindow,
        RateLimitStrategy::SlidingWindow,
        RateLimitStrategy::TokenBucket,
    ] {
        group.bench_with_input(
            BenchmarkId::from_parameter(strategy),
            &strategy,
            |b, &strategy| {
                let store = Arc::new(InMemoryStateStore::new());
                // a quota large enough that the loop never trips it
                let config = RateLimitConfig::default().with_default_rule(
                    taskward_resilience::ratelimit::EndpointRule::new(
                        u32::MAX,
                        Duration::from_secs(60),
                    ),
                );
                let limiter = RateLimiter::new(store, config);
                let identifier = Identifier::user("bench-user");

                b.iter(|| {
                    black_box(limiter.check_with_strategy(
                        black_box(&identifier),
                        "/books/42/chapters/7",
                        strategy,
                    ))
                });
            },
        );
    }
    group.finish();
}

/// A closed breaker's happy path: one admission check plus one success
/// report, as the harness does around every provider call.
fn bench_breaker_happy_path(c: &mut Criterion) {
    let store = Arc::new(InMemoryStateStore::new());
    let breaker = CircuitBreaker::new(
        ProviderId::new("openai"),
        store,
        CircuitBreakerConfig::default(),
    );

    c.bench_function("breaker_allow_and_record_success", |b| {
        b.iter(|| {
            black_box(breaker.is_call_allowed());
            breaker.record_success();
        })
    });
}

criterion_group!(benches, bench_rate_limit_strategies, bench_breaker_happy_path);
criterion_main!(benches);
