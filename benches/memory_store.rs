use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use turnstile::limiter::{Limiter, Rule};
use turnstile::rate_limit::{FixedWindow, RateLimitMethod, Semaphore};
use turnstile::store::{CounterStore, InMemoryCounterStore, TtlPolicy};
use turnstile::ticks::TICKS_PER_SECOND;

fn store_increment_hot_key(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryCounterStore::new();

    c.bench_function("memory_store_increment_hot_key", |b| {
        b.to_async(&rt).iter(|| async {
            let _ = black_box(
                store
                    .increment_and_get(
                        black_box("hot"),
                        1,
                        TICKS_PER_SECOND,
                        TtlPolicy::IncrementTtl,
                        i64::MAX,
                        &(),
                    )
                    .await,
            );
        });
    });
}

fn store_increment_spread_keys(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryCounterStore::new();
    let next = AtomicU64::new(0);

    c.bench_function("memory_store_increment_1k_keys", |b| {
        b.to_async(&rt).iter(|| {
            // Spread over 1000 keys to exercise shard distribution.
            let key = format!("client-{}", next.fetch_add(1, Ordering::Relaxed) % 1_000);
            let store = &store;
            async move {
                let ttl = 60 * TICKS_PER_SECOND;
                let _ = black_box(
                    store
                        .increment_and_get(&key, 1, ttl, TtlPolicy::IncrementTtl, i64::MAX, &())
                        .await,
                );
            }
        });
    });
}

fn method_fixed_window(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryCounterStore::new();
    let window = FixedWindow::new(i64::MAX, 60.0);

    c.bench_function("fixed_window_is_exceeded", |b| {
        b.to_async(&rt).iter(|| async {
            let _ = black_box(window.is_exceeded(black_box("client"), 1, &store, &()).await);
        });
    });
}

fn limiter_check_and_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let limiter = Arc::new(
        Limiter::builder()
            .store(InMemoryCounterStore::new())
            .rule(Rule::new(Semaphore::new(1_000)).named("inflight"))
            .rule(Rule::new(FixedWindow::new(i64::MAX, 60.0)).named("rate"))
            .build()
            .unwrap(),
    );

    c.bench_function("limiter_check_and_release", |b| {
        b.to_async(&rt).iter(|| async {
            if let Some(permit) = limiter.check("client", 1, &()).await.unwrap().into_permit() {
                permit.release(&()).await;
            }
        });
    });
}

criterion_group!(
    benches,
    store_increment_hot_key,
    store_increment_spread_keys,
    method_fixed_window,
    limiter_check_and_release
);
criterion_main!(benches);
