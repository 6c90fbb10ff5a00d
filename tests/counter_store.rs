use std::sync::Arc;
use std::time::Duration;
use turnstile::clock::ManualClock;
use turnstile::rate_limit::{RateLimitMethod, Semaphore, SlidingWindow};
use turnstile::store::{CounterStore, InMemoryCounterStore, TtlPolicy};
use turnstile::ticks::TICKS_PER_SECOND;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_increments_never_lose_updates() {
    let store = Arc::new(InMemoryCounterStore::new());

    let tasks = (0..200).map(|_| {
        let store = store.clone();
        tokio::spawn(async move {
            let ttl = 60 * TICKS_PER_SECOND;
            store
                .increment_and_get("hot", 1, ttl, TtlPolicy::IncrementTtl, i64::MAX, &())
                .await
                .unwrap()
        })
    });
    let mut counts: Vec<i64> =
        futures::future::join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();
    counts.sort_unstable();

    assert_eq!(counts, (1..=200).collect::<Vec<_>>());
    assert_eq!(store.get("hot", &()).await.unwrap(), 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn semaphore_never_over_admits_under_contention() {
    let store = Arc::new(InMemoryCounterStore::new());
    let semaphore = Arc::new(Semaphore::new(10));

    let tasks = (0..100).map(|_| {
        let store = store.clone();
        let semaphore = semaphore.clone();
        tokio::spawn(async move {
            semaphore.is_exceeded("pool", 1, store.as_ref(), &()).await.unwrap().is_admitted()
        })
    });
    let admitted = futures::future::join_all(tasks)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(true)))
        .count();

    assert_eq!(admitted, 10);
    assert_eq!(store.get("pool", &()).await.unwrap(), 10);
}

#[tokio::test]
async fn clones_share_counters() {
    let clock = ManualClock::new(0);
    let store = InMemoryCounterStore::with_clock(clock);
    let other = store.clone();

    store
        .increment_and_get("k", 2, TICKS_PER_SECOND, TtlPolicy::IncrementTtl, 10, &())
        .await
        .unwrap();
    assert_eq!(other.get("k", &()).await.unwrap(), 2);
    other.decrement("k", 2, &()).await.unwrap();
    assert!(store.is_empty());
}

#[tokio::test]
async fn decrement_of_missing_key_is_harmless() {
    let store = InMemoryCounterStore::new();
    store.decrement("ghost", 3, &()).await.unwrap();
    assert_eq!(store.get("ghost", &()).await.unwrap(), 0);
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn sliding_window_buckets_do_not_accumulate() {
    let clock = ManualClock::new(0);
    let store = InMemoryCounterStore::with_clock(clock.clone());
    let window = SlidingWindow::new(10, 4.0, 4).with_clock(clock.clone());

    for _ in 0..1_000 {
        window.is_exceeded("client", 1, &store, &()).await.unwrap();
        clock.advance(Duration::from_secs(1));
    }

    assert!(store.len() <= 4, "live = {}", store.len());
    // One sweep interval of expired buckets at most, plus the live ones.
    assert!(store.stored_len() <= 70, "stored = {}", store.stored_len());
}
