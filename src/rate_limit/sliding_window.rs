use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::rate_limit::{method_tags, Decision, MethodOptions, RateLimitMethod};
use crate::request::RequestProxy;
use crate::store::{CounterStore, TtlPolicy};
use crate::ticks::{self, Ticks};
use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;

/// Sliding window approximated with `num_of_buckets` fixed sub-windows.
///
/// Each bucket is its own counter (`{key}-{bucket}`) that lives exactly as long
/// as it belongs to some window. A request is counted in the current bucket and
/// judged against the sum of the current and the preceding `num_of_buckets - 1`
/// buckets.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    options: MethodOptions,
    interval_in_seconds: f64,
    num_of_buckets: i64,
    clock: Arc<dyn Clock>,
}

impl SlidingWindow {
    pub fn new(permit_limit: i64, interval_in_seconds: f64, num_of_buckets: i64) -> Self {
        Self {
            options: MethodOptions::new(permit_limit),
            interval_in_seconds,
            num_of_buckets,
            clock: Arc::new(SystemClock),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn fail_open(mut self, enabled: bool) -> Self {
        self.options.fail_open = enabled;
        self
    }

    pub fn ignore_allow_list(mut self, enabled: bool) -> Self {
        self.options.ignore_allow_list = enabled;
        self
    }

    fn bucket_ticks(&self) -> Ticks {
        if self.num_of_buckets <= 0 {
            return 0;
        }
        ticks::from_secs_f64(self.interval_in_seconds) / self.num_of_buckets
    }

    fn is_disabled(&self) -> bool {
        self.options.permit_limit <= 0 || self.bucket_ticks() <= 0
    }

    fn bucket_key(key: &str, bucket: i64) -> String {
        format!("{}-{}", key, bucket)
    }

    /// Sum of the `buckets` buckets ending at (and including) `last`.
    async fn sum_buckets(
        &self,
        key: &str,
        last: i64,
        buckets: i64,
        store: &dyn CounterStore,
        request: &dyn RequestProxy,
    ) -> Result<i64, StoreError> {
        let keys: Vec<String> = (0..buckets).map(|i| Self::bucket_key(key, last - i)).collect();
        let counts = try_join_all(keys.iter().map(|k| store.get(k, request))).await?;
        Ok(counts.into_iter().sum())
    }
}

#[async_trait]
impl RateLimitMethod for SlidingWindow {
    fn options(&self) -> &MethodOptions {
        &self.options
    }

    fn cache_key(&self) -> String {
        format!(
            "SlidingWindow({},{},{})",
            self.options.permit_limit, self.interval_in_seconds, self.num_of_buckets
        )
    }

    fn retry_after_secs(&self) -> u64 {
        if self.num_of_buckets <= 0 {
            return 0;
        }
        (self.interval_in_seconds.max(0.0) / self.num_of_buckets as f64).ceil() as u64
    }

    async fn try_is_exceeded(
        &self,
        key: &str,
        cost: i64,
        store: &dyn CounterStore,
        request: &dyn RequestProxy,
    ) -> Result<Decision, StoreError> {
        if self.is_disabled() {
            return Ok(Decision::UNLIMITED);
        }

        let bucket_ticks = self.bucket_ticks();
        let bucket = self.clock.now_ticks().div_euclid(bucket_ticks);
        let expires_at = (bucket + self.num_of_buckets).saturating_mul(bucket_ticks);

        let current = store
            .increment_and_get(
                &Self::bucket_key(key, bucket),
                cost,
                expires_at,
                TtlPolicy::SetAbsoluteTtl,
                cost,
                request,
            )
            .await?;
        let previous =
            self.sum_buckets(key, bucket - 1, self.num_of_buckets - 1, store, request).await?;
        let count = current + previous;

        if count > self.options.permit_limit {
            Ok(self.rejection())
        } else {
            Ok(Decision::admitted(self.options.permit_limit, count))
        }
    }

    async fn is_still_exceeded(
        &self,
        key: &str,
        store: &dyn CounterStore,
        request: &dyn RequestProxy,
    ) -> Result<bool, StoreError> {
        if self.is_disabled() {
            return Ok(false);
        }
        let bucket = self.clock.now_ticks().div_euclid(self.bucket_ticks());
        let count = self.sum_buckets(key, bucket, self.num_of_buckets, store, request).await?;
        Ok(count >= self.options.permit_limit)
    }

    async fn decrement(
        &self,
        _key: &str,
        _cost: i64,
        _store: &dyn CounterStore,
        _request: &dyn RequestProxy,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    fn telemetry_tags(&self) -> Vec<(String, String)> {
        method_tags(
            "SlidingWindow",
            &self.options,
            self.retry_after_secs(),
            &[
                ("interval_in_seconds", self.interval_in_seconds.to_string()),
                ("num_of_buckets", self.num_of_buckets.to_string()),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryCounterStore;
    use std::time::Duration;

    fn setup(permit_limit: i64) -> (SlidingWindow, InMemoryCounterStore, ManualClock) {
        let clock = ManualClock::new(0);
        let store = InMemoryCounterStore::with_clock(clock.clone());
        let window = SlidingWindow::new(permit_limit, 4.0, 4).with_clock(clock.clone());
        (window, store, clock)
    }

    #[test]
    fn identity_and_retry_hint() {
        let window = SlidingWindow::new(10, 4.0, 4);
        assert_eq!(window.cache_key(), "SlidingWindow(10,4,4)");
        assert_eq!(window.retry_after_secs(), 1);
        assert_eq!(SlidingWindow::new(10, 4.0, 0).retry_after_secs(), 0);
    }

    #[tokio::test]
    async fn counts_span_buckets_and_slide_out() {
        let (window, store, clock) = setup(3);

        // t=0s and t=1s: two units in different buckets.
        assert!(window.try_is_exceeded("k", 1, &store, &()).await.unwrap().is_admitted());
        clock.advance(Duration::from_secs(1));
        assert!(window.try_is_exceeded("k", 2, &store, &()).await.unwrap().is_admitted());
        clock.advance(Duration::from_secs(1));
        assert!(!window.try_is_exceeded("k", 1, &store, &()).await.unwrap().is_admitted());
        assert!(window.is_still_exceeded("k", &store, &()).await.unwrap());

        // t=4s: the t=0s bucket has left the window; 2 (t=1s) + 1 (rejected at t=2s) remain.
        clock.advance(Duration::from_secs(2));
        assert!(window.is_still_exceeded("k", &store, &()).await.unwrap());

        // t=5s: only the t=2s bucket is still in range.
        clock.advance(Duration::from_secs(1));
        assert!(!window.is_still_exceeded("k", &store, &()).await.unwrap());
        assert_eq!(
            window.try_is_exceeded("k", 1, &store, &()).await.unwrap(),
            Decision::Admitted { remaining: 1 }
        );
    }

    #[tokio::test]
    async fn bucket_counters_expire_when_out_of_window() {
        let (window, store, clock) = setup(10);
        window.try_is_exceeded("k", 1, &store, &()).await.unwrap();
        assert_eq!(store.ttl("k-0"), Some(4 * crate::ticks::TICKS_PER_SECOND));
        clock.advance(Duration::from_secs(4));
        assert_eq!(store.get("k-0", &()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_buckets_disables() {
        let store = InMemoryCounterStore::new();
        let window = SlidingWindow::new(1, 4.0, 0);
        for _ in 0..3 {
            assert!(window.try_is_exceeded("k", 1, &store, &()).await.unwrap().is_admitted());
        }
        assert!(!window.is_still_exceeded("k", &store, &()).await.unwrap());
    }
}
