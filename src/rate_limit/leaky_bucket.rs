use crate::error::StoreError;
use crate::rate_limit::{method_tags, Decision, MethodOptions, RateLimitMethod};
use crate::request::RequestProxy;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::store::{CounterStore, TtlPolicy};
use crate::ticks::{self, Ticks};
use async_trait::async_trait;
use std::sync::Arc;

/// Leaky bucket: a bucket `permit_limit` deep that drains one unit every
/// `interval / permit_limit`.
///
/// Each admitted unit waits for its place in the queue: the Nth unit in the
/// bucket is delayed by `N - 1` leak intervals before the call returns. A full
/// bucket rejects immediately.
///
/// The counter's TTL is extended by one leak interval per admitted unit and
/// frozen once the bucket overflows, so a flooded key drains back down on its
/// own instead of having its expiry pushed forward by every rejected caller.
///
/// # Cancellation
///
/// Dropping the future while it waits out its delay does **not** give the
/// unit back. The reservation is abandoned and only freed by TTL decay.
///
/// ```
/// use turnstile::rate_limit::{LeakyBucket, RateLimitMethod};
/// let bucket = LeakyBucket::new(3, 3.0);
/// assert_eq!(bucket.cache_key(), "LeakyBucket(3,3)");
/// assert_eq!(bucket.retry_after_secs(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct LeakyBucket {
    options: MethodOptions,
    interval_in_seconds: f64,
    sleeper: Arc<dyn Sleeper>,
}

impl LeakyBucket {
    /// `interval_in_seconds` may be fractional. Either parameter `<= 0` disables the method.
    pub fn new(permit_limit: i64, interval_in_seconds: f64) -> Self {
        Self {
            options: MethodOptions::new(permit_limit),
            interval_in_seconds,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Override how the queueing delay is waited out (useful for deterministic tests).
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
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

    pub fn interval_in_seconds(&self) -> f64 {
        self.interval_in_seconds
    }

    fn is_disabled(&self) -> bool {
        self.interval_in_seconds <= 0.0 || self.options.permit_limit <= 0
    }

    /// Time for one unit to leak out of the bucket.
    pub fn leakage_ticks(&self) -> Ticks {
        if self.is_disabled() {
            return 0;
        }
        ticks::from_secs_f64(self.interval_in_seconds) / self.options.permit_limit
    }
}

#[async_trait]
impl RateLimitMethod for LeakyBucket {
    fn options(&self) -> &MethodOptions {
        &self.options
    }

    fn cache_key(&self) -> String {
        format!("LeakyBucket({},{})", self.options.permit_limit, self.interval_in_seconds)
    }

    fn retry_after_secs(&self) -> u64 {
        self.interval_in_seconds.max(0.0).ceil() as u64
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

        let permit_limit = self.options.permit_limit;
        let leakage = self.leakage_ticks();
        let count = store
            .increment_and_get(key, cost, leakage, TtlPolicy::IncrementTtl, permit_limit, request)
            .await?;

        if count > permit_limit {
            return Ok(self.rejection());
        }

        let delay = ticks::to_duration(leakage.saturating_mul((count - 1).max(0)));
        tracing::trace!(key, count, ?delay, "queued in leaky bucket");
        self.sleeper.sleep(delay).await;

        Ok(Decision::admitted(permit_limit, count))
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
        let count = store.get(key, request).await?;
        Ok(count >= self.options.permit_limit)
    }

    async fn decrement(
        &self,
        _key: &str,
        _cost: i64,
        _store: &dyn CounterStore,
        _request: &dyn RequestProxy,
    ) -> Result<(), StoreError> {
        // Capacity only frees through leakage.
        Ok(())
    }

    fn telemetry_tags(&self) -> Vec<(String, String)> {
        method_tags(
            "LeakyBucket",
            &self.options,
            self.retry_after_secs(),
            &[("interval_in_seconds", self.interval_in_seconds.to_string())],
        )
    }
}
