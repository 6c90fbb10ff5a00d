use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::rate_limit::{method_tags, Decision, MethodOptions, RateLimitMethod};
use crate::request::RequestProxy;
use crate::store::{CounterStore, TtlPolicy};
use crate::ticks::{self, Ticks, TICKS_PER_SECOND};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// How long a reservation may be held before the counter expires on its own.
pub const DEFAULT_TIMEOUT_SECS: u64 = 100;

/// Concurrency limit: at most `permit_limit` units held at once.
///
/// Admission reserves `cost` units and the caller gives them back through
/// [`RateLimitMethod::decrement`] when the work finishes (the
/// [`Permit`](crate::limiter::Permit) returned by the limiter does this). A
/// reservation that is never released is reclaimed when the counter expires,
/// `timeout_in_seconds` after the last admission.
#[derive(Debug, Clone)]
pub struct Semaphore {
    options: MethodOptions,
    timeout_in_seconds: u64,
    clock: Arc<dyn Clock>,
}

impl Semaphore {
    pub fn new(permit_limit: i64) -> Self {
        Self {
            options: MethodOptions::new(permit_limit),
            timeout_in_seconds: DEFAULT_TIMEOUT_SECS,
            clock: Arc::new(SystemClock),
        }
    }

    /// Upper bound on how long an unreleased reservation keeps its slot.
    pub fn timeout_in_seconds(mut self, secs: u64) -> Self {
        self.timeout_in_seconds = secs;
        self
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

    /// Lifetime given to the counter by each admission.
    pub fn timeout(&self) -> Duration {
        ticks::to_duration(self.timeout_ticks())
    }

    fn timeout_ticks(&self) -> Ticks {
        i64::try_from(self.timeout_in_seconds)
            .unwrap_or(i64::MAX)
            .saturating_mul(TICKS_PER_SECOND)
    }

    fn is_disabled(&self) -> bool {
        self.options.permit_limit <= 0
    }
}

#[async_trait]
impl RateLimitMethod for Semaphore {
    fn options(&self) -> &MethodOptions {
        &self.options
    }

    fn cache_key(&self) -> String {
        format!("Semaphore({},{})", self.options.permit_limit, self.timeout_in_seconds)
    }

    fn retry_after_secs(&self) -> u64 {
        1
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
        let expires_at = self.clock.now_ticks().saturating_add(self.timeout_ticks());
        let count = store
            .increment_and_get(
                key,
                cost,
                expires_at,
                TtlPolicy::SetAbsoluteTtl,
                permit_limit,
                request,
            )
            .await?;

        if count > permit_limit {
            // The overflowing reservation was never granted.
            if let Err(error) = store.decrement(key, cost, request).await {
                tracing::warn!(key, %error, "failed to undo rejected semaphore reservation");
            }
            return Ok(self.rejection());
        }

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
        Ok(store.get(key, request).await? >= self.options.permit_limit)
    }

    async fn decrement(
        &self,
        key: &str,
        cost: i64,
        store: &dyn CounterStore,
        request: &dyn RequestProxy,
    ) -> Result<(), StoreError> {
        if self.is_disabled() {
            return Ok(());
        }
        store.decrement(key, cost, request).await
    }

    fn telemetry_tags(&self) -> Vec<(String, String)> {
        method_tags(
            "Semaphore",
            &self.options,
            self.retry_after_secs(),
            &[("timeout_in_seconds", self.timeout_in_seconds.to_string())],
        )
    }
}
