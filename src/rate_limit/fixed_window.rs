use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::rate_limit::{method_tags, Decision, MethodOptions, RateLimitMethod};
use crate::request::RequestProxy;
use crate::store::{CounterStore, TtlPolicy};
use crate::ticks::{self, Ticks};
use async_trait::async_trait;
use std::sync::Arc;

/// Fixed window: at most `permit_limit` units per interval, with windows
/// aligned to multiples of the interval since the Unix epoch.
///
/// The creating increment stamps the counter with the window's end as an
/// absolute expiry, so every process sharing the store agrees on when it resets.
#[derive(Debug, Clone)]
pub struct FixedWindow {
    options: MethodOptions,
    interval_in_seconds: f64,
    clock: Arc<dyn Clock>,
}

impl FixedWindow {
    pub fn new(permit_limit: i64, interval_in_seconds: f64) -> Self {
        Self {
            options: MethodOptions::new(permit_limit),
            interval_in_seconds,
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

    fn interval_ticks(&self) -> Ticks {
        ticks::from_secs_f64(self.interval_in_seconds)
    }

    fn is_disabled(&self) -> bool {
        self.interval_ticks() <= 0 || self.options.permit_limit <= 0
    }

    /// End of the window containing `now`.
    fn window_end(&self, now: Ticks) -> Ticks {
        let interval = self.interval_ticks();
        now - now.rem_euclid(interval) + interval
    }
}

#[async_trait]
impl RateLimitMethod for FixedWindow {
    fn options(&self) -> &MethodOptions {
        &self.options
    }

    fn cache_key(&self) -> String {
        format!("FixedWindow({},{})", self.options.permit_limit, self.interval_in_seconds)
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

        let expires_at = self.window_end(self.clock.now_ticks());
        let count = store
            .increment_and_get(key, cost, expires_at, TtlPolicy::SetAbsoluteTtl, cost, request)
            .await?;

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
        Ok(store.get(key, request).await? >= self.options.permit_limit)
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
            "FixedWindow",
            &self.options,
            self.retry_after_secs(),
            &[("interval_in_seconds", self.interval_in_seconds.to_string())],
        )
    }
}
