//! Rate-limit methods.
//!
//! A [`RateLimitMethod`] turns "key X wants `cost` units" into a [`Decision`],
//! using a [`CounterStore`] for all shared state:
//! - [`LeakyBucket`]: FIFO draining with a queueing delay for admitted requests.
//! - [`FixedWindow`]: counter reset at wall-clock interval boundaries.
//! - [`SlidingWindow`]: window split into buckets that age out one by one.
//! - [`Semaphore`]: concurrency limit; capacity is released explicitly.
//!
//! Methods are immutable once built and are shared as `Arc<dyn RateLimitMethod>`.
//! They hold no locks across store calls; concurrency correctness comes entirely
//! from the store's atomic increment.

use crate::error::{RateLimitError, StoreError};
use crate::request::RequestProxy;
use crate::store::CounterStore;
use async_trait::async_trait;
use std::time::Duration;
use tracing::Instrument;

pub mod fixed_window;
pub mod leaky_bucket;
pub mod semaphore;
pub mod sliding_window;

pub use fixed_window::FixedWindow;
pub use leaky_bucket::LeakyBucket;
pub use semaphore::Semaphore;
pub use sliding_window::SlidingWindow;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Admitted {
        /// Capacity left after this request. `u64::MAX` when the method is disabled.
        remaining: u64,
    },
    /// The request must not proceed.
    Rejected {
        /// Hint for `Retry-After`; not a guarantee.
        retry_after: Duration,
    },
}

impl Decision {
    /// Admission without any limit in effect.
    pub const UNLIMITED: Decision = Decision::Admitted { remaining: u64::MAX };

    pub(crate) fn admitted(permit_limit: i64, count: i64) -> Self {
        Decision::Admitted { remaining: u64::try_from(permit_limit - count).unwrap_or(0) }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }

    pub fn remaining(&self) -> Option<u64> {
        match self {
            Decision::Admitted { remaining } => Some(*remaining),
            Decision::Rejected { .. } => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Rejected { retry_after } => Some(*retry_after),
            Decision::Admitted { .. } => None,
        }
    }
}

/// A [`Decision`] together with how it was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub decision: Decision,
    /// The store failed and a fail-open rule admitted anyway. No capacity was
    /// consumed.
    pub failed_open: bool,
}

/// Settings shared by every method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodOptions {
    /// Units admitted per window (or concurrently). Non-positive disables the method.
    pub permit_limit: i64,
    /// Admit instead of failing when the store errors.
    pub fail_open: bool,
    /// Apply this limit even to allow-listed callers.
    pub ignore_allow_list: bool,
}

impl MethodOptions {
    pub fn new(permit_limit: i64) -> Self {
        Self { permit_limit, fail_open: false, ignore_allow_list: false }
    }
}

/// Tags shared by every method, prefixed with the method kind, followed by `extra`.
pub(crate) fn method_tags(
    kind: &str,
    options: &MethodOptions,
    retry_after_secs: u64,
    extra: &[(&str, String)],
) -> Vec<(String, String)> {
    let common = [
        ("permit_limit", options.permit_limit.to_string()),
        ("fail_open", options.fail_open.to_string()),
        ("ignore_allow_list", options.ignore_allow_list.to_string()),
        ("retry_after_secs", retry_after_secs.to_string()),
    ];
    common
        .iter()
        .chain(extra)
        .map(|(name, value)| (format!("{}.{}", kind, name), value.clone()))
        .collect()
}

/// The polymorphic admission strategy.
///
/// Implementors provide the raw algorithm in [`try_is_exceeded`](Self::try_is_exceeded);
/// callers use [`is_exceeded`](Self::is_exceeded), which adds the fail-open policy
/// and tracing.
#[async_trait]
pub trait RateLimitMethod: Send + Sync + std::fmt::Debug {
    /// Shared settings of this rule.
    fn options(&self) -> &MethodOptions;

    /// Deterministic identity from kind and parameters. Two methods with equal
    /// cache keys are interchangeable.
    fn cache_key(&self) -> String;

    /// How long a rejected caller should wait before trying again.
    fn retry_after_secs(&self) -> u64;

    /// Consume `cost` units for `key` and decide. Store failures are returned as is.
    async fn try_is_exceeded(
        &self,
        key: &str,
        cost: i64,
        store: &dyn CounterStore,
        request: &dyn RequestProxy,
    ) -> Result<Decision, StoreError>;

    /// Whether `key` is still over its limit, without consuming anything.
    async fn is_still_exceeded(
        &self,
        key: &str,
        store: &dyn CounterStore,
        request: &dyn RequestProxy,
    ) -> Result<bool, StoreError>;

    /// Give back `cost` units reserved by an earlier admission. Only methods that
    /// reserve on entry (e.g. [`Semaphore`]) do anything here.
    async fn decrement(
        &self,
        key: &str,
        cost: i64,
        store: &dyn CounterStore,
        request: &dyn RequestProxy,
    ) -> Result<(), StoreError>;

    /// Name/value pairs describing this rule. Recorded as `tags` on the
    /// `rate_limit` span and available for exporters that build their own spans.
    fn telemetry_tags(&self) -> Vec<(String, String)>;

    /// Rejection carrying this method's retry hint.
    fn rejection(&self) -> Decision {
        Decision::Rejected { retry_after: Duration::from_secs(self.retry_after_secs()) }
    }

    /// Admission check with the fail-open policy applied.
    ///
    /// On a store failure, a fail-open rule admits with unlimited remaining
    /// capacity; a fail-closed rule returns [`RateLimitError::Store`].
    async fn is_exceeded(
        &self,
        key: &str,
        cost: i64,
        store: &dyn CounterStore,
        request: &dyn RequestProxy,
    ) -> Result<Decision, RateLimitError> {
        Ok(self.evaluate(key, cost, store, request).await?.decision)
    }

    /// Like [`is_exceeded`](Self::is_exceeded), but also reports whether the
    /// admission came from the fail-open path, in which case nothing was
    /// reserved and nothing may be given back.
    async fn evaluate(
        &self,
        key: &str,
        cost: i64,
        store: &dyn CounterStore,
        request: &dyn RequestProxy,
    ) -> Result<Evaluation, RateLimitError> {
        if cost <= 0 {
            return Err(RateLimitError::InvalidConfig(format!(
                "cost must be positive (got {})",
                cost
            )));
        }

        let options = *self.options();
        let cache_key = self.cache_key();
        let span = tracing::debug_span!(
            "rate_limit",
            method = %cache_key,
            permit_limit = options.permit_limit,
            fail_open = options.fail_open,
            ignore_allow_list = options.ignore_allow_list,
            retry_after_secs = self.retry_after_secs(),
            tags = ?self.telemetry_tags(),
            correlation_id = request.correlation_id(),
        );

        async move {
            match self.try_is_exceeded(key, cost, store, request).await {
                Ok(decision) => {
                    tracing::debug!(key, cost, ?decision, "rate limit evaluated");
                    Ok(Evaluation { decision, failed_open: false })
                }
                Err(error) if options.fail_open => {
                    tracing::warn!(key, %error, "counter store failed; admitting (fail-open)");
                    Ok(Evaluation { decision: Decision::UNLIMITED, failed_open: true })
                }
                Err(error) => Err(RateLimitError::Store { cache_key, source: error }),
            }
        }
        .instrument(span)
        .await
    }
}
