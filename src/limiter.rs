//! Rule orchestration.
//!
//! A [`Limiter`] owns one counter store and an ordered list of [`Rule`]s. For
//! every request it asks each rule in turn, stops at the first rejection and
//! hands back a [`Permit`] when all rules admit.
//!
//! ```rust
//! use turnstile::limiter::{Admission, Limiter, Rule};
//! use turnstile::rate_limit::FixedWindow;
//! use turnstile::store::InMemoryCounterStore;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), turnstile::RateLimitError> {
//! let limiter = Limiter::builder()
//!     .store(InMemoryCounterStore::new())
//!     .rule(Rule::new(FixedWindow::new(2, 60.0)).named("api"))
//!     .allow("healthcheck")
//!     .build()?;
//!
//! for _ in 0..2 {
//!     assert!(limiter.check("alice", 1, &()).await?.is_admitted());
//! }
//! match limiter.check("alice", 1, &()).await? {
//!     Admission::Rejected { rule, .. } => assert_eq!(rule, "api"),
//!     Admission::Admitted(_) => unreachable!(),
//! }
//! assert!(limiter.check("healthcheck", 1, &()).await?.is_admitted());
//! # Ok(())
//! # }
//! ```

mod middleware;

pub use middleware::{RateLimitLayer, RateLimitService};

use crate::error::RateLimitError;
use crate::rate_limit::{Decision, Evaluation, RateLimitMethod};
use crate::request::RequestProxy;
use crate::store::CounterStore;
use crate::telemetry::{emit_best_effort, LimitEvent, NullSink, TelemetrySink};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A rate-limit method with an optional display name.
#[derive(Debug, Clone)]
pub struct Rule {
    name: Option<String>,
    method: Arc<dyn RateLimitMethod>,
}

impl Rule {
    pub fn new<M: RateLimitMethod + 'static>(method: M) -> Self {
        Self::from_arc(Arc::new(method))
    }

    pub fn from_arc(method: Arc<dyn RateLimitMethod>) -> Self {
        Self { name: None, method }
    }

    /// Name used in rejections, telemetry and counter keys instead of the cache key.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn method(&self) -> &Arc<dyn RateLimitMethod> {
        &self.method
    }

    /// The rule's name if it has one, otherwise the method's cache key.
    pub fn identity(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.method.cache_key())
    }

    /// Store key holding `client`'s counter for this rule.
    pub fn counter_key(&self, client: &str) -> String {
        format!("{}:{}", self.identity(), client)
    }

    fn is_exempt(&self, allow_listed: bool) -> bool {
        allow_listed && !self.method.options().ignore_allow_list
    }
}

/// Outcome of [`Limiter::check`].
#[derive(Debug)]
pub enum Admission<S = NullSink> {
    /// Every rule admitted. Hold the permit for the duration of the work.
    Admitted(Permit<S>),
    /// `rule` rejected the request.
    Rejected { rule: String, retry_after: Duration },
}

impl<S> Admission<S> {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }

    pub fn into_permit(self) -> Option<Permit<S>> {
        match self {
            Admission::Admitted(permit) => Some(permit),
            Admission::Rejected { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Reservation {
    rule: String,
    key: String,
    method: Arc<dyn RateLimitMethod>,
}

/// Capacity held by an admitted request.
///
/// Call [`release`](Self::release) when the work is done so that rules which
/// reserve on entry ([`Semaphore`](crate::rate_limit::Semaphore)) free their
/// slot. A permit that is dropped without being released is reclaimed only
/// when the underlying counter expires.
#[must_use = "release the permit once the guarded work completes"]
pub struct Permit<S = NullSink> {
    limiter: Limiter<S>,
    client: String,
    cost: i64,
    remaining: u64,
    reservations: Vec<Reservation>,
}

impl<S> fmt::Debug for Permit<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("client", &self.client)
            .field("cost", &self.cost)
            .field("remaining", &self.remaining)
            .field("rules", &self.reservations.iter().map(|r| &r.rule).collect::<Vec<_>>())
            .finish()
    }
}

impl<S> Permit<S>
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn cost(&self) -> i64 {
        self.cost
    }

    /// Smallest remaining capacity across the rules that admitted.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Give the reserved capacity back. Failures are logged and swallowed.
    pub async fn release(self, request: &dyn RequestProxy) {
        self.limiter.release(&self.client, self.cost, &self.reservations, request).await;
    }
}

/// Ordered set of rules over one shared counter store.
///
/// Cloning is cheap; clones share the store, rules and sink.
pub struct Limiter<S = NullSink> {
    store: Arc<dyn CounterStore>,
    rules: Arc<[Rule]>,
    allow_list: Arc<HashSet<String>>,
    sink: S,
}

impl<S: Clone> Clone for Limiter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            rules: self.rules.clone(),
            allow_list: self.allow_list.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<S> fmt::Debug for Limiter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("store", &self.store)
            .field("rules", &self.rules)
            .field("allow_list", &self.allow_list.len())
            .field("sink", &"<sink>")
            .finish()
    }
}

impl Limiter<NullSink> {
    pub fn builder() -> LimiterBuilder<NullSink> {
        LimiterBuilder::new()
    }
}

impl<S> Limiter<S>
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_allow_listed(&self, client: &str) -> bool {
        self.allow_list.contains(client)
    }

    /// Consume `cost` units for `client` from every applicable rule.
    ///
    /// Rules are evaluated in declaration order. On a rejection or a fail-closed
    /// store error, capacity already reserved by earlier rules is released
    /// before returning.
    pub async fn check(
        &self,
        client: &str,
        cost: i64,
        request: &dyn RequestProxy,
    ) -> Result<Admission<S>, RateLimitError> {
        if cost <= 0 {
            return Err(RateLimitError::InvalidConfig(format!(
                "cost must be positive (got {})",
                cost
            )));
        }

        let allow_listed = self.is_allow_listed(client);
        let mut reservations = Vec::with_capacity(self.rules.len());
        let mut remaining = u64::MAX;

        for rule in self.rules.iter() {
            let identity = rule.identity();
            if rule.is_exempt(allow_listed) {
                self.emit(LimitEvent::Exempt { rule: identity, client: client.to_owned() }).await;
                continue;
            }

            let key = rule.counter_key(client);
            match rule.method.evaluate(&key, cost, self.store.as_ref(), request).await {
                Ok(Evaluation {
                    decision: Decision::Admitted { remaining: left },
                    failed_open,
                }) => {
                    remaining = remaining.min(left);
                    self.emit(LimitEvent::Admitted {
                        rule: identity.clone(),
                        client: client.to_owned(),
                        remaining: left,
                    })
                    .await;
                    // A fail-open admission consumed nothing, so there is nothing to give back.
                    if !failed_open {
                        reservations.push(Reservation {
                            rule: identity,
                            key,
                            method: rule.method.clone(),
                        });
                    }
                }
                Ok(Evaluation { decision: Decision::Rejected { retry_after }, .. }) => {
                    tracing::debug!(client, rule = %identity, ?retry_after, "request rejected");
                    self.emit(LimitEvent::Rejected {
                        rule: identity.clone(),
                        client: client.to_owned(),
                        retry_after,
                    })
                    .await;
                    self.release(client, cost, &reservations, request).await;
                    return Ok(Admission::Rejected { rule: identity, retry_after });
                }
                Err(error) => {
                    self.emit(LimitEvent::StoreFailure {
                        rule: identity,
                        client: client.to_owned(),
                    })
                    .await;
                    self.release(client, cost, &reservations, request).await;
                    return Err(error);
                }
            }
        }

        Ok(Admission::Admitted(Permit {
            limiter: self.clone(),
            client: client.to_owned(),
            cost,
            remaining,
            reservations,
        }))
    }

    /// Whether any rule that applies to `client` is still over its limit.
    ///
    /// Consumes nothing. A fail-open rule whose store is unreachable counts as
    /// not exceeded.
    pub async fn is_still_exceeded(
        &self,
        client: &str,
        request: &dyn RequestProxy,
    ) -> Result<bool, RateLimitError> {
        let allow_listed = self.is_allow_listed(client);
        for rule in self.rules.iter().filter(|rule| !rule.is_exempt(allow_listed)) {
            let key = rule.counter_key(client);
            match rule.method.is_still_exceeded(&key, self.store.as_ref(), request).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(error) if rule.method.options().fail_open => {
                    tracing::warn!(
                        client,
                        rule = %rule.identity(),
                        %error,
                        "counter store failed; treating as not exceeded"
                    );
                }
                Err(source) => {
                    let cache_key = rule.method.cache_key();
                    return Err(RateLimitError::Store { cache_key, source });
                }
            }
        }
        Ok(false)
    }

    async fn release(
        &self,
        client: &str,
        cost: i64,
        reservations: &[Reservation],
        request: &dyn RequestProxy,
    ) {
        for reservation in reservations.iter().rev() {
            let released = reservation
                .method
                .decrement(&reservation.key, cost, self.store.as_ref(), request)
                .await;
            match released {
                Ok(()) => {
                    self.emit(LimitEvent::Released {
                        rule: reservation.rule.clone(),
                        client: client.to_owned(),
                        cost,
                    })
                    .await
                }
                Err(error) => {
                    tracing::warn!(
                        client,
                        rule = %reservation.rule,
                        %error,
                        "failed to release reserved capacity"
                    )
                }
            }
        }
    }

    async fn emit(&self, event: LimitEvent) {
        emit_best_effort(self.sink.clone(), event).await;
    }
}

/// Builder for [`Limiter`].
pub struct LimiterBuilder<S = NullSink> {
    store: Option<Arc<dyn CounterStore>>,
    rules: Vec<Rule>,
    allow_list: HashSet<String>,
    sink: S,
}

impl LimiterBuilder<NullSink> {
    pub fn new() -> Self {
        Self { store: None, rules: Vec::new(), allow_list: HashSet::new(), sink: NullSink }
    }
}

impl Default for LimiterBuilder<NullSink> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> LimiterBuilder<S> {
    pub fn store<C: CounterStore + 'static>(self, store: C) -> Self {
        self.shared_store(Arc::new(store))
    }

    /// Use a store handle that is also used elsewhere.
    pub fn shared_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Append a rule. Rules are evaluated in the order they are added.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Exempt `client` from every rule that does not set `ignore_allow_list`.
    pub fn allow(mut self, client: impl Into<String>) -> Self {
        self.allow_list.insert(client.into());
        self
    }

    pub fn sink<T: TelemetrySink>(self, sink: T) -> LimiterBuilder<T> {
        LimiterBuilder { store: self.store, rules: self.rules, allow_list: self.allow_list, sink }
    }

    /// Validate and build. Fails without a store, without rules, or when two
    /// rules would share counters.
    pub fn build(self) -> Result<Limiter<S>, RateLimitError> {
        let store = self
            .store
            .ok_or_else(|| RateLimitError::InvalidConfig("no counter store configured".into()))?;
        if self.rules.is_empty() {
            return Err(RateLimitError::InvalidConfig("at least one rule is required".into()));
        }
        let mut seen = HashSet::new();
        for rule in &self.rules {
            let identity = rule.identity();
            if !seen.insert(identity.clone()) {
                return Err(RateLimitError::InvalidConfig(format!(
                    "duplicate rule identity `{}`",
                    identity
                )));
            }
        }

        Ok(Limiter {
            store,
            rules: self.rules.into(),
            allow_list: Arc::new(self.allow_list),
            sink: self.sink,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rate_limit::{FixedWindow, LeakyBucket, Semaphore};
    use crate::sleeper::InstantSleeper;
    use crate::store::InMemoryCounterStore;
    use crate::telemetry::MemorySink;

    #[test]
    fn rule_identity_prefers_name() {
        let rule = Rule::new(LeakyBucket::new(3, 3.0));
        assert_eq!(rule.identity(), "LeakyBucket(3,3)");
        assert_eq!(rule.counter_key("alice"), "LeakyBucket(3,3):alice");

        let rule = rule.named("login");
        assert_eq!(rule.counter_key("alice"), "login:alice");
    }

    #[test]
    fn build_validates() {
        let err = Limiter::builder().rule(Rule::new(Semaphore::new(1))).build().unwrap_err();
        assert!(err.to_string().contains("store"));

        let err = Limiter::builder().store(InMemoryCounterStore::new()).build().unwrap_err();
        assert!(err.to_string().contains("rule"));

        let err = Limiter::builder()
            .store(InMemoryCounterStore::new())
            .rule(Rule::new(Semaphore::new(1)))
            .rule(Rule::new(Semaphore::new(1)))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[tokio::test]
    async fn non_positive_cost_is_refused() {
        let limiter = Limiter::builder()
            .store(InMemoryCounterStore::new())
            .rule(Rule::new(Semaphore::new(1)))
            .build()
            .unwrap();
        assert!(matches!(limiter.check("a", 0, &()).await, Err(RateLimitError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn remaining_is_the_tightest_rule() {
        let clock = ManualClock::new(0);
        let limiter = Limiter::builder()
            .store(InMemoryCounterStore::with_clock(clock.clone()))
            .rule(Rule::new(FixedWindow::new(10, 60.0).with_clock(clock.clone())))
            .rule(Rule::new(LeakyBucket::new(3, 3.0).with_sleeper(InstantSleeper)))
            .build()
            .unwrap();

        let permit = limiter.check("a", 1, &()).await.unwrap().into_permit().unwrap();
        assert_eq!(permit.remaining(), 2);
        assert_eq!(permit.client(), "a");
        assert_eq!(permit.cost(), 1);
    }

    #[tokio::test]
    async fn events_follow_each_rule() {
        let sink = MemorySink::new();
        let limiter = Limiter::builder()
            .store(InMemoryCounterStore::new())
            .rule(Rule::new(Semaphore::new(5)).named("outer"))
            .rule(Rule::new(Semaphore::new(1)).named("inner"))
            .allow("ops")
            .sink(sink.clone())
            .build()
            .unwrap();

        let permit = limiter.check("a", 1, &()).await.unwrap().into_permit().unwrap();
        assert!(!limiter.check("a", 1, &()).await.unwrap().is_admitted());
        permit.release(&()).await;
        limiter.check("ops", 1, &()).await.unwrap();

        let kinds: Vec<String> = sink
            .events()
            .iter()
            .map(|e| e.to_string().split('(').next().unwrap_or_default().to_string())
            .collect();
        assert_eq!(
            kinds,
            vec![
                "outer::Admitted",
                "inner::Admitted",
                "outer::Admitted",
                "inner::Rejected",
                "outer::Released",
                "inner::Released",
                "outer::Released",
                "outer::Exempt",
                "inner::Exempt",
            ]
        );
    }
}
