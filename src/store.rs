//! Counter store contract.
//!
//! A counter store keeps one signed integer per key together with an expiration.
//! Rate-limit methods never lock anything themselves: every admission decision
//! is serialized by the store's atomic increment-and-TTL operation, which is
//! what lets several processes share one backend.
//!
//! Implementations:
//! - [`InMemoryCounterStore`]: one process, `DashMap` entry locks.
//! - `RedisCounterStore` (crate `turnstile-redis`): server-side Lua scripts.

use crate::error::StoreError;
use crate::request::RequestProxy;
use crate::ticks::Ticks;
use async_trait::async_trait;

pub mod memory;
pub use memory::InMemoryCounterStore;

/// How [`CounterStore::increment_and_get`] interprets its `ttl` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlPolicy {
    /// `ttl` is an absolute expiry instant (ticks since the Unix epoch).
    ///
    /// Applied when the incremented value is at or below the ceiling, or when the
    /// key carries no expiry at all. The second clause keeps a counter that was
    /// somehow created without a TTL from living forever.
    SetAbsoluteTtl,
    /// `ttl` is a duration added to whatever TTL remains (negative or missing
    /// counts as zero).
    ///
    /// Applied only while the incremented value is at or below the ceiling. Past
    /// the ceiling the expiry stays put, so an overflowed counter drains on its own.
    IncrementTtl,
}

/// Storage backend for rate-limit counters.
///
/// # Atomicity
///
/// `increment_and_get` must add `cost` and apply the TTL policy as one
/// indivisible step: no caller may observe an incremented counter whose TTL
/// update is still pending, and concurrent callers on one key must never act
/// on stale reads of each other's writes.
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Current value of `key`; `0` when absent or expired. No side effects.
    async fn get(&self, key: &str, request: &dyn RequestProxy) -> Result<i64, StoreError>;

    /// Add `cost` to `key` (creating it at `cost`), apply `policy` and return the
    /// value after the increment.
    async fn increment_and_get(
        &self,
        key: &str,
        cost: i64,
        ttl: Ticks,
        policy: TtlPolicy,
        max_counter_value_to_set_ttl: i64,
        request: &dyn RequestProxy,
    ) -> Result<i64, StoreError>;

    /// Subtract `cost` from `key`, deleting it when the result drops below 1.
    ///
    /// Callers treat failures as non-fatal: counters heal through their TTL anyway.
    async fn decrement(
        &self,
        key: &str,
        cost: i64,
        request: &dyn RequestProxy,
    ) -> Result<(), StoreError>;
}
