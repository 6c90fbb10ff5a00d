use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::request::RequestProxy;
use crate::store::{CounterStore, TtlPolicy};
use crate::ticks::{self, Ticks};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    count: i64,
    expires_at: Option<Ticks>,
}

impl Entry {
    const EMPTY: Entry = Entry { count: 0, expires_at: None };

    fn is_expired(&self, now: Ticks) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// In-process counter store.
///
/// Every operation runs as a single read-modify-write on one `DashMap` entry,
/// under that entry's shard lock, so concurrent callers within the process
/// serialize per key without any extra locking. Expiry is lazy: an expired
/// entry reads as `0` and is replaced by the next increment. Keys that are
/// never touched again are dropped by a sweep that piggybacks on
/// `increment_and_get` once per sweep interval (60 s by default), so no
/// background task is needed.
///
/// **Single-process only.** Counters are not shared between instances; use a
/// distributed store when several processes enforce the same limits.
///
/// Clones share the same counters.
#[derive(Debug, Clone)]
pub struct InMemoryCounterStore {
    entries: Arc<DashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    sweep_interval: Ticks,
    next_sweep: Arc<AtomicI64>,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Use `clock` to evaluate expirations (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        let sweep_interval = ticks::from_duration(Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS));
        let next_sweep = clock.now_ticks().saturating_add(sweep_interval);
        Self {
            entries: Arc::new(DashMap::new()),
            clock: Arc::new(clock),
            sweep_interval,
            next_sweep: Arc::new(AtomicI64::new(next_sweep)),
        }
    }

    /// How often expired counters are swept during increments.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = ticks::from_duration(interval).max(1);
        let next = self.clock.now_ticks().saturating_add(self.sweep_interval);
        self.next_sweep.store(next, Ordering::SeqCst);
        self
    }

    /// Remaining TTL of `key` in ticks, `None` if absent, expired or without expiry.
    pub fn ttl(&self, key: &str) -> Option<Ticks> {
        let now = self.clock.now_ticks();
        let entry = self.entries.get(key)?;
        match entry.expires_at {
            Some(at) if at > now => Some(at - now),
            _ => None,
        }
    }

    /// Number of live (unexpired) counters.
    pub fn len(&self) -> usize {
        let now = self.clock.now_ticks();
        self.entries.iter().filter(|e| !e.value().is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored counters, expired ones not yet swept included.
    pub fn stored_len(&self) -> usize {
        self.entries.len()
    }

    /// Drop expired counters, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ticks();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Sweep when the deadline has passed. Only the caller that advances the
    /// deadline sweeps; everyone else goes on.
    fn maybe_sweep(&self, now: Ticks) {
        let due = self.next_sweep.load(Ordering::Acquire);
        if now < due {
            return;
        }
        let next = now.saturating_add(self.sweep_interval);
        if self
            .next_sweep
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let removed = self.purge_expired();
            tracing::trace!(target: "turnstile::store", removed, "swept expired counters");
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, key: &str, _request: &dyn RequestProxy) -> Result<i64, StoreError> {
        let now = self.clock.now_ticks();
        Ok(match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => entry.count,
            _ => 0,
        })
    }

    async fn increment_and_get(
        &self,
        key: &str,
        cost: i64,
        ttl: Ticks,
        policy: TtlPolicy,
        max_counter_value_to_set_ttl: i64,
        _request: &dyn RequestProxy,
    ) -> Result<i64, StoreError> {
        let now = self.clock.now_ticks();
        // Must run before the entry guard below is taken; `retain` locks every shard.
        self.maybe_sweep(now);
        let mut entry = self.entries.entry(key.to_owned()).or_insert(Entry::EMPTY);
        if entry.is_expired(now) {
            *entry = Entry::EMPTY;
        }

        entry.count = entry.count.saturating_add(cost);
        let count = entry.count;

        match policy {
            TtlPolicy::IncrementTtl => {
                if count <= max_counter_value_to_set_ttl {
                    let remaining = entry.expires_at.map_or(0, |at| (at - now).max(0));
                    entry.expires_at = Some(now.saturating_add(remaining).saturating_add(ttl));
                } else if entry.expires_at.is_none() {
                    // Created past the ceiling in one step; give it a single leak interval.
                    entry.expires_at = Some(now.saturating_add(ttl));
                }
            }
            TtlPolicy::SetAbsoluteTtl => {
                if count <= max_counter_value_to_set_ttl || entry.expires_at.is_none() {
                    entry.expires_at = Some(ttl);
                }
            }
        }

        Ok(count)
    }

    async fn decrement(
        &self,
        key: &str,
        cost: i64,
        _request: &dyn RequestProxy,
    ) -> Result<(), StoreError> {
        let now = self.clock.now_ticks();
        if let MapEntry::Occupied(mut occupied) = self.entries.entry(key.to_owned()) {
            if occupied.get().is_expired(now) {
                occupied.remove();
                return Ok(());
            }
            let entry = occupied.get_mut();
            entry.count = entry.count.saturating_sub(cost);
            if entry.count < 1 {
                occupied.remove();
            }
        }
        Ok(())
    }
}
