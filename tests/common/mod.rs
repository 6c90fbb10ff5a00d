#![allow(dead_code)]

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use turnstile::error::StoreError;
use turnstile::request::RequestProxy;
use turnstile::store::{CounterStore, InMemoryCounterStore, TtlPolicy};
use turnstile::ticks::Ticks;

/// Route `tracing` output through the test harness so `--nocapture` shows it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn refused() -> StoreError {
    StoreError::unavailable(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"))
}

/// Store whose backend is always unreachable. Counts the calls it rejects.
#[derive(Debug, Clone, Default)]
pub struct FailingStore {
    calls: Arc<AtomicUsize>,
}

impl FailingStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(refused())
    }
}

#[async_trait]
impl CounterStore for FailingStore {
    async fn get(&self, _key: &str, _request: &dyn RequestProxy) -> Result<i64, StoreError> {
        self.fail()
    }

    async fn increment_and_get(
        &self,
        _key: &str,
        _cost: i64,
        _ttl: Ticks,
        _policy: TtlPolicy,
        _max_counter_value_to_set_ttl: i64,
        _request: &dyn RequestProxy,
    ) -> Result<i64, StoreError> {
        self.fail()
    }

    async fn decrement(
        &self,
        _key: &str,
        _cost: i64,
        _request: &dyn RequestProxy,
    ) -> Result<(), StoreError> {
        self.fail()
    }
}

/// In-memory store that is unreachable for keys starting with `prefix`.
#[derive(Debug, Clone)]
pub struct PartitionedStore {
    pub inner: InMemoryCounterStore,
    prefix: String,
}

impl PartitionedStore {
    pub fn new(inner: InMemoryCounterStore, prefix: impl Into<String>) -> Self {
        Self { inner, prefix: prefix.into() }
    }

    fn check(&self, key: &str) -> Result<(), StoreError> {
        if key.starts_with(&self.prefix) {
            Err(refused())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CounterStore for PartitionedStore {
    async fn get(&self, key: &str, request: &dyn RequestProxy) -> Result<i64, StoreError> {
        self.check(key)?;
        self.inner.get(key, request).await
    }

    async fn increment_and_get(
        &self,
        key: &str,
        cost: i64,
        ttl: Ticks,
        policy: TtlPolicy,
        max_counter_value_to_set_ttl: i64,
        request: &dyn RequestProxy,
    ) -> Result<i64, StoreError> {
        self.check(key)?;
        self.inner
            .increment_and_get(key, cost, ttl, policy, max_counter_value_to_set_ttl, request)
            .await
    }

    async fn decrement(
        &self,
        key: &str,
        cost: i64,
        request: &dyn RequestProxy,
    ) -> Result<(), StoreError> {
        self.check(key)?;
        self.inner.decrement(key, cost, request).await
    }
}

/// In-memory store whose backend can be taken down and brought back.
#[derive(Debug, Clone)]
pub struct ToggleStore {
    pub inner: InMemoryCounterStore,
    down: Arc<AtomicBool>,
}

impl ToggleStore {
    pub fn new(inner: InMemoryCounterStore) -> Self {
        Self { inner, down: Arc::new(AtomicBool::new(false)) }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(refused())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CounterStore for ToggleStore {
    async fn get(&self, key: &str, request: &dyn RequestProxy) -> Result<i64, StoreError> {
        self.check()?;
        self.inner.get(key, request).await
    }

    async fn increment_and_get(
        &self,
        key: &str,
        cost: i64,
        ttl: Ticks,
        policy: TtlPolicy,
        max_counter_value_to_set_ttl: i64,
        request: &dyn RequestProxy,
    ) -> Result<i64, StoreError> {
        self.check()?;
        self.inner
            .increment_and_get(key, cost, ttl, policy, max_counter_value_to_set_ttl, request)
            .await
    }

    async fn decrement(
        &self,
        key: &str,
        cost: i64,
        request: &dyn RequestProxy,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.decrement(key, cost, request).await
    }
}
