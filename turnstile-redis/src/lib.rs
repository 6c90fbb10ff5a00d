//! Redis counter store for `turnstile` (companion crate).
//!
//! Every mutating operation is a single Lua script, so increment and TTL
//! maintenance happen atomically on the server no matter how many processes
//! share the counters. Scripts are sent by `EVALSHA` and loaded on demand.
//!
//! Bring your own connection (anything implementing
//! [`ConnectionLike`](redis::aio::ConnectionLike) + `Clone`) or let
//! [`RedisCounterStore::connect`] build a [`ConnectionManager`] that reconnects
//! on its own. Create the store once and share it; it is cheap to clone.

use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::{AsyncCommands, RedisError, Script};
use std::fmt;
use std::sync::Arc;
use turnstile::error::StoreError;
use turnstile::request::RequestProxy;
use turnstile::store::{CounterStore, TtlPolicy};
use turnstile::ticks::{self, Ticks};

#[derive(Debug)]
struct Scripts {
    increment_ttl: Script,
    set_absolute_ttl: Script,
    decrement: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            increment_ttl: Script::new(include_str!("../scripts/increment_ttl.lua")),
            set_absolute_ttl: Script::new(include_str!("../scripts/set_absolute_ttl.lua")),
            decrement: Script::new(include_str!("../scripts/decrement.lua")),
        }
    }
}

/// Counter store backed by Redis.
#[derive(Clone)]
pub struct RedisCounterStore<C = ConnectionManager> {
    conn: C,
    scripts: Arc<Scripts>,
}

impl<C> fmt::Debug for RedisCounterStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore").field("conn", &"<redis connection>").finish()
    }
}

impl RedisCounterStore<ConnectionManager> {
    /// Open a managed, auto-reconnecting connection to `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::backend("<connection url>", e))?;
        let conn = ConnectionManager::new(client).await.map_err(StoreError::unavailable)?;
        tracing::debug!(target: "turnstile::redis", "connected counter store");
        Ok(Self::new(conn))
    }
}

impl<C> RedisCounterStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    /// Wrap an existing connection handle.
    pub fn new(conn: C) -> Self {
        Self { conn, scripts: Arc::new(Scripts::load()) }
    }
}

fn is_unreachable(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_timeout()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
}

fn classify(key: &str, err: RedisError) -> StoreError {
    if is_unreachable(&err) {
        StoreError::unavailable(err)
    } else {
        StoreError::backend(key, err)
    }
}

#[async_trait]
impl<C> CounterStore for RedisCounterStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str, _request: &dyn RequestProxy) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await.map_err(|e| classify(key, e))?;
        Ok(value.unwrap_or(0))
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
        let script = match policy {
            TtlPolicy::IncrementTtl => &self.scripts.increment_ttl,
            TtlPolicy::SetAbsoluteTtl => &self.scripts.set_absolute_ttl,
        };
        let ttl_ms = ticks::to_millis_ceil(ttl);

        let mut conn = self.conn.clone();
        let count: i64 = script
            .key(key)
            .arg(cost)
            .arg(ttl_ms)
            .arg(max_counter_value_to_set_ttl)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| classify(key, e))?;

        tracing::trace!(
            target: "turnstile::redis",
            key,
            cost,
            count,
            ?policy,
            ttl_ms,
            "incremented counter"
        );
        Ok(count)
    }

    async fn decrement(
        &self,
        key: &str,
        cost: i64,
        _request: &dyn RequestProxy,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .scripts
            .decrement
            .key(key)
            .arg(cost)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| classify(key, e))?;
        Ok(())
    }
}
