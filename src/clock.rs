//! Wall-clock abstraction used by window-aligned methods and the in-memory store.

use crate::ticks::{self, Ticks};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock abstraction so expirations and window boundaries can be faked in tests.
///
/// Unlike a monotonic clock this reports ticks since the Unix epoch, because
/// absolute expirations are shared with other processes through the store.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_ticks(&self) -> Ticks;
}

/// Clock backed by `SystemTime::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ticks(&self) -> Ticks {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(ticks::from_duration)
            .unwrap_or_default()
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same instant.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: Ticks) -> Self {
        Self { now: Arc::new(AtomicI64::new(start)) }
    }

    pub fn set(&self, now: Ticks) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(ticks::from_duration(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ticks(&self) -> Ticks {
        self.now.load(Ordering::SeqCst)
    }
}
