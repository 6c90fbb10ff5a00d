//! Convenient re-exports for common Turnstile types.
pub use crate::{
    limiter::{Admission, Limiter, Permit, RateLimitLayer, Rule},
    rate_limit::{Decision, FixedWindow, LeakyBucket, RateLimitMethod, Semaphore, SlidingWindow},
    request::RequestProxy,
    store::{CounterStore, InMemoryCounterStore, TtlPolicy},
    telemetry::{LimitEvent, LogSink, MemorySink, NullSink, TelemetrySink},
    AdmissionError, RateLimitError, StoreError,
};
