#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Turnstile
//!
//! Request admission for async Rust. Rate-limit methods decide whether a
//! request may proceed, using a shared counter store for all of their state.
//!
//! ## Features
//!
//! - **Leaky bucket** with queueing delay for admitted requests
//! - **Fixed and sliding windows** aligned to wall-clock intervals
//! - **Semaphore** for concurrency limits with self-healing leases
//! - **Pluggable counter stores**: in-process (`DashMap`) or Redis via the
//!   `turnstile-redis` crate, both atomic per key
//! - **Fail-open** per rule when the store is unreachable
//! - **Tower middleware** and a telemetry sink built on `tower::Service`
//!
//! ## Quick Start
//!
//! ```rust
//! use turnstile::rate_limit::{Decision, LeakyBucket, RateLimitMethod};
//! use turnstile::sleeper::InstantSleeper;
//! use turnstile::store::InMemoryCounterStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryCounterStore::new();
//!     let bucket = LeakyBucket::new(3, 3.0).with_sleeper(InstantSleeper);
//!
//!     for expected in [2, 1, 0] {
//!         let decision = bucket.is_exceeded("client-1", 1, &store, &()).await.unwrap();
//!         assert_eq!(decision, Decision::Admitted { remaining: expected });
//!     }
//!     assert!(!bucket.is_exceeded("client-1", 1, &store, &()).await.unwrap().is_admitted());
//! }
//! ```

pub mod clock;
#[cfg(feature = "config")]
pub mod config;
pub mod error;
pub mod limiter;
pub mod prelude;
pub mod rate_limit;
pub mod request;
pub mod sleeper;
pub mod store;
pub mod telemetry;
pub mod ticks;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AdmissionError, BoxError, RateLimitError, StoreError};
pub use limiter::{
    Admission, Limiter, LimiterBuilder, Permit, RateLimitLayer, RateLimitService, Rule,
};
pub use rate_limit::{
    Decision, Evaluation, FixedWindow, LeakyBucket, MethodOptions, RateLimitMethod, Semaphore,
    SlidingWindow,
};
pub use request::RequestProxy;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use store::{CounterStore, InMemoryCounterStore, TtlPolicy};
pub use ticks::Ticks;
