//! Telemetry for admission decisions.
//!
//! The [`Limiter`](crate::limiter::Limiter) emits a [`LimitEvent`] for every
//! rule it evaluates. Events flow through a [`TelemetrySink`], which is just a
//! `tower::Service<LimitEvent>` so sinks compose with ordinary tower tooling.
//!
//! Emission is best-effort: a sink that is not ready or that fails never
//! affects the admission outcome.
//!
//! ```rust
//! use turnstile::telemetry::LimitEvent;
//! use std::time::Duration;
//!
//! let event = LimitEvent::Rejected {
//!     rule: "api".into(),
//!     client: "10.0.0.1".into(),
//!     retry_after: Duration::from_secs(3),
//! };
//! assert_eq!(event.rule(), "api");
//! ```

use std::convert::Infallible;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// A telemetry sink that consumes limiter events.
///
/// # Implementing a Custom Sink
///
/// ```rust
/// use turnstile::telemetry::{LimitEvent, TelemetrySink};
/// use tower::Service;
/// use std::task::{Context, Poll};
/// use std::pin::Pin;
/// use std::future::Future;
///
/// #[derive(Clone)]
/// struct PrintSink;
///
/// impl Service<LimitEvent> for PrintSink {
///     type Response = ();
///     type Error = std::convert::Infallible;
///     type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;
///
///     fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
///         Poll::Ready(Ok(()))
///     }
///
///     fn call(&mut self, event: LimitEvent) -> Self::Future {
///         println!("{}", event);
///         Box::pin(async { Ok(()) })
///     }
/// }
///
/// impl TelemetrySink for PrintSink {
///     type SinkError = std::convert::Infallible;
/// }
/// ```
pub trait TelemetrySink:
    Service<LimitEvent, Response = (), Error = Self::SinkError> + Clone + Send + Sync + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Send `event` to `sink` if it becomes ready; errors are dropped.
pub async fn emit_best_effort<S>(sink: S, event: LimitEvent)
where
    S: Service<LimitEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// What happened when one rule looked at one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitEvent {
    /// The rule admitted the request.
    Admitted {
        rule: String,
        client: String,
        /// Capacity left after this request (`u64::MAX` when unlimited).
        remaining: u64,
    },
    /// The rule rejected the request.
    Rejected { rule: String, client: String, retry_after: Duration },
    /// The client is allow-listed and the rule was skipped.
    Exempt { rule: String, client: String },
    /// Reserved capacity was handed back to the rule.
    Released { rule: String, client: String, cost: i64 },
    /// The store failed and the rule was configured to fail closed.
    StoreFailure { rule: String, client: String },
}

impl LimitEvent {
    /// Identity of the rule this event concerns.
    pub fn rule(&self) -> &str {
        match self {
            LimitEvent::Admitted { rule, .. }
            | LimitEvent::Rejected { rule, .. }
            | LimitEvent::Exempt { rule, .. }
            | LimitEvent::Released { rule, .. }
            | LimitEvent::StoreFailure { rule, .. } => rule,
        }
    }

    /// Client key this event concerns.
    pub fn client(&self) -> &str {
        match self {
            LimitEvent::Admitted { client, .. }
            | LimitEvent::Rejected { client, .. }
            | LimitEvent::Exempt { client, .. }
            | LimitEvent::Released { client, .. }
            | LimitEvent::StoreFailure { client, .. } => client,
        }
    }
}

impl fmt::Display for LimitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitEvent::Admitted { rule, client, remaining } => {
                write!(f, "{}::Admitted(client={}, remaining={})", rule, client, remaining)
            }
            LimitEvent::Rejected { rule, client, retry_after } => {
                write!(f, "{}::Rejected(client={}, retry_after={:?})", rule, client, retry_after)
            }
            LimitEvent::Exempt { rule, client } => write!(f, "{}::Exempt(client={})", rule, client),
            LimitEvent::Released { rule, client, cost } => {
                write!(f, "{}::Released(client={}, cost={})", rule, client, cost)
            }
            LimitEvent::StoreFailure { rule, client } => {
                write!(f, "{}::StoreFailure(client={})", rule, client)
            }
        }
    }
}

type SinkFuture<E> = Pin<Box<dyn std::future::Future<Output = Result<(), E>> + Send>>;

/// Discards every event.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<LimitEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: LimitEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Logs events through `tracing`: rejections and store failures at WARN,
/// everything else at INFO.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<LimitEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: LimitEvent) -> Self::Future {
        match &event {
            LimitEvent::Rejected { .. } | LimitEvent::StoreFailure { .. } => {
                tracing::warn!(event = %event, "limit_event")
            }
            _ => tracing::info!(event = %event, "limit_event"),
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps events in memory, evicting the oldest beyond `capacity`.
///
/// ```rust
/// use turnstile::telemetry::{LimitEvent, MemorySink};
/// use tower::Service;
///
/// # #[tokio::main]
/// # async fn main() {
/// let mut sink = MemorySink::new();
/// let event = LimitEvent::Exempt { rule: "api".into(), client: "ops".into() };
/// sink.call(event.clone()).await.unwrap();
/// assert_eq!(sink.events(), vec![event]);
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<LimitEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Bounded sink holding up to 10,000 events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LimitEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the stored events, oldest first.
    pub fn events(&self) -> Vec<LimitEvent> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of events dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<LimitEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: LimitEvent) -> Self::Future {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(client: &str) -> LimitEvent {
        LimitEvent::Rejected {
            rule: "api".into(),
            client: client.into(),
            retry_after: Duration::from_secs(2),
        }
    }

    #[test]
    fn display_names_rule_and_outcome() {
        let text = rejected("alice").to_string();
        assert!(text.starts_with("api::Rejected"));
        assert!(text.contains("client=alice"));

        let released = LimitEvent::Released { rule: "db".into(), client: "bob".into(), cost: 2 };
        assert_eq!(released.rule(), "db");
        assert_eq!(released.client(), "bob");
        assert!(released.to_string().contains("cost=2"));
    }

    #[tokio::test]
    async fn null_sink_accepts_everything() {
        let mut sink = NullSink;
        sink.call(rejected("a")).await.unwrap();
    }

    #[tokio::test]
    async fn memory_sink_evicts_oldest() {
        let mut sink = MemorySink::with_capacity(2);
        assert!(sink.is_empty());
        for client in ["a", "b", "c"] {
            sink.call(rejected(client)).await.unwrap();
        }
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.evicted(), 1);
        assert_eq!(sink.events()[0].client(), "b");

        sink.clear();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn emit_best_effort_delivers() {
        let sink = MemorySink::new();
        emit_best_effort(sink.clone(), rejected("x")).await;
        emit_best_effort(LogSink, rejected("y")).await;
        assert_eq!(sink.events(), vec![rejected("x")]);
    }
}
