//! Error types for counter stores, rate-limit methods and the admission layer
use std::fmt;
use std::time::Duration;

/// Boxed error used to carry backend-specific failures through the store contract.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by a [`CounterStore`](crate::store::CounterStore).
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The backend could not be reached (connection refused, dropped, timed out).
    #[error("counter store unavailable: {0}")]
    Unavailable(#[source] BoxError),
    /// The backend was reachable but the operation failed.
    #[error("counter store operation on `{key}` failed: {source}")]
    Backend {
        key: String,
        #[source]
        source: BoxError,
    },
}

impl StoreError {
    pub fn unavailable(err: impl Into<BoxError>) -> Self {
        Self::Unavailable(err.into())
    }

    pub fn backend(key: impl Into<String>, err: impl Into<BoxError>) -> Self {
        Self::Backend { key: key.into(), source: err.into() }
    }

    /// Check if this error is a connectivity failure
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Failure surfaced by a rate-limit method or the [`Limiter`](crate::limiter::Limiter).
#[derive(thiserror::Error, Debug)]
pub enum RateLimitError {
    /// The store failed and the rule is configured to fail closed.
    #[error("rate limit `{cache_key}` could not be evaluated: {source}")]
    Store {
        cache_key: String,
        #[source]
        source: StoreError,
    },
    /// A rule or limiter was declared with unusable parameters.
    #[error("invalid rate limit configuration: {0}")]
    InvalidConfig(String),
}

impl RateLimitError {
    /// Borrow the store failure, if this error came from the store.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store { source, .. } => Some(source),
            Self::InvalidConfig(_) => None,
        }
    }
}

/// Error returned by [`RateLimitService`](crate::limiter::RateLimitService).
#[derive(Debug)]
pub enum AdmissionError<E> {
    /// A rule rejected the request.
    Rejected { rule: String, retry_after: Duration },
    /// The limiter could not reach a decision (fail-closed store failure).
    Limiter(RateLimitError),
    /// The wrapped service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for AdmissionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { rule, retry_after } => {
                write!(f, "rate limit `{}` exceeded (retry after {:?})", rule, retry_after)
            }
            Self::Limiter(e) => write!(f, "{}", e),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AdmissionError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Limiter(e) => Some(e),
            Self::Inner(e) => Some(e),
            Self::Rejected { .. } => None,
        }
    }
}

impl<E> AdmissionError<E> {
    /// Check if a rule rejected the request
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
    /// Check if the limiter itself failed
    pub fn is_limiter(&self) -> bool {
        matches!(self, Self::Limiter(_))
    }
    /// Suggested wait before retrying, if rejected.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Rejected { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}
