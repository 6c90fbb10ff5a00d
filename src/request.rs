//! Opaque request handle threaded through every store and method call.

/// Whatever the host's request adapter needs to carry alongside a rate-limit
/// check. The engine never looks inside beyond the optional correlation id,
/// which only feeds log fields.
pub trait RequestProxy: Send + Sync {
    fn correlation_id(&self) -> Option<&str> {
        None
    }
}

/// No request context.
impl RequestProxy for () {}

/// A bare correlation id.
impl RequestProxy for String {
    fn correlation_id(&self) -> Option<&str> {
        Some(self.as_str())
    }
}
