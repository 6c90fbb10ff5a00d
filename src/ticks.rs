//! Tick arithmetic shared by rate-limit methods and counter stores.
//!
//! Every TTL or delay that crosses the [`CounterStore`](crate::store::CounterStore)
//! contract is expressed in ticks of 100ns (10,000,000 per second). Integer ticks
//! keep window math exact where `f64` seconds would drift. Absolute instants are
//! ticks since the Unix epoch (UTC).

use std::time::Duration;

/// Ticks are signed so that "remaining" arithmetic can go negative before clamping.
pub type Ticks = i64;

/// Ticks in one second.
pub const TICKS_PER_SECOND: Ticks = 10_000_000;

/// Ticks in one millisecond.
pub const TICKS_PER_MILLISECOND: Ticks = 10_000;

const NANOS_PER_TICK: u64 = 100;

/// Convert fractional seconds to ticks, truncating below tick resolution.
///
/// Non-finite and negative inputs yield `0`.
pub fn from_secs_f64(secs: f64) -> Ticks {
    if !secs.is_finite() || secs <= 0.0 {
        return 0;
    }
    let ticks = secs * TICKS_PER_SECOND as f64;
    if ticks >= Ticks::MAX as f64 {
        Ticks::MAX
    } else {
        ticks as Ticks
    }
}

/// Convert a [`Duration`] to ticks, saturating at `Ticks::MAX`.
pub fn from_duration(duration: Duration) -> Ticks {
    Ticks::try_from(duration.as_nanos() / u128::from(NANOS_PER_TICK)).unwrap_or(Ticks::MAX)
}

/// Convert ticks to a [`Duration`]; non-positive values map to zero.
pub fn to_duration(ticks: Ticks) -> Duration {
    if ticks <= 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((ticks as u64).saturating_mul(NANOS_PER_TICK))
}

/// Convert ticks to whole milliseconds, rounding up.
///
/// Backends with millisecond expirations must not turn a positive sub-millisecond
/// TTL into "expire now".
pub fn to_millis_ceil(ticks: Ticks) -> i64 {
    if ticks <= 0 {
        return 0;
    }
    ticks / TICKS_PER_MILLISECOND + i64::from(ticks % TICKS_PER_MILLISECOND != 0)
}
