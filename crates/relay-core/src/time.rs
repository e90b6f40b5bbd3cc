//! Monotonic time primitives used by activity timers and dial backoff.
//!
//! [`MonotonicTimePoint`] is a thin wrapper over `std::time::Instant`,
//! and [`TimeDriver`] exists as a trait rather than a bare function so
//! callers can swap in a deterministic clock for tests.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A monotonic clock reading. Only comparable to readings from the same
/// [`TimeDriver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonotonicTimePoint(Instant);

impl MonotonicTimePoint {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub fn saturating_duration_since(&self, earlier: MonotonicTimePoint) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }

    pub fn saturating_add(&self, delta: Duration) -> MonotonicTimePoint {
        MonotonicTimePoint(self.0 + delta)
    }
}

/// Clock and delay abstraction so activity timers and dial backoff can be
/// driven by a fake clock in tests without sleeping in real time.
pub trait TimeDriver: Send + Sync + 'static {
    fn now(&self) -> MonotonicTimePoint;

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    fn sleep_until(&self, deadline: MonotonicTimePoint) -> BoxFuture<'static, ()> {
        let wait = deadline.saturating_duration_since(self.now());
        self.sleep(wait)
    }
}

/// Production [`TimeDriver`] backed by the Tokio runtime clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioTimeDriver;

impl TimeDriver for TokioTimeDriver {
    fn now(&self) -> MonotonicTimePoint {
        MonotonicTimePoint::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_duration_since_never_underflows() {
        let a = MonotonicTimePoint::now();
        let b = a.saturating_add(Duration::from_secs(5));
        assert_eq!(a.saturating_duration_since(b), Duration::ZERO);
        assert_eq!(b.saturating_duration_since(a), Duration::from_secs(5));
    }
}
