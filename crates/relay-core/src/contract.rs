//! Cross-cutting cancellation and deadline primitives, shared by sessions,
//! the pipe and the transport dial path. A plain atomic bool rather than
//! a `loom`-cfg'd swap, since this crate does not run under loom; "first
//! cancel wins" either way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::time::MonotonicTimePoint;

/// Shared cancellation flag. Clones observe the same underlying state, so
/// a session's cancel scope and every task derived from it see the same
/// cancellation.
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    inner: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }

    /// Marks this token cancelled. Returns `true` only on the call that
    /// actually flips the flag, so callers can tell "I triggered this" from
    /// "someone already did".
    pub fn cancel(&self) -> bool {
        self.inner
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns another handle over the same underlying flag.
    pub fn child(&self) -> Self {
        self.clone()
    }
}

/// An optional hard deadline expressed against a [`MonotonicTimePoint`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Deadline {
    instant: Option<MonotonicTimePoint>,
}

impl Deadline {
    pub const fn none() -> Self {
        Self { instant: None }
    }

    pub fn at(instant: MonotonicTimePoint) -> Self {
        Self {
            instant: Some(instant),
        }
    }

    pub fn with_timeout(now: MonotonicTimePoint, timeout: Duration) -> Self {
        Self::at(now.saturating_add(timeout))
    }

    pub fn instant(&self) -> Option<MonotonicTimePoint> {
        self.instant
    }

    pub fn is_expired(&self, now: MonotonicTimePoint) -> bool {
        match self.instant {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reports_first_trigger_only() {
        let c = Cancellation::new();
        assert!(!c.is_cancelled());
        assert!(c.cancel());
        assert!(c.is_cancelled());
        assert!(!c.cancel());
    }

    #[test]
    fn child_shares_state_with_parent() {
        let parent = Cancellation::new();
        let child = parent.child();
        child.cancel();
        assert!(parent.is_cancelled());
    }

    #[test]
    fn no_deadline_never_expires() {
        let d = Deadline::none();
        assert!(!d.is_expired(MonotonicTimePoint::now()));
    }
}
