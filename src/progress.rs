//! Cooperative cancellation and percent-done reporting for long-running
//! calculations.
//!
//! The computation itself is single threaded; the token is the only piece of
//! state that must be visible across threads, so a UI thread can request
//! cancellation or poll progress while a worker runs
//! [`calculate`](crate::distribution::IsotopeDistributionEngine::calculate).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct ProgressState {
    cancelled: AtomicBool,
    percent: AtomicU8,
}

/// A cloneable handle pairing a cancellation flag with an integer percent-done
/// value. Clones share state.
#[derive(Debug, Default, Clone)]
pub struct ProgressToken {
    inner: Arc<ProgressState>,
}

impl ProgressToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the running calculation stop at its next poll point.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Relaxed)
    }

    /// The last reported percent-done value, in `[0, 100]`.
    pub fn percent(&self) -> u8 {
        self.inner.percent.load(Ordering::Relaxed)
    }

    /// Clear both the flag and the percent value ahead of a new calculation.
    pub(crate) fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::Relaxed);
        self.inner.percent.store(0, Ordering::Relaxed);
    }

    /// Record `done / total` as an integer percentage. Returns `true` only
    /// when the integer value changed, which throttles observer callbacks to
    /// whole-percent steps.
    pub(crate) fn set_fraction(&self, done: usize, total: usize) -> bool {
        let percent = if total == 0 {
            100
        } else {
            ((done as f64 / total as f64) * 100.0).min(100.0) as u8
        };
        let previous = self.inner.percent.swap(percent, Ordering::Relaxed);
        previous != percent
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cancel_is_shared() {
        let token = ProgressToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_fraction_throttles_to_integer_percent() {
        let token = ProgressToken::new();
        assert!(!token.set_fraction(1, 1000));
        assert!(token.set_fraction(10, 1000));
        assert!(!token.set_fraction(11, 1000));
        assert_eq!(token.percent(), 1);
        assert!(token.set_fraction(1000, 1000));
        assert_eq!(token.percent(), 100);
    }
}
