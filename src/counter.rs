//! Advisory element counter.

use core::sync::atomic::AtomicIsize;
use core::sync::atomic::Ordering::Relaxed;

/// Advisory size indicator.
///
/// Updated by a separate atomic instruction that is not coupled to the
/// structural CAS it accounts for, so the value may transiently disagree
/// with the true element count under concurrency (it can even dip below
/// zero when a decrement lands before the matching increment). It converges
/// once all in-flight operations complete. No ordering is implied relative
/// to any other shared state.
#[derive(Debug, Default)]
pub(crate) struct Counter(AtomicIsize);

impl Counter {
    pub(crate) fn increment(&self) {
        let _ = self.0.fetch_add(1, Relaxed);
    }

    pub(crate) fn decrement(&self) {
        let _ = self.0.fetch_sub(1, Relaxed);
    }

    /// Current value, clamped at zero.
    pub(crate) fn get(&self) -> usize {
        usize::try_from(self.0.load(Relaxed)).unwrap_or(0)
    }
}
