//! Atomic (reference, mark) pair.

use core::sync::atomic::Ordering;

use crossbeam_epoch::{Atomic, Guard, Shared};

/// Deletion mark carried by a node's successor link.
///
/// The mark describes the node that *owns* the link, not the node the link
/// points to: flipping a node's own link to `Dead` logically deletes that
/// node while leaving it physically in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mark {
    /// The owning node is a live member of the structure.
    Alive,
    /// The owning node is logically deleted and awaits physical unlinking.
    Dead,
}

impl Mark {
    fn into_tag(self) -> usize {
        match self {
            Mark::Alive => 0,
            Mark::Dead => 1,
        }
    }

    fn from_tag(tag: usize) -> Self {
        if tag == 0 {
            Mark::Alive
        } else {
            Mark::Dead
        }
    }
}

/// An atomic cell holding a (reference, mark) pair as one indivisible unit.
///
/// The mark lives in the low tag bit of the pointer, so a single pointer CAS
/// swaps both fields together: a mark change is never observable independent
/// of its paired reference. The CAS compares the reference by identity
/// (pointer address) and the mark by value, which is what prevents inserting
/// after a node whose deletion is in flight.
#[derive(Debug)]
pub(crate) struct MarkedRef<T> {
    inner: Atomic<T>,
}

impl<T> MarkedRef<T> {
    /// Creates a `(null, Alive)` cell.
    pub(crate) fn null() -> Self {
        Self {
            inner: Atomic::null(),
        }
    }

    /// Loads the pair. The returned pointer is always untagged.
    pub(crate) fn load<'g>(&self, ord: Ordering, guard: &'g Guard) -> (Shared<'g, T>, Mark) {
        let ptr = self.inner.load(ord, guard);
        (ptr.with_tag(0), Mark::from_tag(ptr.tag()))
    }

    /// Unconditionally stores the pair.
    pub(crate) fn store(&self, ptr: Shared<'_, T>, mark: Mark, ord: Ordering) {
        self.inner.store(ptr.with_tag(mark.into_tag()), ord);
    }

    /// Atomically installs `desired` iff the stored reference is
    /// identity-equal to `expected`'s reference and the stored mark equals
    /// `expected`'s mark. Returns whether the swap took place; on failure
    /// the cell is left untouched.
    pub(crate) fn compare_and_set<'g>(
        &self,
        expected: (Shared<'g, T>, Mark),
        desired: (Shared<'g, T>, Mark),
        success: Ordering,
        guard: &'g Guard,
    ) -> bool {
        self.inner
            .compare_exchange(
                expected.0.with_tag(expected.1.into_tag()),
                desired.0.with_tag(desired.1.into_tag()),
                success,
                Ordering::Relaxed,
                guard,
            )
            .is_ok()
    }
}
