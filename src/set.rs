//! Harris's lock-free sorted-list set.
//!
//! Timothy L. Harris. A Pragmatic Implementation of Non-Blocking
//! Linked-Lists. DISC 2001. <https://doi.org/10.1007/3-540-45414-4_21>
//!
//! Deletion is lazy: a `remove` only flips the deletion mark on the victim's
//! own successor link (the linearization point) and leaves the node in the
//! chain. Any later traversal that encounters a marked node helps by
//! physically unlinking it, so garbage stays bounded and every thread gets a
//! chance to make global progress even if the original deleter stalls.

use core::cmp::Ordering::{self, Equal, Greater, Less};
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use crossbeam_epoch::{self as epoch, unprotected, Guard, Owned, Shared};

use crate::counter::Counter;
use crate::marked::{Mark, MarkedRef};

/// A total order over `T` supplied at set construction.
///
/// The comparator must be a strict total order and stable across calls;
/// violating that contract may misplace elements or produce false negatives,
/// but never violates memory safety.
pub trait Comparator<T> {
    /// Compares two elements.
    fn compare(&self, lhs: &T, rhs: &T) -> Ordering;
}

impl<T, F: Fn(&T, &T) -> Ordering> Comparator<T> for F {
    fn compare(&self, lhs: &T, rhs: &T) -> Ordering {
        self(lhs, rhs)
    }
}

/// The element type's natural order.
#[derive(Debug, Default, Clone, Copy)]
pub struct Natural;

impl<T: Ord> Comparator<T> for Natural {
    fn compare(&self, lhs: &T, rhs: &T) -> Ordering {
        lhs.cmp(rhs)
    }
}

/// Sorted-list node: an immutable element plus a marked successor link.
#[derive(Debug)]
struct Node<T> {
    /// This node's own deletion mark lives in the tag of `next`.
    next: MarkedRef<Node<T>>,
    element: T,
}

/// An ordered set over a total order, safe for unbounded concurrent access.
///
/// The head sentinel holds no element, so it is represented by the set's own
/// link field; the tail sentinel is the null pointer. Nodes reachable
/// through `Alive` links are strictly increasing under the comparator.
#[derive(Debug)]
pub struct SortedSet<T, C = Natural> {
    /// The head sentinel's successor link. Never marked `Dead`.
    head: MarkedRef<Node<T>>,
    count: Counter,
    comparator: C,
}

// `T` is read concurrently through `&T` (search, iteration) and dropped on
// whichever thread reclaims the node, hence `Send + Sync`.
unsafe impl<T: Send + Sync, C: Sync> Sync for SortedSet<T, C> {}
unsafe impl<T: Send, C: Send> Send for SortedSet<T, C> {}

impl<T, C: Default> Default for SortedSet<T, C> {
    fn default() -> Self {
        Self::with_comparator(C::default())
    }
}

impl<T: Ord> SortedSet<T> {
    /// Creates an empty set ordered by `T`'s natural order.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T, C> SortedSet<T, C> {
    /// Creates an empty set ordered by the given comparator.
    pub fn with_comparator(comparator: C) -> Self {
        Self {
            head: MarkedRef::null(),
            count: Counter::default(),
            comparator,
        }
    }

    /// Advisory number of elements.
    ///
    /// The counter is not updated atomically with the structural CAS, so the
    /// value may transiently disagree with the true element count under
    /// concurrency; it converges once all in-flight operations complete.
    pub fn len(&self) -> usize {
        self.count.get()
    }

    /// Returns `true` if no live element was observed.
    ///
    /// Unlike [`len`](Self::len) this inspects the structure itself.
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        self.iter(&guard).next().is_none()
    }

    /// Iterates over the elements in ascending comparator order.
    ///
    /// The traversal is weakly consistent: it never blocks writers, may omit
    /// elements concurrently inserted ahead of the cursor or concurrently
    /// removed, and never yields the same physically-present node twice.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, T> {
        let (curr, _) = self.head.load(Acquire, guard);
        Iter { curr, guard }
    }
}

impl<T, C: Comparator<T>> SortedSet<T, C> {
    /// Finds the position of `element`.
    ///
    /// Returns the predecessor's link, the first node (untagged, possibly
    /// null = tail) whose element is `>= element` among live nodes, and
    /// whether that node's element compares equal.
    ///
    /// Any logically deleted node encountered on the way is physically
    /// unlinked as a side effect; if that unlink CAS fails (the predecessor
    /// changed), the search restarts from head.
    fn search<'g>(
        &'g self,
        element: &T,
        guard: &'g Guard,
    ) -> (&'g MarkedRef<Node<T>>, Shared<'g, Node<T>>, bool) {
        'restart: loop {
            let mut pred = &self.head;
            let (mut curr, _) = pred.load(Acquire, guard);

            loop {
                // Null is the tail sentinel.
                let Some(curr_node) = (unsafe { curr.as_ref() }) else {
                    return (pred, curr, false);
                };
                let (succ, mark) = curr_node.next.load(Acquire, guard);

                if mark == Mark::Dead {
                    // Help the stalled deleter: swing the predecessor's link
                    // around the marked node. The expected `Alive` mark also
                    // catches a concurrently deleted predecessor.
                    if !pred.compare_and_set((curr, Mark::Alive), (succ, Mark::Alive), Release, guard)
                    {
                        continue 'restart;
                    }
                    // SAFETY: the CAS above made us the unique unlinker of
                    // `curr`; it is now unreachable from the set, and epoch
                    // reclamation delays destruction past all pinned readers.
                    unsafe { guard.defer_destroy(curr) };
                    curr = succ;
                    continue;
                }

                match self.comparator.compare(&curr_node.element, element) {
                    Less => {
                        pred = &curr_node.next;
                        curr = succ;
                    }
                    Equal => return (pred, curr, true),
                    Greater => return (pred, curr, false),
                }
            }
        }
    }

    /// Returns `true` if `element` is in the set.
    ///
    /// A node located by the search may already have been concurrently
    /// marked dead, so membership additionally requires the node's own link
    /// to be unmarked at the moment of the check.
    pub fn contains(&self, element: &T) -> bool {
        let guard = &epoch::pin();
        let (_, curr, found) = self.search(element, guard);
        if !found {
            return false;
        }
        // SAFETY: `found` implies `curr` is non-null, and the guard keeps it
        // readable even if it is concurrently unlinked.
        let (_, mark) = unsafe { curr.deref() }.next.load(Acquire, guard);
        mark == Mark::Alive
    }

    /// Adds `element` to the set. Returns whether it was newly inserted.
    pub fn insert(&self, element: T) -> bool {
        let guard = &epoch::pin();
        let node = Owned::new(Node {
            next: MarkedRef::null(),
            element,
        })
        .into_shared(guard);
        // SAFETY: freshly allocated and not yet published.
        let node_ref = unsafe { node.deref() };

        loop {
            let (pred, curr, found) = self.search(&node_ref.element, guard);
            if found {
                // SAFETY: every CAS so far failed, so the node was never
                // published; we still have sole ownership.
                drop(unsafe { node.into_owned() });
                return false;
            }

            // Point the unpublished node at its successor, then publish it
            // in one CAS. The expected `Alive` mark on the predecessor's
            // link prevents inserting after a node whose deletion is in
            // flight.
            node_ref.next.store(curr, Mark::Alive, Relaxed);
            if pred.compare_and_set((curr, Mark::Alive), (node, Mark::Alive), Release, guard) {
                self.count.increment();
                return true;
            }
        }
    }

    /// Removes `element` from the set. Returns whether it was present.
    ///
    /// The successful mark flip is the linearization point; the node stays
    /// physically in the chain until a later traversal unlinks it.
    pub fn remove(&self, element: &T) -> bool {
        let guard = &epoch::pin();
        loop {
            let (_, curr, found) = self.search(element, guard);
            if !found {
                return false;
            }

            // SAFETY: `found` implies `curr` is non-null, and the guard
            // keeps it readable even if it is concurrently unlinked.
            let curr_node = unsafe { curr.deref() };
            let (succ, mark) = curr_node.next.load(Acquire, guard);
            if mark == Mark::Dead {
                // Another thread deleted it first; retry against the
                // current state of the list.
                continue;
            }

            // Pure mark flip, no pointer change.
            if curr_node
                .next
                .compare_and_set((succ, Mark::Alive), (succ, Mark::Dead), AcqRel, guard)
            {
                self.count.decrement();
                return true;
            }
        }
    }
}

impl<T, C> Drop for SortedSet<T, C> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means all operations and guards borrowing the
        // set have finished, so we have sole ownership of every node still
        // in the chain, alive or logically deleted.
        let guard = unsafe { unprotected() };
        let (mut curr, _) = self.head.load(Relaxed, guard);
        while let Some(node) = unsafe { curr.as_ref() } {
            let (succ, _) = node.next.load(Relaxed, guard);
            drop(unsafe { curr.into_owned() });
            curr = succ;
        }
    }
}

/// Weakly consistent ascending iterator over a [`SortedSet`].
///
/// Yields every node whose own link is unmarked at the instant it is
/// visited.
#[derive(Debug)]
pub struct Iter<'g, T> {
    curr: Shared<'g, Node<T>>,
    guard: &'g Guard,
}

impl<'g, T> Iterator for Iter<'g, T> {
    type Item = &'g T;

    fn next(&mut self) -> Option<&'g T> {
        while let Some(node) = unsafe { self.curr.as_ref() } {
            let (succ, mark) = node.next.load(Acquire, self.guard);
            self.curr = succ;
            if mark == Mark::Alive {
                return Some(&node.element);
            }
        }
        None
    }
}
