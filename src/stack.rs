//! Treiber's lock-free stack.
//!
//! Usable with any number of producers and consumers.

use core::mem;
use core::ptr;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};

use crate::counter::Counter;

/// Unbounded LIFO stack.
///
/// A singly linked list with a single head pointer and no sentinel: `head`
/// points at the most recently pushed surviving node, or null when empty.
#[derive(Debug)]
pub struct Stack<T> {
    head: Atomic<Node<T>>,
    count: Counter,
}

#[derive(Debug)]
struct Node<T> {
    element: T,
    /// Fixed before publication; published nodes are never mutated. All
    /// structural change happens by swinging `head`.
    next: *const Node<T>,
}

// `T` is read concurrently through `&T` (peeks, iteration) and dropped on
// whichever thread reclaims the node, hence `Send + Sync`.
unsafe impl<T: Send + Sync> Sync for Stack<T> {}
unsafe impl<T: Send> Send for Stack<T> {}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Self {
            head: Atomic::null(),
            count: Counter::default(),
        }
    }
}

impl<T> Stack<T> {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `element` on top of the stack.
    pub fn push(&self, element: T) {
        let mut node = Owned::new(Node {
            element,
            next: ptr::null(),
        });

        let guard = epoch::pin();

        loop {
            // The successor is recomputed against the latest head on every
            // attempt; the node is not yet shared, so the write is plain.
            let head = self.head.load(Relaxed, &guard);
            node.next = head.as_raw();

            match self
                .head
                .compare_exchange(head, node, Release, Relaxed, &guard)
            {
                Ok(_) => {
                    self.count.increment();
                    return;
                }
                Err(e) => node = e.new,
            }
        }
    }

    /// Attempts to pop the top element of the stack.
    ///
    /// Returns `None` if the stack is observed to be empty. The reference
    /// stays valid while `guard` is pinned; callers wanting ownership clone
    /// it.
    pub fn try_pop<'g>(&'g self, guard: &'g Guard) -> Option<&'g T> {
        loop {
            let head = self.head.load(Acquire, guard);
            let head_ref = unsafe { head.as_ref() }?;
            let next = Shared::from(head_ref.next);

            if self
                .head
                .compare_exchange(head, next, Relaxed, Relaxed, guard)
                .is_ok()
            {
                self.count.decrement();
                // SAFETY: the CAS succeeded, so `head` is detached from the
                // stack; epoch reclamation delays its destruction (and with
                // it the element's drop) past all pinned readers, so the
                // returned reference outlives the guard pin.
                unsafe { guard.defer_destroy(head) };
                return Some(&head_ref.element);
            }
        }
    }

    /// Non-mutating read of the current top element.
    ///
    /// May race with concurrent mutation and reflect any state between the
    /// start and end of the call.
    pub fn peek<'g>(&'g self, guard: &'g Guard) -> Option<&'g T> {
        let head = self.head.load(Acquire, guard);
        unsafe { head.as_ref() }.map(|node| &node.element)
    }

    /// Advisory number of elements.
    ///
    /// The counter is not updated atomically with the structural CAS, so the
    /// value may transiently disagree with the true element count under
    /// concurrency; it converges once all in-flight operations complete.
    pub fn len(&self) -> usize {
        self.count.get()
    }

    /// Returns `true` if the stack was observed to be empty.
    ///
    /// Unlike [`len`](Self::len) this inspects the structure itself.
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        self.head.load(Acquire, &guard).is_null()
    }

    /// Iterates top-to-bottom, weakly consistent.
    ///
    /// The traversal never blocks writers; it may omit elements pushed after
    /// it started and may yield elements that are concurrently popped.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, T> {
        Iter {
            curr: self.head.load(Acquire, guard),
        }
    }
}

impl<T> Drop for Stack<T> {
    fn drop(&mut self) {
        let mut curr = mem::take(&mut self.head);

        // SAFETY: `&mut self` means all operations and guards borrowing the
        // stack have finished, so we have sole ownership of every node.
        while let Some(node) = unsafe { curr.try_into_owned() }.map(Owned::into_box) {
            curr = node.next.into();
        }
    }
}

/// Weakly consistent top-to-bottom iterator over a [`Stack`].
///
/// The `'g` lifetime ties the iterator to the pin that made the head load
/// safe; successor links are immutable, so the chain below that node stays
/// intact even as nodes are popped.
#[derive(Debug)]
pub struct Iter<'g, T> {
    curr: Shared<'g, Node<T>>,
}

impl<'g, T> Iterator for Iter<'g, T> {
    type Item = &'g T;

    fn next(&mut self) -> Option<&'g T> {
        let node = unsafe { self.curr.as_ref() }?;
        self.curr = Shared::from(node.next);
        Some(&node.element)
    }
}
