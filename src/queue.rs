//! Michael-Scott lock-free queue.
//!
//! Usable with any number of producers and consumers.
//!
//! Michael and Scott. Simple, Fast, and Practical Non-Blocking and Blocking
//! Concurrent Queue Algorithms. PODC 1996.
//! <http://dl.acm.org/citation.cfm?id=248106>

use core::mem;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_epoch::{self as epoch, unprotected, Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;

use crate::counter::Counter;

/// Unbounded FIFO queue.
///
/// The representation is a singly linked list with a consumed sentinel at
/// the front: `head` always points at a node whose own element is never
/// read, and the node after it is the logical front. `tail` may lag behind
/// the true last node; catch-up is cooperative.
#[derive(Debug)]
pub struct Queue<T> {
    head: CachePadded<Atomic<Node<T>>>,
    tail: CachePadded<Atomic<Node<T>>>,
    count: Counter,
}

#[derive(Debug)]
struct Node<T> {
    /// `None` only for the initial sentinel. A node linked by `push` keeps
    /// its element until the node itself is reclaimed, so a guard-protected
    /// reader can never observe a freed element.
    element: Option<T>,
    next: Atomic<Node<T>>,
}

// `T` is read concurrently through `&T` (peeks, iteration) and dropped on
// whichever thread reclaims the node, hence `Send + Sync`.
unsafe impl<T: Send + Sync> Sync for Queue<T> {}
unsafe impl<T: Send> Send for Queue<T> {}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        let queue = Self {
            head: CachePadded::new(Atomic::null()),
            tail: CachePadded::new(Atomic::null()),
            count: Counter::default(),
        };
        let sentinel = Owned::new(Node {
            element: None,
            next: Atomic::null(),
        });
        // SAFETY: we are creating a new queue, hence have sole ownership.
        let sentinel = sentinel.into_shared(unsafe { unprotected() });
        queue.head.store(sentinel, Relaxed);
        queue.tail.store(sentinel, Relaxed);
        queue
    }
}

impl<T> Queue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `element` to the back of the queue.
    ///
    /// Returns once the link CAS succeeds; swinging `tail` forward is best
    /// effort, and the next operation helps if it is left behind.
    pub fn push(&self, element: T) {
        let guard = &epoch::pin();
        let new = Owned::new(Node {
            element: Some(element),
            next: Atomic::null(),
        })
        .into_shared(guard);

        loop {
            let tail = self.tail.load(Acquire, guard);
            // SAFETY: `tail` is never null, and the guard keeps the node
            // readable even if it has been popped past concurrently.
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Acquire, guard);

            // `tail` is not the actual tail: another push already linked a
            // node but has not advanced `tail` yet. Help and retry.
            if !next.is_null() {
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Release, Relaxed, guard);
                continue;
            }

            if tail_ref
                .next
                .compare_exchange(Shared::null(), new, Release, Relaxed, guard)
                .is_ok()
            {
                let _ = self
                    .tail
                    .compare_exchange(tail, new, Release, Relaxed, guard);
                self.count.increment();
                return;
            }
        }
    }

    /// Attempts to remove the element at the front of the queue.
    ///
    /// Returns `None` if the queue is observed to be empty. The reference
    /// stays valid while `guard` is pinned; callers wanting ownership clone
    /// it.
    pub fn try_pop<'g>(&'g self, guard: &'g Guard) -> Option<&'g T> {
        loop {
            let head = self.head.load(Acquire, guard);
            // SAFETY: `head` is never null, and the guard keeps it readable.
            let next = unsafe { head.deref() }.next.load(Acquire, guard);
            let next_ref = unsafe { next.as_ref() }?;

            // `tail` has fallen behind the newly linked node; help it catch
            // up before consuming, then retry.
            let tail = self.tail.load(Relaxed, guard);
            if head == tail {
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Release, Relaxed, guard);
                continue;
            }

            if self
                .head
                .compare_exchange(head, next, Release, Relaxed, guard)
                .is_ok()
            {
                self.count.decrement();
                // SAFETY: the CAS succeeded, so the old sentinel is
                // unreachable from the queue; epoch reclamation delays its
                // destruction past all pinned readers. `next` became the new
                // sentinel and keeps its element until it is reclaimed in
                // turn, so the returned reference outlives the guard pin.
                unsafe { guard.defer_destroy(head) };
                return next_ref.element.as_ref();
            }
        }
    }

    /// Non-mutating peek at the logical front.
    ///
    /// May race with concurrent mutation and reflect any state between the
    /// start and end of the call.
    pub fn front<'g>(&'g self, guard: &'g Guard) -> Option<&'g T> {
        let head = self.head.load(Acquire, guard);
        // SAFETY: `head` is never null, and the guard keeps it readable.
        let next = unsafe { head.deref() }.next.load(Acquire, guard);
        unsafe { next.as_ref() }.and_then(|node| node.element.as_ref())
    }

    /// Non-mutating peek at the logical back.
    ///
    /// There is no atomicity across the two reads this performs: the result
    /// may reflect any state between the start and end of the call, and a
    /// lagging `tail` may report an empty queue that a concurrent push has
    /// already extended.
    pub fn back<'g>(&'g self, guard: &'g Guard) -> Option<&'g T> {
        let head = self.head.load(Acquire, guard);
        let tail = self.tail.load(Acquire, guard);
        if head == tail {
            return None;
        }
        // SAFETY: `tail` is at or after the sentinel, and `head != tail`
        // means it is a node linked by `push`, so its element is `Some`.
        unsafe { tail.deref() }.element.as_ref()
    }

    /// Advisory number of elements.
    ///
    /// The counter is not updated atomically with the structural CAS, so the
    /// value may transiently disagree with the true element count under
    /// concurrency; it converges once all in-flight operations complete.
    pub fn len(&self) -> usize {
        self.count.get()
    }

    /// Returns `true` if the queue was observed to be empty.
    ///
    /// Unlike [`len`](Self::len) this inspects the structure itself.
    pub fn is_empty(&self) -> bool {
        let guard = &epoch::pin();
        let head = self.head.load(Acquire, guard);
        // SAFETY: `head` is never null, and the guard keeps it readable.
        unsafe { head.deref() }.next.load(Acquire, guard).is_null()
    }

    /// Iterates front-to-back, weakly consistent.
    ///
    /// The traversal never blocks writers; it may omit elements pushed ahead
    /// of the cursor and may yield elements that are concurrently popped.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, T> {
        let head = self.head.load(Acquire, guard);
        // SAFETY: `head` is never null, and the guard keeps it readable.
        let curr = unsafe { head.deref() }.next.load(Acquire, guard);
        Iter { curr, guard }
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means all operations and guards borrowing the
        // queue have finished, so we have sole ownership of the sentinel and
        // every node after it. Elements are plain `Option<T>` fields and
        // drop with their nodes.
        let mut curr = mem::take(&mut *self.head);
        while let Some(node) = unsafe { curr.try_into_owned() }.map(Owned::into_box) {
            curr = node.next;
        }
    }
}

/// Weakly consistent front-to-back iterator over a [`Queue`].
#[derive(Debug)]
pub struct Iter<'g, T> {
    curr: Shared<'g, Node<T>>,
    guard: &'g Guard,
}

impl<'g, T> Iterator for Iter<'g, T> {
    type Item = &'g T;

    fn next(&mut self) -> Option<&'g T> {
        let node = unsafe { self.curr.as_ref() }?;
        self.curr = node.next.load(Acquire, self.guard);
        // Nodes after the sentinel always carry an element.
        node.element.as_ref()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crossbeam_epoch::pin;
    use std::thread::scope;

    const CONC_COUNT: i64 = 100_000;

    #[test]
    fn push_try_pop_1() {
        let q: Queue<i64> = Queue::new();
        assert!(q.is_empty());
        q.push(37);
        assert!(!q.is_empty());
        assert_eq!(q.len(), 1);
        assert_eq!(q.try_pop(&pin()).copied(), Some(37));
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn push_try_pop_2() {
        let q: Queue<i64> = Queue::new();
        q.push(37);
        q.push(48);
        assert_eq!(q.try_pop(&pin()).copied(), Some(37));
        assert_eq!(q.try_pop(&pin()).copied(), Some(48));
        assert!(q.is_empty());
    }

    #[test]
    fn fifo_order_seq() {
        let q: Queue<i64> = Queue::new();
        for i in 0..128 {
            q.push(i);
        }
        assert_eq!(q.len(), 128);
        for i in 0..128 {
            assert_eq!(q.try_pop(&pin()).copied(), Some(i));
        }
        assert_eq!(q.try_pop(&pin()), None);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn pop_empty_is_idempotent() {
        let q: Queue<i64> = Queue::new();
        for _ in 0..16 {
            assert_eq!(q.try_pop(&pin()), None);
            assert_eq!(q.len(), 0);
        }
    }

    #[test]
    fn front_and_back() {
        let q: Queue<i64> = Queue::new();
        let guard = pin();
        assert_eq!(q.front(&guard), None);
        assert_eq!(q.back(&guard), None);

        for i in 0..8 {
            q.push(i);
            assert_eq!(q.front(&guard).copied(), Some(0));
            assert_eq!(q.back(&guard).copied(), Some(i));
        }

        assert_eq!(q.try_pop(&guard).copied(), Some(0));
        assert_eq!(q.front(&guard).copied(), Some(1));
        assert_eq!(q.back(&guard).copied(), Some(7));
    }

    #[test]
    fn iter_front_to_back() {
        let q: Queue<i64> = Queue::new();
        for i in 0..10 {
            q.push(i);
        }
        let guard = pin();
        assert_eq!(
            q.iter(&guard).copied().collect::<Vec<_>>(),
            (0..10).collect::<Vec<_>>()
        );
    }

    #[test]
    fn push_try_pop_many_spsc() {
        let q: Queue<i64> = Queue::new();
        assert!(q.is_empty());

        scope(|scope| {
            let _ = scope.spawn(|| {
                let mut next = 0;
                while next < CONC_COUNT {
                    if let Some(elem) = q.try_pop(&pin()).copied() {
                        assert_eq!(elem, next);
                        next += 1;
                    }
                }
            });

            for i in 0..CONC_COUNT {
                q.push(i);
            }
        });
    }

    #[test]
    fn push_try_pop_many_spmc() {
        fn recv(q: &Queue<i64>) {
            let mut cur = -1;
            for _ in 0..CONC_COUNT {
                if let Some(elem) = q.try_pop(&pin()).copied() {
                    assert!(elem > cur);
                    cur = elem;

                    if cur == CONC_COUNT - 1 {
                        break;
                    }
                }
            }
        }

        let q: Queue<i64> = Queue::new();
        assert!(q.is_empty());
        scope(|scope| {
            for _ in 0..3 {
                let _ = scope.spawn(|| recv(&q));
            }

            let _ = scope.spawn(|| {
                for i in 0..CONC_COUNT {
                    q.push(i);
                }
            });
        });
    }

    #[test]
    fn push_try_pop_many_mpmc() {
        #[derive(Clone, Copy)]
        enum LR {
            Left(i64),
            Right(i64),
        }

        let q: Queue<LR> = Queue::new();
        assert!(q.is_empty());

        scope(|scope| {
            let _ = scope.spawn(|| {
                for i in 0..CONC_COUNT {
                    q.push(LR::Left(i));
                }
            });
            let _ = scope.spawn(|| {
                for i in 0..CONC_COUNT {
                    q.push(LR::Right(i));
                }
            });
            for _ in 0..2 {
                let _ = scope.spawn(|| {
                    let mut vl = vec![];
                    let mut vr = vec![];
                    for _ in 0..CONC_COUNT {
                        match q.try_pop(&pin()).copied() {
                            Some(LR::Left(x)) => vl.push(x),
                            Some(LR::Right(x)) => vr.push(x),
                            None => {}
                        }
                    }

                    // Each producer's own order is preserved in the output.
                    let mut vl2 = vl.clone();
                    let mut vr2 = vr.clone();
                    vl2.sort();
                    vr2.sort();

                    assert_eq!(vl, vl2);
                    assert_eq!(vr, vr2);
                });
            }
        });
    }

    #[test]
    fn mpmc_pops_equal_pushes() {
        const PRODUCERS: i64 = 4;
        const PER_PRODUCER: i64 = 10_000;

        let q: Queue<i64> = Queue::new();
        let popped = std::sync::Mutex::new(Vec::new());

        scope(|scope| {
            for p in 0..PRODUCERS {
                let q = &q;
                let _ = scope.spawn(move || {
                    for i in 0..PER_PRODUCER {
                        q.push(p * PER_PRODUCER + i);
                    }
                });
            }
            for _ in 0..4 {
                let _ = scope.spawn(|| {
                    let mut local = Vec::new();
                    while (local.len() as i64) < PER_PRODUCER {
                        if let Some(elem) = q.try_pop(&pin()).copied() {
                            local.push(elem);
                        }
                    }
                    popped.lock().unwrap().extend(local);
                });
            }
        });

        let mut all = popped.into_inner().unwrap();
        all.sort();
        assert_eq!(all, (0..PRODUCERS * PER_PRODUCER).collect::<Vec<_>>());
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn drops_unconsumed_elements() {
        let q: Queue<String> = Queue::new();
        q.push("a".to_owned());
        q.push("b".to_owned());
        assert_eq!(q.try_pop(&pin()).map(String::as_str), Some("a"));
        // The remaining element is freed by `Drop`.
    }
}
