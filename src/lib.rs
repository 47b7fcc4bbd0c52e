//! Lock-free concurrent collections.
//!
//! Three unbounded structures safe for any number of concurrent threads
//! without locks:
//!
//! - [`SortedSet`]: an ordered set backed by Harris's sorted linked list
//!   with lazy logical deletion.
//! - [`Queue`]: a FIFO queue backed by the Michael-Scott algorithm.
//! - [`Stack`]: a LIFO stack backed by Treiber's algorithm.
//!
//! Every mutator is an unbounded compare-and-swap retry loop: the structure
//! as a whole always makes progress even if individual threads are
//! perpetually interrupted (lock-free, not wait-free). Memory reclamation is
//! epoch-based via `crossbeam-epoch`; operations that return references into
//! the structure take a [`Guard`] and the references stay valid for as long
//! as that guard is pinned, even if the element is concurrently removed.

#![warn(missing_docs, missing_debug_implementations)]
#![deny(unsafe_op_in_unsafe_fn)]

mod counter;
mod marked;
pub mod queue;
pub mod set;
pub mod stack;

pub use queue::Queue;
pub use set::{Comparator, Natural, SortedSet};
pub use stack::Stack;

pub use crossbeam_epoch::{pin, Guard};
