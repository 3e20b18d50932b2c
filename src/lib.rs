//! An ordered key container backed by a red-black tree.
//!
//! Insert, lookup, erase, min/max and in-order enumeration all run in
//! O(log n) (O(n) for full enumeration). Duplicate keys are allowed;
//! equal keys always descend to the right on insertion.
//!
//! The tree is single-threaded and owns its nodes exclusively. Callers
//! needing shared access must serialize it externally.

#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]

mod error;
mod red_black_tree;

pub use error::TreeError;
pub use red_black_tree::{NodeRef, RbTree};
