//! Error types for tree operations.

use thiserror::Error;

/// Errors returned by [`RbTree`](crate::RbTree) operations.
///
/// Absent keys and empty trees are not errors; those cases are reported
/// as `None` by the corresponding methods.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    /// The node handle passed to `erase` does not belong to this tree.
    #[error("node does not belong to this tree")]
    ForeignNode,
}
