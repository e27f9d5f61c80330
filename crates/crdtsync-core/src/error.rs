//! Errors raised by CRDT operations.

use crate::snapshot::CrdtKind;

/// Errors that can occur when mutating or merging a CRDT.
///
/// Every error leaves the state it was raised against unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CrdtError {
    /// A local mutation was rejected (negative amount, empty element, ...)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An operation or snapshot targeted a CRDT of another kind
    #[error("kind mismatch: expected {expected}, found {found}")]
    KindMismatch {
        /// Kind of the local instance
        expected: CrdtKind,
        /// Kind carried by the operation or snapshot
        found: CrdtKind,
    },
    /// A foreign snapshot failed validation
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}
