//! Error taxonomy for the write iterator.
//!
//! Every fallible operation the core performs surfaces one of these
//! variants from [`WriteIterator::next`](crate::iterator::WriteIterator::next).
//! There is no local recovery: the caller discards whatever output has
//! already been drained and the original runs remain authoritative.

use thiserror::Error;

/// Errors that can abort an in-progress write-iterator pass.
#[derive(Debug, Error)]
pub enum WriteIteratorError {
    /// The merging source failed to produce its next statement (I/O or
    /// decode failure in a collaborator run). Fatal.
    #[error("merging source failed: {0}")]
    Source(#[from] SourceError),

    /// The deferred-delete handler refused or failed a `process` call.
    #[error("deferred-delete handler failed: {0}")]
    Handler(#[from] HandlerError),

    /// The per-key arena could not grow past its configured capacity
    /// bound while building a history or a surrogate delete.
    #[error("allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    /// Inputs violated an ordering precondition the core relies on (e.g.
    /// non-descending LSNs for a key) or the stream driver was called out
    /// of sequence. Indicates a bug in an upstream component or caller.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failure of the merging source (`# 4.C`).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SourceError(pub String);

/// Failure of the deferred-delete handler (`# 4.F` / `# 6`).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

/// The per-key arena exceeded its configured capacity bound.
#[derive(Debug, Error)]
#[error("arena capacity exceeded: requested {requested}, bound {bound}")]
pub struct AllocationError {
    /// Bytes (or entries, depending on the arena) requested.
    pub requested: usize,
    /// The configured bound that was exceeded.
    pub bound: usize,
}

/// Convenience alias for results returned by the core.
pub type Result<T> = std::result::Result<T, WriteIteratorError>;
