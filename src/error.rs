//! Error types for the managed-heap subsystem

use thiserror::Error;

/// Errors the heap subsystem can raise or propagate.
///
/// Corruption-class violations (I1-I6 in the design notes) are not
/// represented here: they are `assert!`/`debug_assert!` aborts, since
/// the spec treats invariant violations as fatal and unrecoverable
/// rather than something a caller can meaningfully handle.
#[derive(Debug, Error)]
pub enum GcError {
    /// The pluggable allocator returned null for a nonzero-size request.
    #[error("out of memory: failed to allocate {requested} bytes")]
    OutOfMemory {
        /// Size of the allocation request that failed.
        requested: usize,
    },

    /// The heap-snapshot dumper could not open or write its output file.
    #[error("heap snapshot I/O failure: {0}")]
    SnapshotIo(#[from] std::io::Error),
}

/// Result type used throughout the heap subsystem.
pub type GcResult<T> = Result<T, GcError>;
