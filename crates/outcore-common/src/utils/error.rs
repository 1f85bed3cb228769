//! Error types for Outcore.
//!
//! Every fallible operation in the workspace returns [`Result`]. The variants
//! follow the propagation policy of the buffer manager:
//!
//! - allocation and lock errors are returned synchronously to the caller,
//! - dump failures are returned by explicit dumps but swallowed (and logged)
//!   by eviction sweeps,
//! - restore failures are always surfaced, since the bytes cannot be
//!   recovered any other way.

use crate::types::BufferId;
use std::io;
use thiserror::Error;

/// Result type alias for Outcore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the buffer manager and its collaborators.
#[derive(Error, Debug)]
pub enum Error {
    /// The underlying allocator could not satisfy a request.
    #[error("failed to allocate {requested} bytes: {reason}")]
    AllocationFailure {
        /// Number of bytes requested.
        requested: usize,
        /// Allocator-provided reason.
        reason: String,
    },

    /// The allocation policy does not implement the requested operation.
    #[error("{policy} allocation policy does not support {operation}")]
    UnsupportedOperation {
        /// Name of the allocation policy.
        policy: &'static str,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// The buffer has no memory (neither resident nor dumped).
    #[error("buffer {0} is not allocated")]
    NotAllocated(BufferId),

    /// The buffer already holds memory and must be released first.
    #[error("buffer {0} is already allocated")]
    AlreadyAllocated(BufferId),

    /// The operation requires the buffer to be unlocked.
    #[error("buffer {id} is locked ({count} outstanding lock(s))")]
    Locked {
        /// Buffer identifier.
        id: BufferId,
        /// Number of outstanding locks.
        count: usize,
    },

    /// A lock of an incompatible mode is held.
    #[error("cannot acquire {requested} lock on buffer {id}: conflicting lock held")]
    LockConflict {
        /// Buffer identifier.
        id: BufferId,
        /// Requested lock mode.
        requested: &'static str,
    },

    /// Writing a buffer to its dump file failed.
    #[error("failed to dump buffer {id}: {source}")]
    DumpIo {
        /// Buffer identifier.
        id: BufferId,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Reading a buffer back from its dump file failed.
    #[error("failed to restore buffer {id}: {source}")]
    RestoreIo {
        /// Buffer identifier.
        id: BufferId,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A configuration parameter was unknown or malformed.
    #[error("invalid parameter {name}={value:?}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Rejected value.
        value: String,
    },

    /// The buffer manager has been shut down.
    #[error("buffer manager is shut down")]
    ShutDown,

    /// I/O error outside the dump/restore path.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Broken internal invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns `true` if retrying the same call later may succeed.
    ///
    /// Only lock-related errors are transient; everything else needs the
    /// caller to change something first.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockConflict { .. } | Self::Locked { .. })
    }

    /// Returns `true` if the error means buffer content has been lost.
    #[must_use]
    pub fn is_data_loss(&self) -> bool {
        matches!(self, Self::RestoreIo { .. })
    }
}
