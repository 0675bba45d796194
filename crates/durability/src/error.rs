//! Snapshot store errors
//!
//! Errors fall into a few classes that callers treat differently:
//!
//! - **Protocol/validation**: bad chunk, count mismatch, duplicate snapshot.
//!   Retrying the same input does not help.
//! - **I/O**: disk full, permissions. The failing operation is rolled back.
//! - **Integrity**: checksum mismatch after the move. The commit attempt is
//!   rolled back; the whole transfer may be retried from scratch.
//! - **Concurrent modification**: the single-writer assumption was violated.

use std::io;

use snapvault_core::{SnapshotId, SnapshotIdError};

use crate::checksum::ChecksumError;
use crate::config::ConfigError;

/// Result type alias for snapshot store operations
pub type Result<T> = std::result::Result<T, SnapshotStoreError>;

/// Snapshot store errors
#[derive(Debug, thiserror::Error)]
pub enum SnapshotStoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Checksum computation or checksum file error
    #[error("Checksum error: {0}")]
    Checksum(#[from] ChecksumError),

    /// A snapshot id could not be parsed
    #[error("Invalid snapshot id: {0}")]
    InvalidSnapshotId(#[from] SnapshotIdError),

    /// A chunk was rejected before being written
    #[error("Rejected chunk '{chunk}' of snapshot {id}: {reason}")]
    InvalidChunk {
        /// Snapshot the chunk was applied to
        id: SnapshotId,
        /// Name of the rejected chunk
        chunk: String,
        /// Why it was rejected
        reason: String,
    },

    /// A snapshot with this id was already taken
    #[error("Snapshot {0} already exists")]
    AlreadyExists(SnapshotId),

    /// Not every chunk of a received snapshot is present
    #[error("Expected {expected} chunks for snapshot {id}, but found {actual}")]
    ChunkCountMismatch {
        /// Snapshot being persisted
        id: SnapshotId,
        /// Advertised total chunk count
        expected: u32,
        /// Files actually present in the pending directory
        actual: usize,
    },

    /// The committed directory does not match the expected checksum
    #[error("Checksum mismatch for snapshot {id}: expected {expected:08x}, computed {actual:08x}")]
    ChecksumMismatch {
        /// Snapshot that failed verification
        id: SnapshotId,
        /// Checksum the producer advertised
        expected: u64,
        /// Checksum computed over the committed directory
        actual: u64,
    },

    /// The current snapshot changed underneath a commit
    #[error("Current snapshot changed concurrently: expected {expected:?}, found {actual:?}")]
    ConcurrentModification {
        /// Snapshot the commit expected to replace
        expected: Option<SnapshotId>,
        /// Snapshot that was actually current
        actual: Option<SnapshotId>,
    },

    /// Operation is not valid in the snapshot's current state
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// The pending snapshot was aborted before the operation ran
    #[error("Snapshot {0} was aborted")]
    Aborted(SnapshotId),

    /// The state-machine callback failed while writing a snapshot
    #[error("Failed to write snapshot {id}: {reason}")]
    WriterFailed {
        /// Snapshot being written
        id: SnapshotId,
        /// Failure reported by the writer
        reason: String,
    },

    /// The persisted snapshot has been deleted
    #[error("Snapshot {0} has been deleted")]
    SnapshotDeleted(SnapshotId),

    /// Invalid store configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The store's actor is gone (store closed or job panicked)
    #[error("Snapshot store actor is unavailable")]
    ActorUnavailable,
}

impl SnapshotStoreError {
    /// Create an illegal state error
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        SnapshotStoreError::IllegalState(msg.into())
    }

    /// Whether fetching the snapshot again, possibly from another peer, may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SnapshotStoreError::Io(_)
                | SnapshotStoreError::Checksum(ChecksumError::Io { .. })
                | SnapshotStoreError::InvalidChunk { .. }
                | SnapshotStoreError::ChunkCountMismatch { .. }
                | SnapshotStoreError::ChecksumMismatch { .. }
                | SnapshotStoreError::Aborted(_)
        )
    }
}
