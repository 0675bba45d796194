//! Snapshot storage engine for Snapvault
//!
//! This crate handles everything that touches disk:
//!
//! - Checksums: CRC32C per file and combined, SFV-like checksum files
//! - Transient snapshots: produced locally by a state-machine writer
//! - Received snapshots: assembled from chunks sent by a peer
//! - Commit protocol: move, verify, write commit marker, swap current
//! - Recovery: load the latest valid snapshot, discard partial and corrupt ones
//! - Chunk reader: stream a committed snapshot to a peer
//! - Crash testing infrastructure

#![warn(missing_docs)]
#![warn(clippy::all)]

mod actor;
mod pending;

pub mod checksum; // CRC32C checksum records and the SFV file format
pub mod chunk_reader; // Sorted chunk iteration over a committed snapshot
pub mod config; // Store configuration (SnapshotStoreConfig, DeletionPolicy)
pub mod error; // SnapshotStoreError and Result alias
pub mod fs; // Crash-safe file system helpers
pub mod paths; // On-disk layout of a store
pub mod persisted; // Committed snapshots and reservations
pub mod received; // Chunk-by-chunk snapshot reception
pub mod recovery; // Startup scan of snapshots/ and pending/
pub mod store; // SnapshotStore handle, actor-owned state, commit protocol
pub mod testing; // Crash staging and corruption helpers
pub mod transient; // Locally produced snapshots

// === Re-exports ===
pub use checksum::{
    checksum_bytes, compute_directory_checksum, ChecksumError, Combined, SfvChecksum,
    CHECKSUM_READ_BLOCK_SIZE, LEGACY_CHECKSUM_SIZE, SFV_SEPARATOR,
};
pub use chunk_reader::SnapshotChunkReader;
pub use config::{ConfigError, DeletionPolicy, SnapshotStoreConfig, DEFAULT_WRITE_BLOCK_SIZE};
pub use error::{Result, SnapshotStoreError};
pub use paths::{SnapshotStorePaths, CHECKSUM_EXTENSION, CHECKSUM_TEMP_SUFFIX};
pub use persisted::{PersistedSnapshot, SnapshotReservation};
pub use received::{ChunkOutcome, ReceivedSnapshot};
pub use recovery::RecoveryReport;
pub use store::{SnapshotListener, SnapshotStore};
pub use transient::TransientSnapshot;

pub use snapvault_core::{SnapshotChunk, SnapshotId, SnapshotIdError};
