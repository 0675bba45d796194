//! Snapshots received from a peer
//!
//! Chunks may arrive out of order, more than once, and from different
//! connections. Each chunk is validated against the snapshot and against
//! the chunks seen before it:
//!
//! 1. A chunk whose file already exists is a duplicate and accepted as a no-op
//! 2. The chunk's snapshot id must equal the received snapshot's id
//! 3. The combined checksum and total count are learned from the first chunk
//!    and must be identical on every later chunk
//! 4. Chunks of a snapshot the store already committed are dropped
//! 5. The chunk checksum must match its content
//! 6. The chunk is written to a new file and forced to disk
//!
//! The pending directory doubles as the index of received chunks.

use std::io;
use std::path::Path;

use snapvault_core::{SnapshotChunk, SnapshotId};
use tracing::debug;

use crate::checksum::checksum_bytes;
use crate::error::{Result, SnapshotStoreError};
use crate::fs::{count_files, write_new_file};
use crate::pending::{PendingHandle, Terminal};
use crate::persisted::PersistedSnapshot;

/// What `apply` did with a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The chunk was written to the pending directory
    Written,
    /// The chunk had been written before
    Duplicate,
    /// The snapshot is already committed; the chunk was dropped
    AlreadyCommitted,
}

/// Why a chunk was refused
pub(crate) enum ChunkRejection {
    /// Only this chunk is bad; the snapshot may still complete
    Chunk(SnapshotStoreError),
    /// The chunk contradicts earlier chunks; the snapshot cannot complete
    Snapshot(SnapshotStoreError),
}

/// Actor-owned state of a received snapshot
#[derive(Debug, Default)]
pub(crate) struct ReceivedState {
    expected_checksum: Option<u64>,
    expected_count: Option<u32>,
}

impl ReceivedState {
    pub(crate) fn apply(
        &mut self,
        id: SnapshotId,
        directory: &Path,
        chunk: &SnapshotChunk,
        already_committed: bool,
        block_size: usize,
    ) -> std::result::Result<ChunkOutcome, ChunkRejection> {
        let reject = |reason: String| SnapshotStoreError::InvalidChunk {
            id,
            chunk: chunk.chunk_name.clone(),
            reason,
        };

        if let Err(reason) = validate_chunk_name(&chunk.chunk_name) {
            return Err(ChunkRejection::Chunk(reject(reason)));
        }

        let path = directory.join(&chunk.chunk_name);
        if path.exists() {
            debug!(
                target: "snapvault::received",
                snapshot = %id,
                chunk = %chunk.chunk_name,
                "Ignoring duplicate chunk"
            );
            return Ok(ChunkOutcome::Duplicate);
        }

        let chunk_id: SnapshotId = chunk.snapshot_id.parse().map_err(|e| {
            ChunkRejection::Chunk(reject(format!(
                "invalid snapshot id '{}': {}",
                chunk.snapshot_id, e
            )))
        })?;
        if chunk_id != id {
            return Err(ChunkRejection::Chunk(reject(format!(
                "chunk belongs to snapshot {}",
                chunk_id
            ))));
        }

        match (self.expected_checksum, self.expected_count) {
            (Some(checksum), Some(count)) => {
                if checksum != chunk.snapshot_checksum {
                    return Err(ChunkRejection::Snapshot(reject(format!(
                        "snapshot checksum {:08x} differs from {:08x} advertised by earlier chunks",
                        chunk.snapshot_checksum, checksum
                    ))));
                }
                if count != chunk.total_count {
                    return Err(ChunkRejection::Snapshot(reject(format!(
                        "total count {} differs from {} advertised by earlier chunks",
                        chunk.total_count, count
                    ))));
                }
            }
            _ => {
                self.expected_checksum = Some(chunk.snapshot_checksum);
                self.expected_count = Some(chunk.total_count);
            }
        }

        if already_committed {
            debug!(
                target: "snapvault::received",
                snapshot = %id,
                chunk = %chunk.chunk_name,
                "Snapshot already committed, dropping chunk"
            );
            return Ok(ChunkOutcome::AlreadyCommitted);
        }

        let actual = checksum_bytes(&chunk.content);
        if actual != chunk.checksum {
            return Err(ChunkRejection::Chunk(reject(format!(
                "expected checksum {:08x}, computed {:08x}",
                chunk.checksum, actual
            ))));
        }

        write_new_file(&path, &chunk.content, block_size).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                ChunkRejection::Chunk(SnapshotStoreError::illegal_state(format!(
                    "chunk '{}' of snapshot {} was written concurrently",
                    chunk.chunk_name, id
                )))
            } else {
                ChunkRejection::Chunk(SnapshotStoreError::Io(e))
            }
        })?;

        debug!(
            target: "snapvault::received",
            snapshot = %id,
            chunk = %chunk.chunk_name,
            bytes = chunk.content.len(),
            "Wrote chunk"
        );
        Ok(ChunkOutcome::Written)
    }

    /// Combined checksum to commit with, once every chunk is on disk
    pub(crate) fn expected_checksum(&self, id: SnapshotId, directory: &Path) -> Result<u64> {
        let (Some(checksum), Some(count)) = (self.expected_checksum, self.expected_count) else {
            return Err(SnapshotStoreError::illegal_state(format!(
                "no chunks received for snapshot {}",
                id
            )));
        };

        let actual = count_files(directory)?;
        if actual != count as usize {
            return Err(SnapshotStoreError::ChunkCountMismatch {
                id,
                expected: count,
                actual,
            });
        }
        Ok(checksum)
    }
}

fn validate_chunk_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(format!("invalid chunk name '{}'", name));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(format!("chunk name '{}' must not contain path separators", name));
    }
    Ok(())
}

/// A snapshot being assembled from chunks sent by a peer
#[derive(Clone)]
pub struct ReceivedSnapshot {
    handle: PendingHandle,
}

impl ReceivedSnapshot {
    pub(crate) fn new(handle: PendingHandle) -> Self {
        ReceivedSnapshot { handle }
    }

    /// Snapshot id advertised by the sender
    pub fn id(&self) -> SnapshotId {
        self.handle.id()
    }

    /// Pending directory chunks are written to
    pub fn path(&self) -> &Path {
        self.handle.directory()
    }

    /// Validate and write one chunk
    pub async fn apply(&self, chunk: SnapshotChunk) -> Result<ChunkOutcome> {
        if let Some(Terminal::Persisted(_)) = self.handle.terminal() {
            return Ok(ChunkOutcome::AlreadyCommitted);
        }

        let (id, key) = (self.handle.id(), self.handle.key());
        self.handle
            .actor()
            .call(move |store| store.apply_chunk(key, id, &chunk))
            .await?
    }

    /// Commit the snapshot once every chunk has arrived
    pub async fn persist(&self) -> Result<PersistedSnapshot> {
        self.handle.persist().await
    }

    /// Discard the snapshot; idempotent
    pub async fn abort(&self) -> Result<()> {
        self.handle.abort().await
    }
}

impl std::fmt::Debug for ReceivedSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceivedSnapshot")
            .field("id", &self.handle.id())
            .field("path", &self.handle.directory())
            .finish()
    }
}
