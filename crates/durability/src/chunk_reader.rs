//! Outbound chunk production
//!
//! Streams a persisted snapshot to a peer as one chunk per file, in sorted
//! file-name order. After a dropped connection the sender can `seek` to the
//! first chunk the receiver is still missing and continue from there.
//!
//! The reader does not pin the snapshot; callers streaming to a follower
//! should hold a [`SnapshotReservation`](crate::persisted::SnapshotReservation)
//! for the duration of the transfer.

use snapvault_core::SnapshotChunk;

use crate::checksum::checksum_bytes;
use crate::error::Result;
use crate::fs::list_file_names;
use crate::persisted::PersistedSnapshot;

/// Produces the chunks of a persisted snapshot
#[derive(Debug)]
pub struct SnapshotChunkReader {
    snapshot: PersistedSnapshot,
    snapshot_id: String,
    chunk_names: Vec<String>,
    position: usize,
}

impl SnapshotChunkReader {
    /// Create a reader positioned at the first chunk
    pub fn new(snapshot: PersistedSnapshot) -> Result<Self> {
        let chunk_names = list_file_names(snapshot.path())?;
        Ok(SnapshotChunkReader {
            snapshot_id: snapshot.id().to_string(),
            snapshot,
            chunk_names,
            position: 0,
        })
    }

    /// Number of chunks in the snapshot
    pub fn total_count(&self) -> u32 {
        self.chunk_names.len() as u32
    }

    /// Name of the chunk the next call to `next` returns
    pub fn next_id(&self) -> Option<&str> {
        self.chunk_names.get(self.position).map(String::as_str)
    }

    /// Position the reader at `chunk_name`, or at the first chunk after it
    /// if no chunk has that exact name
    pub fn seek(&mut self, chunk_name: &str) {
        self.position = self
            .chunk_names
            .partition_point(|name| name.as_str() < chunk_name);
    }

    /// Start over from the first chunk
    pub fn reset(&mut self) {
        self.position = 0;
    }

    fn read_chunk(&self, chunk_name: &str) -> Result<SnapshotChunk> {
        let content = std::fs::read(self.snapshot.path().join(chunk_name))?;
        Ok(SnapshotChunk {
            snapshot_id: self.snapshot_id.clone(),
            chunk_name: chunk_name.to_string(),
            checksum: checksum_bytes(&content),
            content,
            snapshot_checksum: self.snapshot.checksum(),
            total_count: self.total_count(),
        })
    }
}

impl Iterator for SnapshotChunkReader {
    type Item = Result<SnapshotChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk_name = self.chunk_names.get(self.position)?;
        let chunk = self.read_chunk(chunk_name);
        self.position += 1;
        Some(chunk)
    }
}
