//! Snapshot chunks
//!
//! A snapshot travels between nodes as one chunk per file. Chunk names are
//! the file names, so sorting chunks by name yields a stable order that a
//! receiver can resume from after a dropped connection.

use serde::{Deserialize, Serialize};

/// A single file of a snapshot, as sent over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotChunk {
    /// String form of the snapshot id the chunk belongs to
    pub snapshot_id: String,
    /// Name of the file inside the snapshot directory
    pub chunk_name: String,
    /// Raw file content
    pub content: Vec<u8>,
    /// CRC32C of `content`
    pub checksum: u64,
    /// Combined checksum of the whole snapshot
    pub snapshot_checksum: u64,
    /// Number of chunks the snapshot consists of
    pub total_count: u32,
}

impl SnapshotChunk {
    /// Size of the chunk payload in bytes
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Whether the chunk carries no payload
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}
