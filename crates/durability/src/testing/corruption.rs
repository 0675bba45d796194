//! Snapshot corruption testing utilities
//!
//! Damage committed snapshots to test that recovery discards them.
//!
//! - Bit rot: flip one bit of a snapshot file
//! - Truncation: cut a snapshot file short
//! - Missing file: remove a snapshot file
//! - Checksum damage: overwrite the commit marker

use std::io;
use std::path::{Path, PathBuf};

use snapvault_core::SnapshotId;

use crate::paths::SnapshotStorePaths;

/// Snapshot corruption test utilities
pub struct SnapshotCorruptionTester {
    paths: SnapshotStorePaths,
}

/// What a corruption step changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionResult {
    /// File that was changed
    pub path: PathBuf,
    /// Size before the change
    pub original_size: u64,
    /// Size after the change
    pub new_size: u64,
}

impl SnapshotCorruptionTester {
    /// Create a tester for the store at `root`
    pub fn new(root: impl AsRef<Path>) -> Self {
        SnapshotCorruptionTester {
            paths: SnapshotStorePaths::from_root(root),
        }
    }

    fn file(&self, id: &SnapshotId, name: &str) -> PathBuf {
        self.paths.snapshot_dir(id).join(name)
    }

    /// Flip the lowest bit of the byte at `offset`, wrapping to the file size
    pub fn flip_bit(
        &self,
        id: &SnapshotId,
        name: &str,
        offset: usize,
    ) -> io::Result<CorruptionResult> {
        let path = self.file(id, name);
        let mut content = std::fs::read(&path)?;
        let size = content.len() as u64;
        if !content.is_empty() {
            let at = offset % content.len();
            content[at] ^= 0x01;
        }
        std::fs::write(&path, &content)?;
        Ok(CorruptionResult {
            path,
            original_size: size,
            new_size: size,
        })
    }

    /// Truncate a snapshot file to `len` bytes
    pub fn truncate(&self, id: &SnapshotId, name: &str, len: u64) -> io::Result<CorruptionResult> {
        let path = self.file(id, name);
        let original_size = std::fs::metadata(&path)?.len();
        let new_size = len.min(original_size);
        let file = std::fs::OpenOptions::new().write(true).open(&path)?;
        file.set_len(new_size)?;
        file.sync_all()?;
        Ok(CorruptionResult {
            path,
            original_size,
            new_size,
        })
    }

    /// Remove a snapshot file
    pub fn remove_file(&self, id: &SnapshotId, name: &str) -> io::Result<CorruptionResult> {
        let path = self.file(id, name);
        let original_size = std::fs::metadata(&path)?.len();
        std::fs::remove_file(&path)?;
        Ok(CorruptionResult {
            path,
            original_size,
            new_size: 0,
        })
    }

    /// Replace the commit marker with `content`
    pub fn overwrite_checksum(
        &self,
        id: &SnapshotId,
        content: &[u8],
    ) -> io::Result<CorruptionResult> {
        let path = self.paths.checksum_path(id);
        let original_size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        std::fs::write(&path, content)?;
        Ok(CorruptionResult {
            path,
            original_size,
            new_size: content.len() as u64,
        })
    }
}
