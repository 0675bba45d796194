//! Snapshot store directory structure
//!
//! Each partition owns one store root:
//!
//! ```text
//! partition-1/
//! ├── snapshots/                  # Committed snapshots
//! │   ├── 10-2-100-90/            # State machine files
//! │   ├── 10-2-100-90.checksum    # Commit marker
//! │   └── ...
//! └── pending/                    # In-progress work, purged on restart
//!     ├── 12-2-120-110/           # Transient snapshot
//!     └── 12-2-120-110-3/         # Received snapshot, receive attempt 3
//! ```

use std::path::{Path, PathBuf};

use snapvault_core::SnapshotId;

/// Extension of the commit marker file
pub const CHECKSUM_EXTENSION: &str = "checksum";

/// Suffix of a checksum file that is still being written
pub const CHECKSUM_TEMP_SUFFIX: &str = ".checksum.tmp";

/// Snapshot store paths
#[derive(Debug, Clone)]
pub struct SnapshotStorePaths {
    root: PathBuf,
}

impl SnapshotStorePaths {
    /// Create paths from the partition root
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        SnapshotStorePaths {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Get the partition root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the committed snapshots directory
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    /// Get the pending directory
    pub fn pending_dir(&self) -> PathBuf {
        self.root.join("pending")
    }

    /// Directory of a committed snapshot
    pub fn snapshot_dir(&self, id: &SnapshotId) -> PathBuf {
        self.snapshots_dir().join(id.to_string())
    }

    /// Commit marker of a committed snapshot
    pub fn checksum_path(&self, id: &SnapshotId) -> PathBuf {
        self.snapshots_dir()
            .join(format!("{}.{}", id, CHECKSUM_EXTENSION))
    }

    /// Temporary file the commit marker is written to before the rename
    pub fn checksum_temp_path(&self, id: &SnapshotId) -> PathBuf {
        self.snapshots_dir()
            .join(format!("{}{}", id, CHECKSUM_TEMP_SUFFIX))
    }

    /// Working directory of a transient snapshot
    pub fn transient_dir(&self, id: &SnapshotId) -> PathBuf {
        self.pending_dir().join(id.to_string())
    }

    /// Working directory of a received snapshot
    ///
    /// The receive counter keeps concurrent attempts at the same id apart.
    pub fn received_dir(&self, id: &SnapshotId, receive_count: u64) -> PathBuf {
        self.pending_dir().join(format!("{}-{}", id, receive_count))
    }

    /// Create the directory structure
    pub fn create_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.snapshots_dir())?;
        std::fs::create_dir_all(self.pending_dir())?;
        Ok(())
    }
}

/// Parse the snapshot id out of a commit marker file name
pub fn parse_checksum_file_name(file_name: &str) -> Option<SnapshotId> {
    file_name
        .strip_suffix(CHECKSUM_EXTENSION)?
        .strip_suffix('.')?
        .parse()
        .ok()
}
