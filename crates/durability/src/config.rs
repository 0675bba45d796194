//! Snapshot store configuration

use std::path::{Path, PathBuf};

use crate::paths::SnapshotStorePaths;

/// Default block size for chunk writes (64 KiB)
pub const DEFAULT_WRITE_BLOCK_SIZE: usize = 64 * 1024;

/// What happens to a superseded snapshot that is still reserved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletionPolicy {
    /// Delete superseded snapshots right away
    ///
    /// Reservations only prevent new reservations on a deleted snapshot.
    #[default]
    Immediate,
    /// Keep a superseded snapshot on disk until its last reservation is released
    DeferWhileReserved,
}

/// Snapshot store configuration
#[derive(Debug, Clone)]
pub struct SnapshotStoreConfig {
    /// Partition root holding `snapshots/` and `pending/`
    pub root: PathBuf,
    /// Partition this store belongs to
    pub partition_id: u32,
    /// Handling of reserved snapshots on supersession
    pub deletion_policy: DeletionPolicy,
    /// Block size for chunk writes
    pub write_block_size: usize,
    /// Fall back to copy + delete when an atomic rename is not possible
    pub allow_non_atomic_move: bool,
}

impl SnapshotStoreConfig {
    /// Create config with defaults for the given partition root
    pub fn new(root: impl AsRef<Path>) -> Self {
        SnapshotStoreConfig {
            root: root.as_ref().to_path_buf(),
            partition_id: 1,
            deletion_policy: DeletionPolicy::default(),
            write_block_size: DEFAULT_WRITE_BLOCK_SIZE,
            allow_non_atomic_move: true,
        }
    }

    /// Create config for testing
    ///
    /// Uses a tiny write block so chunk writes span several blocks.
    pub fn for_testing(root: impl AsRef<Path>) -> Self {
        SnapshotStoreConfig {
            write_block_size: 16,
            ..Self::new(root)
        }
    }

    /// Set partition id
    pub fn with_partition_id(mut self, partition_id: u32) -> Self {
        self.partition_id = partition_id;
        self
    }

    /// Set deletion policy
    pub fn with_deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = policy;
        self
    }

    /// Set chunk write block size
    pub fn with_write_block_size(mut self, size: usize) -> Self {
        self.write_block_size = size;
        self
    }

    /// Allow or forbid the non-atomic move fallback
    pub fn with_non_atomic_move(mut self, allow: bool) -> Self {
        self.allow_non_atomic_move = allow;
        self
    }

    /// Paths derived from the root
    pub fn paths(&self) -> SnapshotStorePaths {
        SnapshotStorePaths::from_root(&self.root)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyRoot);
        }
        if self.write_block_size == 0 {
            return Err(ConfigError::InvalidWriteBlockSize(self.write_block_size));
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No partition root given
    #[error("Snapshot store root must not be empty")]
    EmptyRoot,

    /// Write block size must be positive
    #[error("Invalid write block size: {0}")]
    InvalidWriteBlockSize(usize),
}
