//! Locally produced snapshots
//!
//! ```text
//! Created ──take()──▶ Taking ──▶ Valid ───persist()──▶ Persisted
//!                              └▶ Invalid      └─abort()──▶ Aborted
//! ```
//!
//! The state machine hands the pending directory to a writer callback that
//! fills it. A writer reporting success over an empty directory is demoted to
//! invalid; a failing or panicking writer aborts the snapshot.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use snapvault_core::SnapshotId;
use tracing::{debug, warn};

use crate::checksum::{compute_directory_checksum, SfvChecksum};
use crate::error::{Result, SnapshotStoreError};
use crate::pending::PendingHandle;
use crate::persisted::PersistedSnapshot;

/// Actor-owned state of a transient snapshot
#[derive(Debug)]
pub(crate) enum TransientState {
    Created,
    Taking,
    Valid(SfvChecksum),
    Invalid,
}

impl TransientState {
    pub(crate) fn begin_take(&mut self, id: SnapshotId) -> Result<()> {
        match self {
            TransientState::Created => {
                *self = TransientState::Taking;
                Ok(())
            }
            _ => Err(SnapshotStoreError::illegal_state(format!(
                "snapshot {} has already been taken",
                id
            ))),
        }
    }

    pub(crate) fn complete_take(&mut self, checksum: Option<SfvChecksum>) {
        *self = match checksum {
            Some(checksum) => TransientState::Valid(checksum),
            None => TransientState::Invalid,
        };
    }

    /// Combined checksum to commit with, if the snapshot may be persisted
    pub(crate) fn expected_checksum(&self, id: SnapshotId) -> Result<u64> {
        match self {
            TransientState::Valid(checksum) => Ok(checksum.combined_value()),
            TransientState::Invalid => Err(SnapshotStoreError::illegal_state(format!(
                "snapshot {} is invalid and cannot be persisted",
                id
            ))),
            TransientState::Created | TransientState::Taking => Err(
                SnapshotStoreError::illegal_state(format!(
                    "snapshot {} has not been taken yet",
                    id
                )),
            ),
        }
    }
}

/// Run the writer over `directory` and verify what it produced
///
/// Returns the checksum for a valid snapshot and `None` for an invalid one.
/// Errors mean the snapshot must be aborted.
pub(crate) fn write_snapshot<F>(
    id: SnapshotId,
    directory: &Path,
    writer: F,
) -> Result<Option<SfvChecksum>>
where
    F: FnOnce(&Path) -> anyhow::Result<bool>,
{
    let written = match panic::catch_unwind(AssertUnwindSafe(|| writer(directory))) {
        Ok(Ok(written)) => written,
        Ok(Err(e)) => {
            return Err(SnapshotStoreError::WriterFailed {
                id,
                reason: format!("{:#}", e),
            })
        }
        Err(_) => {
            return Err(SnapshotStoreError::WriterFailed {
                id,
                reason: "writer panicked".to_string(),
            })
        }
    };

    if !written {
        debug!(target: "snapvault::transient", snapshot = %id, "Writer reported no snapshot");
        return Ok(None);
    }

    if !has_files(directory)? {
        warn!(
            target: "snapvault::transient",
            snapshot = %id,
            path = %directory.display(),
            "Writer reported success but left no files"
        );
        return Ok(None);
    }

    Ok(Some(compute_directory_checksum(directory)?))
}

fn has_files(directory: &Path) -> Result<bool> {
    if !directory.is_dir() {
        return Ok(false);
    }
    for entry in std::fs::read_dir(directory)? {
        if entry?.file_type()?.is_file() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// A snapshot being produced by the local state machine
#[derive(Clone)]
pub struct TransientSnapshot {
    handle: PendingHandle,
}

impl TransientSnapshot {
    pub(crate) fn new(handle: PendingHandle) -> Self {
        TransientSnapshot { handle }
    }

    /// Snapshot id
    pub fn id(&self) -> SnapshotId {
        self.handle.id()
    }

    /// Pending directory the writer fills
    pub fn path(&self) -> &Path {
        self.handle.directory()
    }

    /// Let `writer` fill the pending directory
    ///
    /// Resolves to `true` if the snapshot is valid, `false` if the writer
    /// produced nothing. A failing writer aborts the snapshot.
    pub async fn take<F>(&self, writer: F) -> Result<bool>
    where
        F: FnOnce(&Path) -> anyhow::Result<bool> + Send + 'static,
    {
        let (id, key) = (self.handle.id(), self.handle.key());
        self.handle
            .actor()
            .call(move |store| store.take_transient(key, id, writer))
            .await?
    }

    /// Commit the snapshot
    ///
    /// Only valid once `take` completed with a valid snapshot.
    pub async fn persist(&self) -> Result<PersistedSnapshot> {
        self.handle.persist().await
    }

    /// Discard the snapshot; idempotent
    pub async fn abort(&self) -> Result<()> {
        self.handle.abort().await
    }
}

impl std::fmt::Debug for TransientSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransientSnapshot")
            .field("id", &self.handle.id())
            .field("path", &self.handle.directory())
            .finish()
    }
}
