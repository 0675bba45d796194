//! Startup recovery
//!
//! A crash can leave the store in any state the commit protocol passes
//! through. Recovery restores the invariant that `snapshots/` holds at most
//! one committed snapshot and nothing else the store manages:
//!
//! 1. `pending/` is emptied; in-progress snapshots never survive a restart
//! 2. Snapshot directories without a checksum file are partial and removed
//! 3. Snapshots whose checksum file is unreadable or disagrees with the
//!    directory content are corrupt and removed
//! 4. The greatest remaining snapshot becomes current, older ones are removed
//! 5. Orphan checksum files and leftover temporary checksum files are removed
//!
//! Entries whose names do not parse as snapshot ids are left alone.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use snapvault_core::SnapshotId;
use tracing::{debug, info, warn};

use crate::actor::WeakActor;
use crate::checksum::{compute_directory_checksum, SfvChecksum};
use crate::error::{Result, SnapshotStoreError};
use crate::fs::{clear_directory, remove_dir_if_exists, remove_file_if_exists};
use crate::paths::{parse_checksum_file_name, SnapshotStorePaths, CHECKSUM_TEMP_SUFFIX};
use crate::persisted::PersistedSnapshot;
use crate::store::StoreState;

/// What recovery found and cleaned up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Snapshot that became current
    pub recovered: Option<SnapshotId>,
    /// Snapshot directories removed for lacking a checksum file
    pub removed_partial: Vec<SnapshotId>,
    /// Snapshots removed because their content did not match the checksum
    pub removed_corrupted: Vec<SnapshotId>,
    /// Valid snapshots removed because a newer one exists
    pub removed_superseded: Vec<SnapshotId>,
    /// Checksum files without a snapshot directory
    pub removed_orphan_checksums: usize,
    /// Temporary checksum files from interrupted commits
    pub removed_temp_files: usize,
    /// Entries removed from `pending/`
    pub purged_pending: usize,
    /// Entries in `snapshots/` the store does not manage
    pub ignored_entries: Vec<String>,
}

impl RecoveryReport {
    /// Whether recovery had to remove anything from `snapshots/`
    pub fn removed_anything(&self) -> bool {
        !self.removed_partial.is_empty()
            || !self.removed_corrupted.is_empty()
            || !self.removed_superseded.is_empty()
            || self.removed_orphan_checksums > 0
            || self.removed_temp_files > 0
    }
}

/// Scan the store and load its current snapshot
pub(crate) fn recover(
    paths: &SnapshotStorePaths,
    actor: WeakActor<StoreState>,
) -> Result<(Option<PersistedSnapshot>, RecoveryReport)> {
    let mut report = RecoveryReport::default();

    // Step 1: Directories and pending work
    paths.create_directories()?;
    report.purged_pending = clear_directory(&paths.pending_dir())?;
    if report.purged_pending > 0 {
        info!(
            target: "snapvault::recovery",
            purged = report.purged_pending,
            "Purged pending snapshots"
        );
    }

    // Step 2: Classify entries of snapshots/
    let mut candidates: Vec<(SnapshotId, PathBuf)> = Vec::new();
    let mut checksum_files: BTreeMap<SnapshotId, PathBuf> = BTreeMap::new();
    for entry in std::fs::read_dir(paths.snapshots_dir())? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();

        if entry.file_type()?.is_dir() {
            match name.parse::<SnapshotId>() {
                Ok(id) => candidates.push((id, path)),
                Err(_) => {
                    debug!(
                        target: "snapvault::recovery",
                        entry = %name,
                        "Ignoring unrecognized directory"
                    );
                    report.ignored_entries.push(name);
                }
            }
        } else if name.ends_with(CHECKSUM_TEMP_SUFFIX) {
            remove_file_if_exists(&path)?;
            report.removed_temp_files += 1;
            debug!(target: "snapvault::recovery", entry = %name, "Removed temporary checksum file");
        } else if let Some(id) = parse_checksum_file_name(&name) {
            checksum_files.insert(id, path);
        } else {
            debug!(target: "snapvault::recovery", entry = %name, "Ignoring unrecognized file");
            report.ignored_entries.push(name);
        }
    }

    // Step 3: Newest valid candidate wins
    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    let mut current: Option<PersistedSnapshot> = None;
    for (id, directory) in candidates {
        let Some(checksum_path) = checksum_files.remove(&id) else {
            info!(
                target: "snapvault::recovery",
                snapshot = %id,
                "Removing partial snapshot without checksum file"
            );
            remove_dir_if_exists(&directory)?;
            report.removed_partial.push(id);
            continue;
        };

        if current.is_some() {
            debug!(target: "snapvault::recovery", snapshot = %id, "Removing superseded snapshot");
            remove_file_if_exists(&checksum_path)?;
            remove_dir_if_exists(&directory)?;
            report.removed_superseded.push(id);
            continue;
        }

        match verify(id, &directory, &checksum_path) {
            Ok(checksum) => {
                current = Some(PersistedSnapshot::new(
                    id,
                    directory,
                    checksum_path,
                    checksum,
                    actor.clone(),
                ));
            }
            Err(e) => {
                warn!(
                    target: "snapvault::recovery",
                    snapshot = %id,
                    error = %e,
                    "Discarding corrupted snapshot"
                );
                remove_file_if_exists(&checksum_path)?;
                remove_dir_if_exists(&directory)?;
                report.removed_corrupted.push(id);
            }
        }
    }

    // Step 4: Checksum files nobody claimed
    for (id, path) in checksum_files {
        debug!(target: "snapvault::recovery", snapshot = %id, "Removing orphan checksum file");
        remove_file_if_exists(&path)?;
        report.removed_orphan_checksums += 1;
    }

    report.recovered = current.as_ref().map(PersistedSnapshot::id);
    info!(
        target: "snapvault::recovery",
        snapshot = ?report.recovered,
        partial = report.removed_partial.len(),
        corrupted = report.removed_corrupted.len(),
        superseded = report.removed_superseded.len(),
        "Snapshot store recovery complete"
    );
    Ok((current, report))
}

/// Check a snapshot directory against its checksum file
///
/// Returns the record as stored, so legacy checksum files stay legacy.
fn verify(id: SnapshotId, directory: &Path, checksum_path: &Path) -> Result<SfvChecksum> {
    let expected = SfvChecksum::read_from(checksum_path)?;
    let actual = compute_directory_checksum(directory)?;
    if expected.combined_value() != actual.combined_value() {
        return Err(SnapshotStoreError::ChecksumMismatch {
            id,
            expected: expected.combined_value(),
            actual: actual.combined_value(),
        });
    }
    Ok(expected)
}
