//! Crash points of the commit protocol
//!
//! A crash cannot be injected into a running store without killing the test
//! process, so the harness reproduces the files each crash point leaves
//! behind instead. Reopening the store over that layout must yield either
//! the old or the new snapshot, never a mix.

use std::io;
use std::path::Path;

use snapvault_core::SnapshotId;

use crate::checksum::SfvChecksum;
use crate::paths::SnapshotStorePaths;

/// Points at which a commit can be interrupted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashPoint {
    /// Files written to the pending directory, nothing moved yet
    BeforeMove,
    /// Directory moved into `snapshots/`, no checksum file yet
    AfterMoveBeforeChecksum,
    /// Temporary checksum file partially written
    DuringChecksumWrite,
    /// Checksum file renamed into place, current reference not yet swapped
    AfterChecksumBeforeSwap,
}

impl CrashPoint {
    /// Get all crash points
    pub fn all() -> Vec<CrashPoint> {
        vec![
            CrashPoint::BeforeMove,
            CrashPoint::AfterMoveBeforeChecksum,
            CrashPoint::DuringChecksumWrite,
            CrashPoint::AfterChecksumBeforeSwap,
        ]
    }

    /// Get description of crash point
    pub fn description(&self) -> &'static str {
        match self {
            CrashPoint::BeforeMove => "crash before the pending directory is moved",
            CrashPoint::AfterMoveBeforeChecksum => {
                "crash between directory move and checksum write"
            }
            CrashPoint::DuringChecksumWrite => "crash while the checksum file is being written",
            CrashPoint::AfterChecksumBeforeSwap => "crash after the checksum file is in place",
        }
    }

    /// Whether the snapshot counts as committed after this crash
    pub fn is_committed(&self) -> bool {
        matches!(self, CrashPoint::AfterChecksumBeforeSwap)
    }
}

/// Lay out the files a commit of `id` leaves when it crashes at `point`
///
/// `files` are the snapshot's file names and contents.
pub fn stage_crash(
    root: impl AsRef<Path>,
    id: SnapshotId,
    files: &[(&str, &[u8])],
    point: CrashPoint,
) -> io::Result<()> {
    let paths = SnapshotStorePaths::from_root(root);
    paths.create_directories()?;

    let pending = paths.transient_dir(&id);
    std::fs::create_dir_all(&pending)?;
    let mut checksum = SfvChecksum::new();
    let mut sorted = files.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    for (name, content) in &sorted {
        std::fs::write(pending.join(name), content)?;
        checksum
            .update_from_bytes(name, content)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    }
    if point == CrashPoint::BeforeMove {
        return Ok(());
    }

    let destination = paths.snapshot_dir(&id);
    std::fs::rename(&pending, &destination)?;
    checksum.set_snapshot_directory(destination.display().to_string());
    let serialized = checksum.serialize();

    match point {
        CrashPoint::BeforeMove | CrashPoint::AfterMoveBeforeChecksum => Ok(()),
        CrashPoint::DuringChecksumWrite => {
            let half = &serialized[..serialized.len() / 2];
            std::fs::write(paths.checksum_temp_path(&id), half)
        }
        CrashPoint::AfterChecksumBeforeSwap => std::fs::write(paths.checksum_path(&id), serialized),
    }
}
