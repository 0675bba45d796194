//! Committed snapshots
//!
//! A [`PersistedSnapshot`] is an immutable snapshot directory plus its
//! checksum file. It is created only by the store's commit protocol or by
//! startup recovery, and its files are only ever removed by the store.
//!
//! # Reservations
//!
//! Holders that stream a snapshot (e.g. to a follower) reserve it. Whether a
//! reservation delays deletion of a superseded snapshot depends on the
//! store's [`DeletionPolicy`](crate::config::DeletionPolicy); in every case a
//! deleted snapshot refuses new reservations.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use snapvault_core::SnapshotId;
use tracing::{debug, info, warn};

use crate::actor::WeakActor;
use crate::checksum::SfvChecksum;
use crate::chunk_reader::SnapshotChunkReader;
use crate::error::{Result, SnapshotStoreError};
use crate::fs::{remove_dir_if_exists, remove_file_if_exists};
use crate::store::StoreState;

/// A committed, checksum-verified snapshot
///
/// Cloning is cheap; all clones refer to the same snapshot.
#[derive(Clone)]
pub struct PersistedSnapshot {
    inner: Arc<PersistedInner>,
}

struct PersistedInner {
    id: SnapshotId,
    directory: PathBuf,
    checksum_path: PathBuf,
    checksum: SfvChecksum,
    reservations: Mutex<Reservations>,
    actor: WeakActor<StoreState>,
}

#[derive(Default)]
struct Reservations {
    next_id: u64,
    active: HashSet<u64>,
    deleted: bool,
    delete_on_release: bool,
}

impl PersistedSnapshot {
    pub(crate) fn new(
        id: SnapshotId,
        directory: PathBuf,
        checksum_path: PathBuf,
        checksum: SfvChecksum,
        actor: WeakActor<StoreState>,
    ) -> Self {
        PersistedSnapshot {
            inner: Arc::new(PersistedInner {
                id,
                directory,
                checksum_path,
                checksum,
                reservations: Mutex::new(Reservations::default()),
                actor,
            }),
        }
    }

    /// Snapshot id
    pub fn id(&self) -> SnapshotId {
        self.inner.id
    }

    /// Log index covered by the snapshot
    pub fn index(&self) -> i64 {
        self.inner.id.index
    }

    /// Term of the entry at the snapshot index
    pub fn term(&self) -> i64 {
        self.inner.id.term
    }

    /// Directory holding the snapshot files
    pub fn path(&self) -> &Path {
        &self.inner.directory
    }

    /// Commit marker file
    pub fn checksum_path(&self) -> &Path {
        &self.inner.checksum_path
    }

    /// Combined checksum of the snapshot
    pub fn checksum(&self) -> u64 {
        self.inner.checksum.combined_value()
    }

    /// Full checksum record as persisted in the commit marker
    pub fn checksum_record(&self) -> &SfvChecksum {
        &self.inner.checksum
    }

    /// Whether any reservation is outstanding
    pub fn is_reserved(&self) -> bool {
        !self.inner.reservations.lock().active.is_empty()
    }

    /// Whether the snapshot files have been removed
    pub fn is_deleted(&self) -> bool {
        self.inner.reservations.lock().deleted
    }

    /// Reader producing the snapshot's chunks in sorted-name order
    pub fn chunk_reader(&self) -> Result<SnapshotChunkReader> {
        SnapshotChunkReader::new(self.clone())
    }

    /// Pin the snapshot
    ///
    /// Runs on the store's actor, so it is ordered with respect to commits
    /// that may delete this snapshot. Fails once the snapshot is deleted or
    /// scheduled for deletion.
    pub async fn reserve(&self) -> Result<SnapshotReservation> {
        let actor = self
            .inner
            .actor
            .upgrade()
            .ok_or(SnapshotStoreError::ActorUnavailable)?;
        let snapshot = self.clone();
        actor.call(move |_| snapshot.try_reserve()).await?
    }

    fn try_reserve(&self) -> Result<SnapshotReservation> {
        let mut reservations = self.inner.reservations.lock();
        if reservations.deleted || reservations.delete_on_release {
            return Err(SnapshotStoreError::SnapshotDeleted(self.inner.id));
        }

        let reservation_id = reservations.next_id;
        reservations.next_id += 1;
        reservations.active.insert(reservation_id);
        debug!(
            target: "snapvault::store",
            snapshot = %self.inner.id,
            reservation_id,
            "Reserved snapshot"
        );

        Ok(SnapshotReservation {
            snapshot: self.clone(),
            reservation_id,
            released: false,
        })
    }

    fn release(&self, reservation_id: u64) {
        let delete_now = {
            let mut reservations = self.inner.reservations.lock();
            reservations.active.remove(&reservation_id);
            reservations.active.is_empty() && reservations.delete_on_release
        };
        debug!(
            target: "snapvault::store",
            snapshot = %self.inner.id,
            reservation_id,
            "Released snapshot reservation"
        );

        if delete_now {
            info!(
                target: "snapvault::store",
                snapshot = %self.inner.id,
                "Last reservation released, deleting superseded snapshot"
            );
            if let Err(e) = self.delete() {
                warn!(
                    target: "snapvault::store",
                    snapshot = %self.inner.id,
                    error = %e,
                    "Failed to delete superseded snapshot"
                );
            }
        }
    }

    /// Schedule deletion for when the last reservation is released
    ///
    /// Returns false, scheduling nothing, if the snapshot is not reserved.
    pub(crate) fn defer_deletion(&self) -> bool {
        let mut reservations = self.inner.reservations.lock();
        if reservations.active.is_empty() {
            return false;
        }
        reservations.delete_on_release = true;
        true
    }

    /// Mark the snapshot deleted after its files were removed along with the
    /// whole store, so a late release cannot touch a later snapshot reusing
    /// the same paths
    pub(crate) fn mark_deleted(&self) {
        let mut reservations = self.inner.reservations.lock();
        reservations.deleted = true;
        reservations.delete_on_release = false;
    }

    /// Remove the checksum file, then the directory
    ///
    /// Idempotent. The checksum file goes first so a crash in between leaves
    /// a directory without a commit marker, which recovery discards.
    pub(crate) fn delete(&self) -> io::Result<()> {
        let mut reservations = self.inner.reservations.lock();
        if reservations.deleted {
            return Ok(());
        }

        remove_file_if_exists(&self.inner.checksum_path)?;
        remove_dir_if_exists(&self.inner.directory)?;
        reservations.deleted = true;
        reservations.delete_on_release = false;
        debug!(target: "snapvault::store", snapshot = %self.inner.id, "Deleted snapshot");
        Ok(())
    }

    /// Whether both handles refer to the same snapshot instance
    pub fn ptr_eq(&self, other: &PersistedSnapshot) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for PersistedSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedSnapshot")
            .field("id", &self.inner.id)
            .field("path", &self.inner.directory)
            .field("checksum", &format_args!("{:08x}", self.checksum()))
            .finish()
    }
}

/// An outstanding pin on a persisted snapshot
///
/// Dropping the reservation releases it in the background; use
/// [`SnapshotReservation::release`] to wait for the release.
pub struct SnapshotReservation {
    snapshot: PersistedSnapshot,
    reservation_id: u64,
    released: bool,
}

impl SnapshotReservation {
    /// The reserved snapshot
    pub fn snapshot(&self) -> &PersistedSnapshot {
        &self.snapshot
    }

    /// Release the reservation and wait until it is processed
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let snapshot = self.snapshot.clone();
        let reservation_id = self.reservation_id;
        match snapshot.inner.actor.upgrade() {
            Some(actor) => actor.call(move |_| snapshot.release(reservation_id)).await,
            None => {
                snapshot.release(reservation_id);
                Ok(())
            }
        }
    }
}

impl Drop for SnapshotReservation {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let reservation_id = self.reservation_id;
        let queued = self.snapshot.inner.actor.upgrade().is_some_and(|actor| {
            let snapshot = self.snapshot.clone();
            actor.submit(move |_| snapshot.release(reservation_id))
        });
        if !queued {
            self.snapshot.release(reservation_id);
        }
    }
}

impl fmt::Debug for SnapshotReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotReservation")
            .field("snapshot", &self.snapshot.id())
            .field("reservation_id", &self.reservation_id)
            .finish()
    }
}
