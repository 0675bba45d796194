//! Actor-owned store state and the commit protocol

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use snapvault_core::{SnapshotChunk, SnapshotId};
use tracing::{debug, error, info, warn};

use crate::actor::WeakActor;
use crate::checksum::compute_directory_checksum;
use crate::config::{DeletionPolicy, SnapshotStoreConfig};
use crate::error::{Result, SnapshotStoreError};
use crate::fs::{move_directory, remove_dir_if_exists, remove_file_if_exists, MoveOutcome};
use crate::paths::SnapshotStorePaths;
use crate::pending::{PendingKind, PendingSnapshot};
use crate::persisted::PersistedSnapshot;
use crate::received::{ChunkOutcome, ChunkRejection, ReceivedState};
use crate::recovery::{recover, RecoveryReport};
use crate::store::SnapshotListener;
use crate::transient::{write_snapshot, TransientState};

/// State only the store's actor touches
pub(crate) struct StoreState {
    config: SnapshotStoreConfig,
    paths: SnapshotStorePaths,
    current: Arc<RwLock<Option<PersistedSnapshot>>>,
    pending: BTreeMap<u64, PendingSnapshot>,
    next_pending_key: u64,
    receive_count: u64,
    listeners: Vec<Arc<dyn SnapshotListener>>,
    deferred: Vec<PersistedSnapshot>,
    actor: WeakActor<StoreState>,
    closed: bool,
}

impl StoreState {
    pub(crate) fn new(
        config: SnapshotStoreConfig,
        current: Arc<RwLock<Option<PersistedSnapshot>>>,
        actor: WeakActor<StoreState>,
    ) -> Self {
        StoreState {
            paths: config.paths(),
            config,
            current,
            pending: BTreeMap::new(),
            next_pending_key: 0,
            receive_count: 0,
            listeners: Vec::new(),
            deferred: Vec::new(),
            actor,
            closed: false,
        }
    }

    /// State that is never opened, for tests that only need an actor
    #[cfg(test)]
    pub(crate) fn detached(actor: WeakActor<StoreState>) -> Self {
        Self::new(
            SnapshotStoreConfig::for_testing(std::env::temp_dir()),
            Arc::new(RwLock::new(None)),
            actor,
        )
    }

    fn partition_id(&self) -> u32 {
        self.config.partition_id
    }

    fn current_id(&self) -> Option<SnapshotId> {
        self.current.read().as_ref().map(PersistedSnapshot::id)
    }

    /// Load the latest valid snapshot from disk and clean up after crashes
    pub(crate) fn recover(&mut self) -> Result<RecoveryReport> {
        let (snapshot, report) = recover(&self.paths, self.actor.clone())?;
        *self.current.write() = snapshot;
        Ok(report)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(SnapshotStoreError::illegal_state(format!(
                "snapshot store of partition {} is closed",
                self.partition_id()
            )));
        }
        Ok(())
    }

    fn insert_pending(&mut self, id: SnapshotId, directory: PathBuf, kind: PendingKind) -> u64 {
        let key = self.next_pending_key;
        self.next_pending_key += 1;
        self.pending.insert(key, PendingSnapshot { id, directory, kind });
        key
    }

    /// Register a new transient snapshot and create its directory
    pub(crate) fn new_transient(&mut self, id: SnapshotId) -> Result<(u64, PathBuf)> {
        self.ensure_open()?;
        if self.current_id() == Some(id) {
            return Err(SnapshotStoreError::AlreadyExists(id));
        }
        if self
            .pending
            .values()
            .any(|pending| pending.id == id && pending.kind.is_transient())
        {
            return Err(SnapshotStoreError::AlreadyExists(id));
        }

        let directory = self.paths.transient_dir(&id);
        std::fs::create_dir_all(&directory)?;
        let key = self.insert_pending(
            id,
            directory.clone(),
            PendingKind::Transient(TransientState::Created),
        );
        debug!(
            target: "snapvault::transient",
            partition = self.partition_id(),
            snapshot = %id,
            "Created transient snapshot"
        );
        Ok((key, directory))
    }

    /// Register a new received snapshot and create its directory
    pub(crate) fn new_received(&mut self, id: SnapshotId) -> Result<(u64, PathBuf)> {
        self.ensure_open()?;
        self.receive_count += 1;
        let directory = self.paths.received_dir(&id, self.receive_count);
        std::fs::create_dir_all(&directory)?;
        let key = self.insert_pending(
            id,
            directory.clone(),
            PendingKind::Received(ReceivedState::default()),
        );
        debug!(
            target: "snapvault::received",
            partition = self.partition_id(),
            snapshot = %id,
            path = %directory.display(),
            "Created received snapshot"
        );
        Ok((key, directory))
    }

    pub(crate) fn has_pending(&self, key: u64) -> bool {
        self.pending.contains_key(&key)
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Run the writer of a transient snapshot
    pub(crate) fn take_transient<F>(&mut self, key: u64, id: SnapshotId, writer: F) -> Result<bool>
    where
        F: FnOnce(&Path) -> anyhow::Result<bool>,
    {
        let entry = self.pending.get_mut(&key).ok_or(SnapshotStoreError::Aborted(id))?;
        let PendingKind::Transient(state) = &mut entry.kind else {
            return Err(SnapshotStoreError::illegal_state(format!(
                "snapshot {} is not a transient snapshot",
                id
            )));
        };
        state.begin_take(id)?;

        match write_snapshot(id, &entry.directory, writer) {
            Ok(checksum) => {
                let valid = checksum.is_some();
                state.complete_take(checksum);
                debug!(
                    target: "snapvault::transient",
                    snapshot = %id,
                    valid,
                    "Took transient snapshot"
                );
                Ok(valid)
            }
            Err(e) => {
                warn!(
                    target: "snapvault::transient",
                    snapshot = %id,
                    error = %e,
                    "Writing snapshot failed, aborting"
                );
                self.discard_pending(key);
                Err(e)
            }
        }
    }

    /// Validate and write one chunk of a received snapshot
    pub(crate) fn apply_chunk(
        &mut self,
        key: u64,
        id: SnapshotId,
        chunk: &SnapshotChunk,
    ) -> Result<ChunkOutcome> {
        let committed = self.current_id() == Some(id);
        let block_size = self.config.write_block_size;
        let entry = self.pending.get_mut(&key).ok_or(SnapshotStoreError::Aborted(id))?;
        let PendingKind::Received(state) = &mut entry.kind else {
            return Err(SnapshotStoreError::illegal_state(format!(
                "snapshot {} is not a received snapshot",
                id
            )));
        };

        match state.apply(id, &entry.directory, chunk, committed, block_size) {
            Ok(outcome) => Ok(outcome),
            Err(ChunkRejection::Chunk(e)) => {
                warn!(
                    target: "snapvault::received",
                    snapshot = %id,
                    chunk = %chunk.chunk_name,
                    error = %e,
                    "Rejected chunk"
                );
                Err(e)
            }
            Err(ChunkRejection::Snapshot(e)) => {
                warn!(
                    target: "snapvault::received",
                    snapshot = %id,
                    chunk = %chunk.chunk_name,
                    error = %e,
                    "Inconsistent chunk, aborting received snapshot"
                );
                self.discard_pending(key);
                Err(e)
            }
        }
    }

    /// Commit a pending snapshot
    ///
    /// Preconditions that the caller can still fix (not taken yet, missing
    /// chunks) keep the snapshot pending. Once the commit starts the snapshot
    /// leaves the pending set whatever the outcome.
    ///
    /// A snapshot that is not newer than the current one is discarded and the
    /// current snapshot returned, even when its own preconditions do not hold.
    pub(crate) fn persist_pending(
        &mut self,
        key: u64,
        id: SnapshotId,
    ) -> Result<PersistedSnapshot> {
        if !self.pending.contains_key(&key) {
            return Err(SnapshotStoreError::Aborted(id));
        }
        let superseding = self.current.read().clone().filter(|current| current.id() >= id);
        if let Some(current) = superseding {
            debug!(
                target: "snapvault::store",
                snapshot = %id,
                current = %current.id(),
                "Snapshot is not newer than current, discarding pending snapshot"
            );
            self.discard_pending(key);
            self.purge_pending_below(current.id());
            return Ok(current);
        }

        let entry = self.pending.get(&key).ok_or(SnapshotStoreError::Aborted(id))?;
        let expected = match &entry.kind {
            PendingKind::Transient(state) => state.expected_checksum(id)?,
            PendingKind::Received(state) => state.expected_checksum(id, &entry.directory)?,
        };

        let Some(entry) = self.pending.remove(&key) else {
            return Err(SnapshotStoreError::Aborted(id));
        };
        let result = self.commit(id, &entry.directory, expected);
        if let Err(e) = remove_dir_if_exists(&entry.directory) {
            warn!(
                target: "snapvault::store",
                snapshot = %id,
                path = %entry.directory.display(),
                error = %e,
                "Failed to remove pending directory"
            );
        }
        result
    }

    /// Drop a pending snapshot and its directory; unknown keys are ignored
    pub(crate) fn abort_pending(&mut self, key: u64) -> Result<()> {
        if let Some(entry) = self.pending.remove(&key) {
            remove_dir_if_exists(&entry.directory)?;
            debug!(target: "snapvault::store", snapshot = %entry.id, "Aborted pending snapshot");
        }
        Ok(())
    }

    fn discard_pending(&mut self, key: u64) {
        if let Some(entry) = self.pending.remove(&key) {
            if let Err(e) = remove_dir_if_exists(&entry.directory) {
                warn!(
                    target: "snapvault::store",
                    snapshot = %entry.id,
                    error = %e,
                    "Failed to remove pending directory"
                );
            }
        }
    }

    /// Drop every pending snapshot older than `bound`
    pub(crate) fn purge_pending_below(&mut self, bound: SnapshotId) -> usize {
        let stale: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.id < bound)
            .map(|(key, _)| *key)
            .collect();
        for key in &stale {
            self.discard_pending(*key);
        }
        if !stale.is_empty() {
            debug!(
                target: "snapvault::store",
                bound = %bound,
                purged = stale.len(),
                "Purged stale pending snapshots"
            );
        }
        stale.len()
    }

    /// Drop every pending snapshot
    pub(crate) fn purge_all_pending(&mut self) -> usize {
        let keys: Vec<u64> = self.pending.keys().copied().collect();
        for key in &keys {
            self.discard_pending(*key);
        }
        keys.len()
    }

    /// Make the snapshot in `source` the current one
    ///
    /// 1. Stale ids leave the current snapshot in place
    /// 2. Move the directory into `snapshots/`
    /// 3. Verify the combined checksum of the moved directory
    /// 4. Write the checksum file, which marks the snapshot committed
    /// 5. Swap the current reference
    /// 6. Remove the superseded snapshot and older pending work
    /// 7. Notify listeners
    pub(crate) fn commit(
        &mut self,
        id: SnapshotId,
        source: &Path,
        expected: u64,
    ) -> Result<PersistedSnapshot> {
        let observed = self.current.read().clone();
        if let Some(current) = &observed {
            if current.id() >= id {
                debug!(
                    target: "snapvault::store",
                    snapshot = %id,
                    current = %current.id(),
                    "Snapshot is not newer than current, skipping commit"
                );
                self.purge_pending_below(current.id());
                return Ok(current.clone());
            }
        }

        let destination = self.paths.snapshot_dir(&id);
        match move_directory(source, &destination, self.config.allow_non_atomic_move)? {
            MoveOutcome::Renamed => {}
            MoveOutcome::AlreadyExists => {
                debug!(
                    target: "snapvault::store",
                    snapshot = %id,
                    path = %destination.display(),
                    "Snapshot directory already exists"
                );
                remove_dir_if_exists(source)?;
            }
            MoveOutcome::Copied => {
                warn!(
                    target: "snapvault::store",
                    snapshot = %id,
                    path = %destination.display(),
                    "Atomic move not possible, copied snapshot directory instead"
                );
            }
        }

        let checksum = match compute_directory_checksum(&destination) {
            Ok(checksum) => checksum,
            Err(e) => {
                self.discard_committed_files(id);
                return Err(e.into());
            }
        };
        if checksum.combined_value() != expected {
            self.discard_committed_files(id);
            return Err(SnapshotStoreError::ChecksumMismatch {
                id,
                expected,
                actual: checksum.combined_value(),
            });
        }

        let checksum_path = self.paths.checksum_path(&id);
        if let Err(e) = checksum.write_to(&checksum_path, &self.paths.checksum_temp_path(&id)) {
            self.discard_committed_files(id);
            return Err(e.into());
        }

        let snapshot =
            PersistedSnapshot::new(id, destination, checksum_path, checksum, self.actor.clone());
        {
            let mut current = self.current.write();
            let expected_id = observed.as_ref().map(PersistedSnapshot::id);
            let actual_id = current.as_ref().map(PersistedSnapshot::id);
            if expected_id != actual_id {
                drop(current);
                error!(
                    target: "snapvault::store",
                    snapshot = %id,
                    expected = ?expected_id,
                    actual = ?actual_id,
                    "Current snapshot changed during commit"
                );
                self.discard_committed_files(id);
                return Err(SnapshotStoreError::ConcurrentModification {
                    expected: expected_id,
                    actual: actual_id,
                });
            }
            *current = Some(snapshot.clone());
        }
        info!(
            target: "snapvault::store",
            partition = self.partition_id(),
            snapshot = %id,
            checksum = %format_args!("{:08x}", snapshot.checksum()),
            "Committed snapshot"
        );

        if let Some(previous) = observed {
            self.delete_superseded(&previous);
        }
        self.purge_pending_below(id);
        self.notify_listeners(&snapshot);
        Ok(snapshot)
    }

    fn discard_committed_files(&self, id: SnapshotId) {
        let files = [self.paths.checksum_path(&id), self.paths.checksum_temp_path(&id)];
        for file in &files {
            if let Err(e) = remove_file_if_exists(file) {
                warn!(
                    target: "snapvault::store",
                    snapshot = %id,
                    path = %file.display(),
                    error = %e,
                    "Failed to roll back commit"
                );
            }
        }
        if let Err(e) = remove_dir_if_exists(&self.paths.snapshot_dir(&id)) {
            warn!(
                target: "snapvault::store",
                snapshot = %id,
                error = %e,
                "Failed to roll back commit"
            );
        }
    }

    fn delete_superseded(&mut self, previous: &PersistedSnapshot) {
        if self.config.deletion_policy == DeletionPolicy::DeferWhileReserved
            && previous.defer_deletion()
        {
            info!(
                target: "snapvault::store",
                snapshot = %previous.id(),
                "Superseded snapshot is reserved, deferring deletion"
            );
            self.deferred.retain(|deferred| !deferred.is_deleted());
            self.deferred.push(previous.clone());
            return;
        }
        if previous.is_reserved() {
            debug!(
                target: "snapvault::store",
                snapshot = %previous.id(),
                "Deleting superseded snapshot despite reservations"
            );
        }
        if let Err(e) = previous.delete() {
            warn!(
                target: "snapvault::store",
                snapshot = %previous.id(),
                error = %e,
                "Failed to delete superseded snapshot"
            );
        }
    }

    fn notify_listeners(&self, snapshot: &PersistedSnapshot) {
        for listener in &self.listeners {
            let notified =
                panic::catch_unwind(AssertUnwindSafe(|| listener.on_new_snapshot(snapshot)));
            if notified.is_err() {
                error!(
                    target: "snapvault::store",
                    snapshot = %snapshot.id(),
                    "Snapshot listener panicked"
                );
            }
        }
    }

    pub(crate) fn add_listener(&mut self, listener: Arc<dyn SnapshotListener>) {
        self.listeners.push(listener);
    }

    pub(crate) fn remove_listener(&mut self, listener: &Arc<dyn SnapshotListener>) -> bool {
        let target = Arc::as_ptr(listener) as *const ();
        let before = self.listeners.len();
        self.listeners
            .retain(|registered| Arc::as_ptr(registered) as *const () != target);
        self.listeners.len() != before
    }

    /// Remove every snapshot and all pending work, leaving an empty store
    pub(crate) fn wipe(&mut self) -> Result<()> {
        self.purge_all_pending();
        let previous = self.current.write().take();
        if let Some(snapshot) = previous {
            snapshot.delete()?;
        }
        remove_dir_if_exists(&self.paths.snapshots_dir())?;
        remove_dir_if_exists(&self.paths.pending_dir())?;
        for deferred in self.deferred.drain(..) {
            deferred.mark_deleted();
        }
        self.paths.create_directories()?;
        info!(
            target: "snapvault::store",
            partition = self.partition_id(),
            "Deleted snapshot store contents"
        );
        Ok(())
    }

    /// Abort all pending work and refuse new pending snapshots
    pub(crate) fn close(&mut self) -> usize {
        self.closed = true;
        let aborted = self.purge_all_pending();
        info!(
            target: "snapvault::store",
            partition = self.partition_id(),
            aborted,
            "Closed snapshot store"
        );
        aborted
    }
}
