//! Snapshot store
//!
//! One store per partition. It owns the partition's `snapshots/` and
//! `pending/` directories, creates pending snapshots, commits them, and
//! exposes the current snapshot.
//!
//! # Concurrency
//!
//! All mutations run on the store's actor thread in submission order. The
//! current snapshot is also published through a read-write lock that is
//! write-locked only for the pointer swap, so [`SnapshotStore::latest_snapshot`]
//! never waits for commit I/O.

mod state;

use std::sync::Arc;

use parking_lot::RwLock;
use snapvault_core::SnapshotId;
use tracing::info;

use crate::actor::Actor;
use crate::config::SnapshotStoreConfig;
use crate::error::Result;
use crate::paths::SnapshotStorePaths;
use crate::pending::PendingHandle;
use crate::persisted::PersistedSnapshot;
use crate::received::ReceivedSnapshot;
use crate::recovery::RecoveryReport;
use crate::transient::TransientSnapshot;

pub(crate) use state::StoreState;

/// Callback for newly committed snapshots
///
/// Invoked on the store's actor thread right after a commit; implementations
/// must not block. A panicking listener is logged and skipped.
pub trait SnapshotListener: Send + Sync {
    /// A snapshot became the current one
    fn on_new_snapshot(&self, snapshot: &PersistedSnapshot);
}

/// Handle to a partition's snapshot store
///
/// Cloning is cheap; clones share the same actor.
#[derive(Clone)]
pub struct SnapshotStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    actor: Actor<StoreState>,
    current: Arc<RwLock<Option<PersistedSnapshot>>>,
    paths: SnapshotStorePaths,
    partition_id: u32,
    recovery_report: RecoveryReport,
}

impl SnapshotStore {
    /// Open the store, recovering the latest valid snapshot from disk
    pub async fn open(config: SnapshotStoreConfig) -> Result<SnapshotStore> {
        config.validate()?;
        let partition_id = config.partition_id;
        let paths = config.paths();
        let current = Arc::new(RwLock::new(None));

        let shared = Arc::clone(&current);
        let actor = Actor::spawn(format!("snapvault-store-{}", partition_id), move |weak| {
            StoreState::new(config, shared, weak)
        })?;
        let recovery_report = actor.call(|store| store.recover()).await??;

        info!(
            target: "snapvault::store",
            partition = partition_id,
            root = %paths.root().display(),
            snapshot = ?recovery_report.recovered,
            "Opened snapshot store"
        );

        Ok(SnapshotStore {
            inner: Arc::new(StoreInner {
                actor,
                current,
                paths,
                partition_id,
                recovery_report,
            }),
        })
    }

    /// Partition this store belongs to
    pub fn partition_id(&self) -> u32 {
        self.inner.partition_id
    }

    /// Directory layout of the store
    pub fn paths(&self) -> &SnapshotStorePaths {
        &self.inner.paths
    }

    /// What startup recovery found and cleaned up
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.inner.recovery_report
    }

    /// Start a snapshot of local state
    ///
    /// Fails with `AlreadyExists` if the id is current or already being taken.
    pub async fn new_transient_snapshot(
        &self,
        index: i64,
        term: i64,
        processed_position: i64,
        exported_position: i64
    ) -> Result<TransientSnapshot> {
        let id = SnapshotId::new(index, term, processed_position, exported_position);
        let (key, directory) = self.inner.actor.call(move |store| store.new_transient(id)).await??;
        Ok(TransientSnapshot::new(PendingHandle::new(
            id,
            directory,
            key,
            self.inner.actor.clone(),
        )))
    }

    /// Start receiving a snapshot advertised by a peer
    pub async fn new_received_snapshot(&self, snapshot_id: &str) -> Result<ReceivedSnapshot> {
        let id: SnapshotId = snapshot_id.parse()?;
        let (key, directory) = self.inner.actor.call(move |store| store.new_received(id)).await??;
        Ok(ReceivedSnapshot::new(PendingHandle::new(
            id,
            directory,
            key,
            self.inner.actor.clone(),
        )))
    }

    /// The current snapshot, if any
    pub fn latest_snapshot(&self) -> Option<PersistedSnapshot> {
        self.inner.current.read().clone()
    }

    /// Index of the current snapshot, 0 without one
    pub fn current_snapshot_index(&self) -> u64 {
        self.inner
            .current
            .read()
            .as_ref()
            .map_or(0, |snapshot| u64::try_from(snapshot.index()).unwrap_or(0))
    }

    /// Position up to which the log may be compacted, 0 without a snapshot
    pub fn compaction_bound(&self) -> u64 {
        self.inner
            .current
            .read()
            .as_ref()
            .map_or(0, |snapshot| u64::try_from(snapshot.id().compaction_bound()).unwrap_or(0))
    }

    /// Every committed snapshot that is still available
    pub fn available_snapshots(&self) -> Vec<PersistedSnapshot> {
        self.latest_snapshot().into_iter().collect()
    }

    /// Whether the current snapshot has the given id
    pub fn has_snapshot_id(&self, snapshot_id: &str) -> bool {
        let Ok(id) = snapshot_id.parse::<SnapshotId>() else {
            return false;
        };
        self.latest_snapshot().is_some_and(|snapshot| snapshot.id() == id)
    }

    /// Register a listener for new snapshots
    pub async fn add_snapshot_listener(&self, listener: Arc<dyn SnapshotListener>) -> Result<()> {
        self.inner.actor.call(move |store| store.add_listener(listener)).await
    }

    /// Unregister a listener; returns whether it was registered
    pub async fn remove_snapshot_listener(
        &self,
        listener: &Arc<dyn SnapshotListener>,
    ) -> Result<bool> {
        let listener = Arc::clone(listener);
        self.inner
            .actor
            .call(move |store| store.remove_listener(&listener))
            .await
    }

    /// Abort every pending snapshot; returns how many were dropped
    pub async fn purge_pending_snapshots(&self) -> Result<usize> {
        self.inner.actor.call(|store| store.purge_all_pending()).await
    }

    /// Number of pending snapshots
    pub async fn pending_snapshot_count(&self) -> Result<usize> {
        self.inner.actor.call(|store| store.pending_count()).await
    }

    /// Remove every snapshot and all pending work
    pub async fn delete(&self) -> Result<()> {
        self.inner.actor.call(|store| store.wipe()).await?
    }

    /// Abort pending work and refuse new pending snapshots
    ///
    /// Committed snapshots stay readable.
    pub async fn close(&self) -> Result<()> {
        self.inner.actor.call(|store| store.close()).await?;
        Ok(())
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("partition_id", &self.inner.partition_id)
            .field("root", &self.inner.paths.root())
            .field("current", &self.latest_snapshot().map(|s| s.id()))
            .finish()
    }
}
