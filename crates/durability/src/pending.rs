//! Bookkeeping shared by transient and received snapshots
//!
//! The store's actor owns every pending snapshot's mutable state. The handles
//! given to collaborators only carry the key into the pending set plus the
//! terminal outcome, which makes `persist()` and `abort()` idempotent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use snapvault_core::SnapshotId;

use crate::actor::Actor;
use crate::error::{Result, SnapshotStoreError};
use crate::persisted::PersistedSnapshot;
use crate::received::ReceivedState;
use crate::store::StoreState;
use crate::transient::TransientState;

/// A pending snapshot as tracked by the store
pub(crate) struct PendingSnapshot {
    pub(crate) id: SnapshotId,
    pub(crate) directory: PathBuf,
    pub(crate) kind: PendingKind,
}

pub(crate) enum PendingKind {
    Transient(TransientState),
    Received(ReceivedState),
}

impl PendingKind {
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, PendingKind::Transient(_))
    }
}

/// How a pending snapshot ended
#[derive(Clone)]
pub(crate) enum Terminal {
    Persisted(PersistedSnapshot),
    Aborted,
    Failed,
}

/// Collaborator-side handle on a pending snapshot
#[derive(Clone)]
pub(crate) struct PendingHandle {
    id: SnapshotId,
    directory: PathBuf,
    key: u64,
    actor: Actor<StoreState>,
    terminal: Arc<Mutex<Option<Terminal>>>,
}

impl PendingHandle {
    pub(crate) fn new(
        id: SnapshotId,
        directory: PathBuf,
        key: u64,
        actor: Actor<StoreState>,
    ) -> Self {
        PendingHandle {
            id,
            directory,
            key,
            actor,
            terminal: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn id(&self) -> SnapshotId {
        self.id
    }

    pub(crate) fn directory(&self) -> &Path {
        &self.directory
    }

    pub(crate) fn key(&self) -> u64 {
        self.key
    }

    pub(crate) fn actor(&self) -> &Actor<StoreState> {
        &self.actor
    }

    pub(crate) fn terminal(&self) -> Option<Terminal> {
        self.terminal.lock().clone()
    }

    /// Commit the pending snapshot through the store
    pub(crate) async fn persist(&self) -> Result<PersistedSnapshot> {
        let (id, key) = (self.id, self.key);
        let terminal = Arc::clone(&self.terminal);
        self.actor
            .call(move |store| {
                if let Some(outcome) = terminal.lock().clone() {
                    return match outcome {
                        Terminal::Persisted(snapshot) => Ok(snapshot),
                        Terminal::Aborted => Err(SnapshotStoreError::Aborted(id)),
                        Terminal::Failed => Err(SnapshotStoreError::illegal_state(format!(
                            "persisting snapshot {} already failed",
                            id
                        ))),
                    };
                }

                let result = store.persist_pending(key, id);
                let outcome = match &result {
                    Ok(snapshot) => Some(Terminal::Persisted(snapshot.clone())),
                    Err(SnapshotStoreError::Aborted(_)) => Some(Terminal::Aborted),
                    Err(_) if !store.has_pending(key) => Some(Terminal::Failed),
                    Err(_) => None,
                };
                *terminal.lock() = outcome;
                result
            })
            .await?
    }

    /// Drop the pending snapshot and its directory
    pub(crate) async fn abort(&self) -> Result<()> {
        let key = self.key;
        let terminal = Arc::clone(&self.terminal);
        self.actor
            .call(move |store| {
                if let Some(Terminal::Persisted(_)) = *terminal.lock() {
                    return Ok(());
                }
                store.abort_pending(key)?;
                *terminal.lock() = Some(Terminal::Aborted);
                Ok(())
            })
            .await?
    }
}
