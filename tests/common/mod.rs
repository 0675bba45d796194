//! Shared test utilities for the integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
pub use snapvault::*;
use tempfile::TempDir;

/// Files of the reference snapshot used across suites
pub const FILES: [(&str, &[u8]); 3] = [
    ("file1", b"this" as &[u8]),
    ("file2", b"is" as &[u8]),
    ("file3", b"content" as &[u8]),
];

/// Snapshot id whose positions are derived from the index
pub fn id(index: i64) -> SnapshotId {
    SnapshotId::new(index, 1, index * 10, index * 10)
}

// ============================================================================
// TestStore - snapshot store in a scratch directory
// ============================================================================

/// Snapshot store wrapper owning its scratch directory
pub struct TestStore {
    pub store: SnapshotStore,
    pub dir: TempDir,
    pub config: SnapshotStoreConfig,
}

impl TestStore {
    /// Open a store with test configuration
    pub async fn open() -> Self {
        Self::open_with(|config| config).await
    }

    /// Open a store with a customised test configuration
    pub async fn open_with(
        configure: impl FnOnce(SnapshotStoreConfig) -> SnapshotStoreConfig,
    ) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = configure(SnapshotStoreConfig::for_testing(dir.path().join("partition-1")));
        let store = SnapshotStore::open(config.clone())
            .await
            .expect("Failed to open snapshot store");
        TestStore { store, dir, config }
    }

    /// Close the store and open it again over the same root
    pub async fn reopen(&mut self) {
        self.store.close().await.expect("Failed to close snapshot store");
        self.store = SnapshotStore::open(self.config.clone())
            .await
            .expect("Failed to reopen snapshot store");
    }

    /// Partition root
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Store layout
    pub fn paths(&self) -> SnapshotStorePaths {
        self.config.paths()
    }

    /// Take and persist a snapshot holding `files`
    pub async fn take_snapshot(&self, index: i64, files: &[(&str, &[u8])]) -> PersistedSnapshot {
        let id = id(index);
        let transient = self
            .store
            .new_transient_snapshot(id.index, id.term, id.processed_position, id.exported_position)
            .await
            .expect("Failed to create transient snapshot");
        let owned = owned_files(files);
        assert!(transient
            .take(move |dir| write_files(dir, &owned))
            .await
            .expect("Failed to take snapshot"));
        transient.persist().await.expect("Failed to persist snapshot")
    }

    /// Names of the entries in `snapshots/`
    pub fn snapshot_entries(&self) -> Vec<String> {
        dir_entries(&self.paths().snapshots_dir())
    }

    /// Names of the entries in `pending/`
    pub fn pending_entries(&self) -> Vec<String> {
        dir_entries(&self.paths().pending_dir())
    }
}

// ============================================================================
// File helpers
// ============================================================================

/// Owned copy of a file list, for moving into writer callbacks
pub fn owned_files(files: &[(&str, &[u8])]) -> Vec<(String, Vec<u8>)> {
    files
        .iter()
        .map(|(name, content)| (name.to_string(), content.to_vec()))
        .collect()
}

/// Writer body that fills `dir` with `files`
pub fn write_files(dir: &Path, files: &[(String, Vec<u8>)]) -> anyhow::Result<bool> {
    for (name, content) in files {
        std::fs::write(dir.join(name), content)?;
    }
    Ok(true)
}

/// Sorted names of the entries in `dir`
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Sorted `(name, content)` pairs of the files in `dir`
pub fn read_files(dir: &Path) -> Vec<(String, Vec<u8>)> {
    dir_entries(dir)
        .into_iter()
        .map(|name| {
            let content = std::fs::read(dir.join(&name)).expect("Failed to read snapshot file");
            (name, content)
        })
        .collect()
}

/// Chunks of a persisted snapshot in reader order
pub fn read_chunks(snapshot: &PersistedSnapshot) -> Vec<SnapshotChunk> {
    snapshot
        .chunk_reader()
        .expect("Failed to open chunk reader")
        .collect::<Result<Vec<_>>>()
        .expect("Failed to read chunks")
}

// ============================================================================
// Listeners
// ============================================================================

/// Listener that records every snapshot it is told about
#[derive(Default)]
pub struct RecordingListener {
    pub seen: Mutex<Vec<SnapshotId>>,
}

impl RecordingListener {
    pub fn seen(&self) -> Vec<SnapshotId> {
        self.seen.lock().clone()
    }
}

impl SnapshotListener for RecordingListener {
    fn on_new_snapshot(&self, snapshot: &PersistedSnapshot) {
        self.seen.lock().push(snapshot.id());
    }
}

/// Listener that always panics
pub struct PanickingListener;

impl SnapshotListener for PanickingListener {
    fn on_new_snapshot(&self, _snapshot: &PersistedSnapshot) {
        panic!("listener failure");
    }
}
