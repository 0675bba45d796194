//! Recovery Tests
//!
//! Reopen the store over the layouts crashes and storage faults leave
//! behind, and verify it comes back with the old or the new snapshot and
//! nothing in between.

use snapvault::testing::{stage_crash, CrashPoint, SnapshotCorruptionTester};

use crate::common::*;

#[tokio::test]
async fn reopen_recovers_committed_snapshot() {
    let mut test_store = TestStore::open().await;
    let snapshot = test_store.take_snapshot(1, &FILES).await;

    test_store.reopen().await;

    let recovered = test_store.store.latest_snapshot().unwrap();
    assert_eq!(recovered.id(), snapshot.id());
    assert_eq!(recovered.checksum(), snapshot.checksum());
    assert_eq!(test_store.store.recovery_report().recovered, Some(id(1)));
    assert!(!test_store.store.recovery_report().removed_anything());
}

#[tokio::test]
async fn crash_during_commit_is_atomic() {
    for point in CrashPoint::all() {
        let mut test_store = TestStore::open().await;
        test_store.take_snapshot(1, &FILES).await;
        test_store.store.close().await.unwrap();

        stage_crash(test_store.root(), id(2), &[("file1", &b"new state"[..])], point).unwrap();
        test_store.reopen().await;

        let expected = if point.is_committed() { id(2) } else { id(1) };
        let current = test_store.store.latest_snapshot().unwrap();
        assert_eq!(current.id(), expected, "{}", point.description());
        assert_eq!(
            test_store.snapshot_entries(),
            vec![expected.to_string(), format!("{}.checksum", expected)],
            "{}",
            point.description()
        );
        assert!(test_store.pending_entries().is_empty(), "{}", point.description());
    }
}

#[tokio::test]
async fn corrupted_snapshot_is_discarded() {
    let mut test_store = TestStore::open().await;
    test_store.take_snapshot(1, &FILES).await;
    test_store.store.close().await.unwrap();
    stage_crash(
        test_store.root(),
        id(2),
        &[("file1", &b"new state"[..])],
        CrashPoint::AfterChecksumBeforeSwap,
    )
    .unwrap();
    SnapshotCorruptionTester::new(test_store.root())
        .flip_bit(&id(2), "file1", 3)
        .unwrap();

    test_store.reopen().await;

    assert_eq!(test_store.store.latest_snapshot().unwrap().id(), id(1));
    assert_eq!(test_store.store.recovery_report().removed_corrupted, vec![id(2)]);
    assert!(!test_store.paths().snapshot_dir(&id(2)).exists());
    assert!(!test_store.paths().checksum_path(&id(2)).exists());
}

#[tokio::test]
async fn truncated_or_missing_files_invalidate_snapshot() {
    let mut test_store = TestStore::open().await;
    test_store.take_snapshot(1, &FILES).await;
    let tester = SnapshotCorruptionTester::new(test_store.root());

    tester.truncate(&id(1), "file3", 3).unwrap();
    test_store.reopen().await;
    assert!(test_store.store.latest_snapshot().is_none());

    test_store.take_snapshot(2, &FILES).await;
    tester.remove_file(&id(2), "file2").unwrap();
    test_store.reopen().await;
    assert!(test_store.store.latest_snapshot().is_none());
    assert!(test_store.snapshot_entries().is_empty());
}

#[tokio::test]
async fn damaged_checksum_file_invalidates_snapshot() {
    let mut test_store = TestStore::open().await;
    test_store.take_snapshot(1, &FILES).await;

    SnapshotCorruptionTester::new(test_store.root())
        .overwrite_checksum(&id(1), b"; combinedValue = zzzz\n")
        .unwrap();
    test_store.reopen().await;

    assert!(test_store.store.latest_snapshot().is_none());
}

#[tokio::test]
async fn legacy_checksum_file_is_accepted() {
    let mut test_store = TestStore::open().await;
    let snapshot = test_store.take_snapshot(1, &FILES).await;
    let combined = snapshot.checksum();

    SnapshotCorruptionTester::new(test_store.root())
        .overwrite_checksum(&id(1), &combined.to_be_bytes())
        .unwrap();
    test_store.reopen().await;

    let recovered = test_store.store.latest_snapshot().unwrap();
    assert!(recovered.checksum_record().is_fixed());
    assert_eq!(recovered.checksum(), combined);
}

#[tokio::test]
async fn pending_snapshots_do_not_survive_restart() {
    let mut test_store = TestStore::open().await;
    let transient = test_store.store.new_transient_snapshot(1, 1, 10, 10).await.unwrap();
    let files = owned_files(&FILES);
    transient.take(move |dir| write_files(dir, &files)).await.unwrap();
    test_store.store.new_received_snapshot("2-1-20-20").await.unwrap();

    test_store.reopen().await;

    assert!(test_store.store.latest_snapshot().is_none());
    assert!(test_store.pending_entries().is_empty());
    assert_eq!(test_store.store.pending_snapshot_count().await.unwrap(), 0);
}

#[tokio::test]
async fn unrecognized_entries_are_left_alone() {
    let mut test_store = TestStore::open().await;
    test_store.take_snapshot(1, &FILES).await;
    let foreign = test_store.paths().snapshots_dir().join("operator-notes");
    std::fs::create_dir(&foreign).unwrap();

    test_store.reopen().await;

    assert!(foreign.exists());
    assert_eq!(test_store.store.latest_snapshot().unwrap().id(), id(1));
    assert_eq!(
        test_store.store.recovery_report().ignored_entries,
        vec!["operator-notes".to_string()]
    );
}

#[tokio::test]
async fn negative_positions_survive_restart() {
    let mut test_store = TestStore::open().await;
    let transient = test_store.store.new_transient_snapshot(5, 1, 50, -1).await.unwrap();
    let files = owned_files(&FILES);
    transient.take(move |dir| write_files(dir, &files)).await.unwrap();
    let snapshot = transient.persist().await.unwrap();
    assert_eq!(snapshot.id().to_string(), "5-1-50--1");

    test_store.reopen().await;

    let recovered = test_store.store.latest_snapshot().unwrap();
    assert_eq!(recovered.id(), SnapshotId::new(5, 1, 50, -1));
    assert_eq!(recovered.checksum(), snapshot.checksum());
    assert!(test_store.store.recovery_report().ignored_entries.is_empty());
    assert!(!test_store.store.recovery_report().removed_anything());
}
