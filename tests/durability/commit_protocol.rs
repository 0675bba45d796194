//! Commit Protocol Tests
//!
//! Transient snapshots taken and persisted through the store: visibility,
//! idempotence, monotonicity and rollback.

use crate::common::*;

#[tokio::test]
async fn transient_snapshot_becomes_current() {
    let test_store = TestStore::open().await;

    let snapshot = test_store.take_snapshot(1, &FILES).await;

    assert_eq!(snapshot.id(), id(1));
    assert_eq!(test_store.store.latest_snapshot().unwrap().id(), id(1));
    assert_eq!(snapshot.path(), test_store.paths().snapshot_dir(&id(1)));
    assert!(snapshot.checksum_path().exists());
    assert_eq!(read_files(snapshot.path()), owned_files(&FILES));
    assert!(test_store.pending_entries().is_empty());
    assert_eq!(
        test_store.snapshot_entries(),
        vec!["1-1-10-10".to_string(), "1-1-10-10.checksum".to_string()]
    );
}

#[tokio::test]
async fn checksum_file_describes_committed_directory() {
    let test_store = TestStore::open().await;

    let snapshot = test_store.take_snapshot(1, &FILES).await;

    let stored = SfvChecksum::read_from(snapshot.checksum_path()).unwrap();
    let computed = compute_directory_checksum(snapshot.path()).unwrap();
    assert_eq!(stored.combined_value(), snapshot.checksum());
    assert_eq!(stored.combined_value(), computed.combined_value());
    assert_eq!(stored.file_checksums().len(), 3);
    assert_eq!(
        stored.file_checksums()["file3"],
        u64::from(crc32c::crc32c(b"content"))
    );
}

#[tokio::test]
async fn persist_is_idempotent() {
    let test_store = TestStore::open().await;
    let transient = test_store.store.new_transient_snapshot(1, 1, 10, 10).await.unwrap();
    let files = owned_files(&FILES);
    transient.take(move |dir| write_files(dir, &files)).await.unwrap();

    let first = transient.persist().await.unwrap();
    let second = transient.persist().await.unwrap();

    assert!(first.ptr_eq(&second));
    assert!(second.path().exists());
}

#[tokio::test]
async fn snapshot_id_already_current_is_rejected() {
    let test_store = TestStore::open().await;
    test_store.take_snapshot(1, &FILES).await;

    let err = test_store.store.new_transient_snapshot(1, 1, 10, 10).await.unwrap_err();

    assert!(matches!(err, SnapshotStoreError::AlreadyExists(existing) if existing == id(1)));
}

#[tokio::test]
async fn concurrent_transient_with_same_id_is_rejected() {
    let test_store = TestStore::open().await;
    let _first = test_store.store.new_transient_snapshot(2, 1, 20, 20).await.unwrap();

    let err = test_store.store.new_transient_snapshot(2, 1, 20, 20).await.unwrap_err();

    assert!(matches!(err, SnapshotStoreError::AlreadyExists(_)));
}

#[tokio::test]
async fn older_snapshot_does_not_replace_newer() {
    let test_store = TestStore::open().await;
    test_store.take_snapshot(2, &FILES).await;

    let stale = test_store.store.new_transient_snapshot(1, 1, 10, 10).await.unwrap();
    let files = owned_files(&FILES);
    stale.take(move |dir| write_files(dir, &files)).await.unwrap();
    let result = stale.persist().await.unwrap();

    assert_eq!(result.id(), id(2));
    assert_eq!(test_store.store.latest_snapshot().unwrap().id(), id(2));
    assert!(!test_store.paths().snapshot_dir(&id(1)).exists());
    assert!(test_store.pending_entries().is_empty());
}

#[tokio::test]
async fn newer_commit_removes_previous_and_older_pending() {
    let test_store = TestStore::open().await;
    let m1 = test_store.take_snapshot(1, &FILES).await;
    let m0 = test_store.store.new_transient_snapshot(0, 1, 0, 0).await.unwrap();
    let files = owned_files(&FILES);
    m0.take(move |dir| write_files(dir, &files)).await.unwrap();

    let m2 = test_store.take_snapshot(2, &FILES).await;

    assert_eq!(test_store.store.latest_snapshot().unwrap().id(), m2.id());
    assert!(m1.is_deleted());
    assert!(!m1.path().exists());
    assert!(!m0.path().exists());
    assert!(test_store.pending_entries().is_empty());
    assert_eq!(
        test_store.snapshot_entries(),
        vec!["2-1-20-20".to_string(), "2-1-20-20.checksum".to_string()]
    );
    assert!(matches!(m0.persist().await, Err(SnapshotStoreError::Aborted(_))));
}

#[tokio::test]
async fn checksum_mismatch_rolls_back_commit() {
    let source = TestStore::open().await;
    let snapshot = source.take_snapshot(1, &FILES).await;
    let target = TestStore::open().await;

    let received = target.store.new_received_snapshot("1-1-10-10").await.unwrap();
    for mut chunk in read_chunks(&snapshot) {
        chunk.snapshot_checksum ^= 0xdead;
        received.apply(chunk).await.unwrap();
    }
    let err = received.persist().await.unwrap_err();

    assert!(matches!(err, SnapshotStoreError::ChecksumMismatch { .. }));
    assert!(err.is_retryable());
    assert!(target.store.latest_snapshot().is_none());
    assert!(target.snapshot_entries().is_empty());
    assert!(target.pending_entries().is_empty());
    assert!(received.persist().await.is_err());
}

#[tokio::test]
async fn take_twice_is_illegal() {
    let test_store = TestStore::open().await;
    let transient = test_store.store.new_transient_snapshot(1, 1, 10, 10).await.unwrap();
    let files = owned_files(&FILES);
    transient.take(move |dir| write_files(dir, &files)).await.unwrap();

    let err = transient.take(|_| Ok(true)).await.unwrap_err();

    assert!(matches!(err, SnapshotStoreError::IllegalState(_)));
}

#[tokio::test]
async fn persist_before_take_keeps_snapshot_pending() {
    let test_store = TestStore::open().await;
    let transient = test_store.store.new_transient_snapshot(1, 1, 10, 10).await.unwrap();

    let err = transient.persist().await.unwrap_err();
    assert!(matches!(err, SnapshotStoreError::IllegalState(_)));

    let files = owned_files(&FILES);
    transient.take(move |dir| write_files(dir, &files)).await.unwrap();
    let snapshot = transient.persist().await.unwrap();
    assert_eq!(snapshot.id(), id(1));
}

#[tokio::test]
async fn writer_returning_false_yields_invalid_snapshot() {
    let test_store = TestStore::open().await;
    let transient = test_store.store.new_transient_snapshot(1, 1, 10, 10).await.unwrap();

    assert!(!transient.take(|_| Ok(false)).await.unwrap());

    assert!(matches!(
        transient.persist().await,
        Err(SnapshotStoreError::IllegalState(_))
    ));
    assert!(test_store.store.latest_snapshot().is_none());
}

#[tokio::test]
async fn writer_leaving_directory_empty_yields_invalid_snapshot() {
    let test_store = TestStore::open().await;
    let transient = test_store.store.new_transient_snapshot(1, 1, 10, 10).await.unwrap();

    assert!(!transient.take(|_| Ok(true)).await.unwrap());
    assert!(transient.persist().await.is_err());
}

#[tokio::test]
async fn failing_writer_aborts_snapshot() {
    let test_store = TestStore::open().await;
    let transient = test_store.store.new_transient_snapshot(1, 1, 10, 10).await.unwrap();

    let err = transient
        .take(|dir| {
            std::fs::write(dir.join("partial"), b"half")?;
            anyhow::bail!("state machine failed")
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SnapshotStoreError::WriterFailed { .. }));
    assert!(!transient.path().exists());
    assert!(matches!(
        transient.persist().await,
        Err(SnapshotStoreError::Aborted(_))
    ));
    assert_eq!(test_store.store.pending_snapshot_count().await.unwrap(), 0);
}

#[tokio::test]
async fn panicking_writer_aborts_snapshot() {
    let test_store = TestStore::open().await;
    let transient = test_store.store.new_transient_snapshot(1, 1, 10, 10).await.unwrap();

    let err = transient
        .take(|_| -> anyhow::Result<bool> { panic!("writer bug") })
        .await
        .unwrap_err();

    assert!(matches!(err, SnapshotStoreError::WriterFailed { .. }));
    // The store keeps working
    test_store.take_snapshot(2, &FILES).await;
}

#[tokio::test]
async fn abort_is_idempotent_and_blocks_persist() {
    let test_store = TestStore::open().await;
    let transient = test_store.store.new_transient_snapshot(1, 1, 10, 10).await.unwrap();
    let files = owned_files(&FILES);
    transient.take(move |dir| write_files(dir, &files)).await.unwrap();

    transient.abort().await.unwrap();
    transient.abort().await.unwrap();

    assert!(!transient.path().exists());
    assert!(matches!(
        transient.persist().await,
        Err(SnapshotStoreError::Aborted(_))
    ));
    assert!(test_store.store.latest_snapshot().is_none());
}

#[tokio::test]
async fn abort_after_persist_is_noop() {
    let test_store = TestStore::open().await;
    let transient = test_store.store.new_transient_snapshot(1, 1, 10, 10).await.unwrap();
    let files = owned_files(&FILES);
    transient.take(move |dir| write_files(dir, &files)).await.unwrap();
    let snapshot = transient.persist().await.unwrap();

    transient.abort().await.unwrap();

    assert!(snapshot.path().exists());
    assert!(transient.persist().await.unwrap().ptr_eq(&snapshot));
}

#[tokio::test]
async fn existing_destination_with_matching_content_is_committed() {
    let test_store = TestStore::open().await;
    let destination = test_store.paths().snapshot_dir(&id(1));
    std::fs::create_dir(&destination).unwrap();
    write_files(&destination, &owned_files(&FILES)).unwrap();

    let transient = test_store.store.new_transient_snapshot(1, 1, 10, 10).await.unwrap();
    let files = owned_files(&FILES);
    transient.take(move |dir| write_files(dir, &files)).await.unwrap();
    let snapshot = transient.persist().await.unwrap();

    assert_eq!(snapshot.path(), destination);
    assert_eq!(test_store.store.latest_snapshot().unwrap().id(), id(1));
    assert!(snapshot.checksum_path().exists());
    assert_eq!(
        SfvChecksum::read_from(snapshot.checksum_path()).unwrap().combined_value(),
        snapshot.checksum()
    );
    assert!(!transient.path().exists());
    assert!(test_store.pending_entries().is_empty());
    assert_eq!(read_files(&destination), owned_files(&FILES));
}

#[tokio::test]
async fn existing_destination_with_other_content_is_rolled_back() {
    let test_store = TestStore::open().await;
    let destination = test_store.paths().snapshot_dir(&id(1));
    std::fs::create_dir(&destination).unwrap();
    std::fs::write(destination.join("file1"), b"stale leftovers").unwrap();

    let transient = test_store.store.new_transient_snapshot(1, 1, 10, 10).await.unwrap();
    let files = owned_files(&FILES);
    transient.take(move |dir| write_files(dir, &files)).await.unwrap();
    let err = transient.persist().await.unwrap_err();

    assert!(matches!(
        err,
        SnapshotStoreError::ChecksumMismatch { id: failed, .. } if failed == id(1)
    ));
    assert!(!destination.exists());
    assert!(!test_store.paths().checksum_path(&id(1)).exists());
    assert!(test_store.store.latest_snapshot().is_none());
    assert!(test_store.pending_entries().is_empty());
    assert!(test_store.snapshot_entries().is_empty());
}
