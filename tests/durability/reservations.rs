//! Reservation Tests
//!
//! Reserved snapshots superseded by a newer commit, under both deletion
//! policies.

use crate::common::*;

async fn deferring_store() -> TestStore {
    TestStore::open_with(|config| config.with_deletion_policy(DeletionPolicy::DeferWhileReserved))
        .await
}

#[tokio::test]
async fn reserve_and_release() {
    let test_store = TestStore::open().await;
    let snapshot = test_store.take_snapshot(1, &FILES).await;

    let reservation = snapshot.reserve().await.unwrap();
    assert!(snapshot.is_reserved());
    assert_eq!(reservation.snapshot().id(), id(1));

    reservation.release().await.unwrap();
    assert!(!snapshot.is_reserved());
}

#[tokio::test]
async fn immediate_policy_deletes_reserved_snapshot() {
    let test_store = TestStore::open().await;
    let old = test_store.take_snapshot(1, &FILES).await;
    let reservation = old.reserve().await.unwrap();

    test_store.take_snapshot(2, &FILES).await;

    assert!(old.is_deleted());
    assert!(!old.path().exists());
    assert!(matches!(
        old.reserve().await,
        Err(SnapshotStoreError::SnapshotDeleted(_))
    ));
    reservation.release().await.unwrap();
}

#[tokio::test]
async fn deferred_policy_keeps_reserved_snapshot_until_release() {
    let test_store = deferring_store().await;
    let old = test_store.take_snapshot(1, &FILES).await;
    let first = old.reserve().await.unwrap();
    let second = old.reserve().await.unwrap();

    test_store.take_snapshot(2, &FILES).await;

    assert!(!old.is_deleted());
    assert_eq!(read_files(old.path()), owned_files(&FILES));
    assert!(matches!(
        old.reserve().await,
        Err(SnapshotStoreError::SnapshotDeleted(_))
    ));

    first.release().await.unwrap();
    assert!(old.path().exists());

    second.release().await.unwrap();
    assert!(old.is_deleted());
    assert!(!old.path().exists());
    assert!(!old.checksum_path().exists());
}

#[tokio::test]
async fn deferred_policy_deletes_unreserved_snapshot_immediately() {
    let test_store = deferring_store().await;
    let old = test_store.take_snapshot(1, &FILES).await;

    test_store.take_snapshot(2, &FILES).await;

    assert!(old.is_deleted());
}

#[tokio::test]
async fn dropping_reservation_releases_it() {
    let test_store = deferring_store().await;
    let old = test_store.take_snapshot(1, &FILES).await;
    let reservation = old.reserve().await.unwrap();
    test_store.take_snapshot(2, &FILES).await;

    drop(reservation);
    // Any later call runs after the queued release
    test_store.store.pending_snapshot_count().await.unwrap();

    assert!(old.is_deleted());
}

#[tokio::test]
async fn reservation_of_current_survives_restart_cleanup() {
    let mut test_store = TestStore::open().await;
    test_store.take_snapshot(1, &FILES).await;
    test_store.reopen().await;

    let current = test_store.store.latest_snapshot().unwrap();
    let reservation = current.reserve().await.unwrap();
    assert!(current.is_reserved());
    drop(reservation);
}

#[tokio::test]
async fn release_after_store_wipe_leaves_recommitted_snapshot_alone() {
    let test_store = deferring_store().await;
    let old = test_store.take_snapshot(1, &FILES).await;
    let reservation = old.reserve().await.unwrap();
    test_store.take_snapshot(2, &FILES).await;
    assert!(!old.is_deleted());

    test_store.store.delete().await.unwrap();
    assert!(old.is_deleted());
    let recommitted = test_store.take_snapshot(1, &FILES).await;

    reservation.release().await.unwrap();

    assert!(recommitted.path().exists());
    assert!(recommitted.checksum_path().exists());
    assert_eq!(test_store.store.latest_snapshot().unwrap().id(), id(1));
    assert_eq!(read_files(recommitted.path()), owned_files(&FILES));
}
