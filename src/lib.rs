//! Snapvault - crash-safe snapshot storage for replicated state machines
//!
//! A [`SnapshotStore`] keeps the latest committed snapshot of one partition
//! on disk. Snapshots are either taken locally ([`TransientSnapshot`]) or
//! received chunk by chunk from a peer ([`ReceivedSnapshot`]), and become
//! visible only once fully written and checksum-verified.
//!
//! # Quick Start
//!
//! ```ignore
//! use snapvault::{SnapshotStore, SnapshotStoreConfig};
//!
//! let store = SnapshotStore::open(SnapshotStoreConfig::new("/data/partition-1")).await?;
//!
//! let transient = store.new_transient_snapshot(100, 2, 100, 95).await?;
//! transient
//!     .take(|dir| {
//!         std::fs::write(dir.join("state"), b"...")?;
//!         Ok(true)
//!     })
//!     .await?;
//! let snapshot = transient.persist().await?;
//! assert_eq!(store.latest_snapshot().map(|s| s.id()), Some(snapshot.id()));
//! ```
//!
//! # Architecture
//!
//! Identity and transfer types live in `snapvault-core`; the store, commit
//! protocol and recovery live in `snapvault-durability`. This crate re-exports
//! both.

pub use snapvault_durability::*;
