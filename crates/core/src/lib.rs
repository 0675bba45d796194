//! Core types for Snapvault
//!
//! This crate defines the types shared between the snapshot engine and its
//! collaborators (replication, transport):
//! - SnapshotId: Totally ordered identity of a snapshot, encoded as a directory name
//! - SnapshotChunk: Unit of snapshot transfer between nodes
//! - SnapshotIdError: Parse failures for untrusted snapshot names

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod snapshot_id;

pub use chunk::SnapshotChunk;
pub use snapshot_id::{SnapshotId, SnapshotIdError};
