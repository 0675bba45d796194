//! Testing utilities for the snapshot store
//!
//! - **Crash staging**: lay out the on-disk state a crash at a given point of
//!   the commit protocol leaves behind
//! - **Corruption**: damage committed snapshots the way failing storage does
//!
//! # Example
//!
//! ```ignore
//! use snapvault_durability::testing::{stage_crash, CrashPoint};
//!
//! stage_crash(root, id, &[("a", b"data")], CrashPoint::AfterMoveBeforeChecksum)?;
//! // Reopening the store must not expose the snapshot
//! ```

mod corruption;
mod crash;

pub use corruption::{CorruptionResult, SnapshotCorruptionTester};
pub use crash::{stage_crash, CrashPoint};
