//! Snapshot identity
//!
//! A snapshot is identified by the 4-tuple
//! `(index, term, processed_position, exported_position)`.
//!
//! ## Ordering
//!
//! Ids compare lexicographically over the tuple, index first. A snapshot
//! with a greater id always supersedes one with a smaller id.
//!
//! ## Encoding
//!
//! The id doubles as the name of the snapshot directory:
//! `index-term-processedPosition-exportedPosition`. Components are signed,
//! so a `-` directly following a separator is the sign of the next
//! component (`5-1-50--1`). Names found on disk are untrusted, so parsing
//! reports failures instead of panicking.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SEPARATOR: char = '-';

/// Identity of a snapshot
///
/// Field order matters: the derived `Ord` compares `index`, then `term`,
/// then `processed_position`, then `exported_position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotId {
    /// Log index covered by the snapshot
    pub index: i64,
    /// Term of the entry at `index`
    pub term: i64,
    /// Highest position processed by the state machine
    pub processed_position: i64,
    /// Highest position exported to external sinks
    pub exported_position: i64,
}

impl SnapshotId {
    /// Create a new snapshot id
    pub const fn new(
        index: i64,
        term: i64,
        processed_position: i64,
        exported_position: i64,
    ) -> Self {
        SnapshotId {
            index,
            term,
            processed_position,
            exported_position,
        }
    }

    /// Lowest position the log must still retain for this snapshot to be usable
    pub fn compaction_bound(&self) -> i64 {
        self.processed_position.min(self.exported_position)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}",
            self.index,
            self.term,
            self.processed_position,
            self.exported_position,
            sep = SEPARATOR
        )
    }
}

impl FromStr for SnapshotId {
    type Err = SnapshotIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = split_signed(s);
        if parts.len() != 4 {
            return Err(SnapshotIdError::WrongPartCount {
                value: s.to_string(),
                parts: parts.len(),
            });
        }

        let parse = |part: &'static str, value: &str| {
            value
                .parse::<i64>()
                .map_err(|_| SnapshotIdError::InvalidNumber {
                    part,
                    value: value.to_string(),
                })
        };

        Ok(SnapshotId {
            index: parse("index", parts[0])?,
            term: parse("term", parts[1])?,
            processed_position: parse("processed position", parts[2])?,
            exported_position: parse("exported position", parts[3])?,
        })
    }
}

/// Split on the separator, keeping a leading `-` as the sign of each part
fn split_signed(s: &str) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut parts = Vec::with_capacity(4);
    let mut start = 0;
    loop {
        let mut end = start;
        if bytes.get(end) == Some(&(SEPARATOR as u8)) {
            end += 1;
        }
        while end < bytes.len() && bytes[end] != SEPARATOR as u8 {
            end += 1;
        }
        parts.push(&s[start..end]);
        if end >= bytes.len() {
            return parts;
        }
        start = end + 1;
    }
}

impl TryFrom<&str> for SnapshotId {
    type Error = SnapshotIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Errors produced when parsing a snapshot id
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotIdError {
    /// The name does not consist of exactly four parts
    #[error("Expected snapshot id index-term-processed-exported, got '{value}' ({parts} parts)")]
    WrongPartCount {
        /// The rejected name
        value: String,
        /// Number of parts found
        parts: usize,
    },

    /// One of the parts is not a signed 64-bit integer
    #[error("Invalid {part} '{value}' in snapshot id")]
    InvalidNumber {
        /// Which component failed
        part: &'static str,
        /// The rejected component
        value: String,
    },
}
