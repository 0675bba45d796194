//! Snapshot checksums
//!
//! Every committed snapshot carries a checksum record: one CRC32C per file
//! plus a combined CRC32C over the whole directory. The combined value is fed,
//! for every file in sorted-name order, with the file name bytes followed by
//! the file content. Two records are only comparable when computed over the
//! same sorted file set.
//!
//! # Formats
//!
//! - SFV-like text (current), see [`sfv`]
//! - Legacy 8-byte big-endian combined value, written by older versions.
//!   A record loaded from it has no per-file detail and cannot be extended.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

mod sfv;

pub use sfv::{LEGACY_CHECKSUM_SIZE, SFV_SEPARATOR};

/// Block size used when streaming file content into the checksum
pub const CHECKSUM_READ_BLOCK_SIZE: usize = 64 * 1024;

/// CRC32C of a byte slice, widened to the on-wire checksum type
pub fn checksum_bytes(content: &[u8]) -> u64 {
    u64::from(crc32c::crc32c(content))
}

/// Combined checksum state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combined {
    /// Accumulating CRC32C state, extended by every added file
    Live(u32),
    /// Value loaded from the legacy format; updates are rejected
    Fixed(u64),
}

impl Combined {
    /// The combined value
    pub fn value(&self) -> u64 {
        match *self {
            Combined::Live(crc) => u64::from(crc),
            Combined::Fixed(value) => value,
        }
    }
}

/// Checksum record for a snapshot directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SfvChecksum {
    combined: Combined,
    files: BTreeMap<String, u64>,
    snapshot_directory: Option<String>,
}

impl Default for SfvChecksum {
    fn default() -> Self {
        Self::new()
    }
}

impl SfvChecksum {
    /// Create an empty, updatable record
    pub fn new() -> Self {
        SfvChecksum {
            combined: Combined::Live(0),
            files: BTreeMap::new(),
            snapshot_directory: None,
        }
    }

    /// Create a record holding only a legacy combined value
    pub fn from_legacy(value: u64) -> Self {
        SfvChecksum {
            combined: Combined::Fixed(value),
            files: BTreeMap::new(),
            snapshot_directory: None,
        }
    }

    pub(crate) fn from_parts(
        combined: Combined,
        files: BTreeMap<String, u64>,
        snapshot_directory: Option<String>,
    ) -> Self {
        SfvChecksum {
            combined,
            files,
            snapshot_directory,
        }
    }

    /// The combined checksum over all files
    pub fn combined_value(&self) -> u64 {
        self.combined.value()
    }

    /// The combined checksum state
    pub fn combined(&self) -> Combined {
        self.combined
    }

    /// Whether this record came from the legacy format
    pub fn is_fixed(&self) -> bool {
        matches!(self.combined, Combined::Fixed(_))
    }

    /// Per-file checksums, sorted by file name
    pub fn file_checksums(&self) -> &BTreeMap<String, u64> {
        &self.files
    }

    /// Directory the record was computed over, if known
    pub fn snapshot_directory(&self) -> Option<&str> {
        self.snapshot_directory.as_deref()
    }

    /// Record the directory the checksum describes (informational only)
    pub fn set_snapshot_directory(&mut self, directory: impl Into<String>) {
        self.snapshot_directory = Some(directory.into());
    }

    /// Add a file, streaming its content in fixed-size blocks
    ///
    /// Files must be added in strictly increasing name order.
    pub fn update_from_file(&mut self, path: &Path) -> Result<(), ChecksumError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ChecksumError::Malformed(format!("{} has no file name", path.display()))
            })?;
        let mut combined = self.begin_update(&name)?;

        let io_err = |source| ChecksumError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(io_err)?;
        let mut buffer = vec![0u8; CHECKSUM_READ_BLOCK_SIZE];
        let mut file_crc = 0u32;
        loop {
            let read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_err(e)),
            };
            file_crc = crc32c::crc32c_append(file_crc, &buffer[..read]);
            combined = crc32c::crc32c_append(combined, &buffer[..read]);
        }

        self.combined = Combined::Live(combined);
        self.files.insert(name, u64::from(file_crc));
        Ok(())
    }

    /// Add an in-memory file
    ///
    /// Same ordering rules as [`SfvChecksum::update_from_file`].
    pub fn update_from_bytes(&mut self, name: &str, content: &[u8]) -> Result<(), ChecksumError> {
        let combined = self.begin_update(name)?;
        self.combined = Combined::Live(crc32c::crc32c_append(combined, content));
        self.files.insert(name.to_string(), checksum_bytes(content));
        Ok(())
    }

    /// Validate an update and return the combined state extended with the name
    fn begin_update(&self, name: &str) -> Result<u32, ChecksumError> {
        let crc = match self.combined {
            Combined::Live(crc) => crc,
            Combined::Fixed(_) => return Err(ChecksumError::Immutable),
        };
        if let Some(previous) = self.files.keys().next_back() {
            if name <= previous.as_str() {
                return Err(ChecksumError::OutOfOrder {
                    name: name.to_string(),
                    previous: previous.clone(),
                });
            }
        }
        Ok(crc32c::crc32c_append(crc, name.as_bytes()))
    }

    /// Read and parse a checksum file
    pub fn read_from(path: &Path) -> Result<Self, ChecksumError> {
        let bytes = std::fs::read(path).map_err(|source| ChecksumError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&bytes)
    }

    /// Write the record to `path` through `temp_path` (write, fsync, rename)
    pub fn write_to(&self, path: &Path, temp_path: &Path) -> io::Result<()> {
        crate::fs::write_file_atomically(path, temp_path, &self.serialize())
    }
}

/// Compute the checksum record of every regular file in `dir`
///
/// Files are visited in sorted-name order; subdirectories are ignored.
pub fn compute_directory_checksum(dir: &Path) -> Result<SfvChecksum, ChecksumError> {
    let io_err = |source| ChecksumError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if entry.file_type().map_err(io_err)?.is_file() {
            files.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut checksum = SfvChecksum::new();
    checksum.set_snapshot_directory(dir.display().to_string());
    for (_, path) in files {
        checksum.update_from_file(&path)?;
    }
    Ok(checksum)
}

/// Checksum errors
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    /// A file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File or directory that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The checksum file could not be parsed
    #[error("Malformed checksum file: {0}")]
    Malformed(String),

    /// Attempted to extend a record loaded from a legacy combined value
    #[error("Checksum loaded from a legacy combined value cannot be updated")]
    Immutable,

    /// Files were not added in sorted-name order
    #[error("File '{name}' added after '{previous}'; files must be added in sorted order")]
    OutOfOrder {
        /// File being added
        name: String,
        /// Last file already in the record
        previous: String,
    },
}
