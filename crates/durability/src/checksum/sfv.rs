//! SFV-like text format for checksum files
//!
//! ```text
//! ; This is an SFV checksum file for all files in the given snapshot directory.
//! ; It can be verified with cksfv or any other SFV compatible tool.
//! ;
//! ; combinedValue = 0a1b2c3d
//! ; snapshot directory = /data/snapshots/1-1-10-10
//! ; number of files = 2
//! file1   8e9f1a2b
//! file2   00c0ffee
//! ```
//!
//! The separator between a file name and its value is exactly three spaces.
//! An input of exactly eight bytes is the legacy big-endian combined value.

use std::collections::BTreeMap;

use super::{ChecksumError, Combined, SfvChecksum};

/// Separator between file name and checksum on a file line
pub const SFV_SEPARATOR: &str = "   ";

/// Size of the legacy binary checksum file
pub const LEGACY_CHECKSUM_SIZE: usize = 8;

const HEADER: &str = concat!(
    "; This is an SFV checksum file for all files in the given snapshot directory.\n",
    "; It can be verified with cksfv or any other SFV compatible tool.\n",
    ";\n",
);
const COMBINED_KEY: &str = "combinedValue =";
const DIRECTORY_KEY: &str = "snapshot directory =";
const FILE_COUNT_KEY: &str = "number of files =";

impl SfvChecksum {
    /// Serialize to the text format
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = String::from(HEADER);
        out.push_str(&format!("; {} {:08x}\n", COMBINED_KEY, self.combined_value()));
        if let Some(directory) = self.snapshot_directory() {
            out.push_str(&format!("; {} {}\n", DIRECTORY_KEY, directory));
        }
        out.push_str(&format!("; {} {}\n", FILE_COUNT_KEY, self.file_checksums().len()));
        for (name, crc) in self.file_checksums() {
            out.push_str(&format!("{}{}{:08x}\n", name, SFV_SEPARATOR, crc));
        }
        out.into_bytes()
    }

    /// Parse either the text format or the legacy 8-byte format
    pub fn parse(bytes: &[u8]) -> Result<Self, ChecksumError> {
        if bytes.len() == LEGACY_CHECKSUM_SIZE {
            let mut raw = [0u8; LEGACY_CHECKSUM_SIZE];
            raw.copy_from_slice(bytes);
            return Ok(SfvChecksum::from_legacy(u64::from_be_bytes(raw)));
        }

        let text = std::str::from_utf8(bytes)
            .map_err(|e| ChecksumError::Malformed(format!("not valid UTF-8: {}", e)))?;

        let mut combined = None;
        let mut directory = None;
        let mut declared_count = None;
        let mut files = BTreeMap::new();

        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            if let Some(comment) = line.strip_prefix(';') {
                let comment = comment.trim();
                if let Some(value) = comment.strip_prefix(COMBINED_KEY) {
                    combined = Some(parse_crc(value.trim())?);
                } else if let Some(value) = comment.strip_prefix(DIRECTORY_KEY) {
                    directory = Some(value.trim().to_string());
                } else if let Some(value) = comment.strip_prefix(FILE_COUNT_KEY) {
                    let count = value.trim().parse::<usize>().map_err(|_| {
                        ChecksumError::Malformed(format!("invalid file count '{}'", value.trim()))
                    })?;
                    declared_count = Some(count);
                }
                continue;
            }

            let (name, value) = line
                .rsplit_once(SFV_SEPARATOR)
                .ok_or_else(|| ChecksumError::Malformed(format!("invalid file line '{}'", line)))?;
            if name.is_empty() {
                return Err(ChecksumError::Malformed(format!("missing file name in '{}'", line)));
            }
            files.insert(name.to_string(), u64::from(parse_crc(value.trim())?));
        }

        let combined = combined
            .ok_or_else(|| ChecksumError::Malformed("missing combinedValue".to_string()))?;
        if let Some(count) = declared_count {
            if count != files.len() {
                return Err(ChecksumError::Malformed(format!(
                    "declares {} files but lists {}",
                    count,
                    files.len()
                )));
            }
        }

        Ok(SfvChecksum::from_parts(Combined::Live(combined), files, directory))
    }
}

fn parse_crc(value: &str) -> Result<u32, ChecksumError> {
    u32::from_str_radix(value, 16)
        .map_err(|_| ChecksumError::Malformed(format!("invalid checksum value '{}'", value)))
}
