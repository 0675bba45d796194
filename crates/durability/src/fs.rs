//! File system helpers for crash-safe snapshot I/O
//!
//! Commit markers use the write-fsync-rename pattern:
//! 1. Write to a temporary file
//! 2. fsync the temporary file
//! 3. Atomic rename to the final path
//! 4. fsync the parent directory

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// How a directory ended up at its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Atomic rename succeeded
    Renamed,
    /// The destination already existed; the source was left in place
    AlreadyExists,
    /// Rename was not possible, the directory was copied and the source removed
    Copied,
}

/// Move `source` to `destination`, preferring an atomic rename
///
/// When the rename crosses file systems and `allow_copy` is set, falls back
/// to a non-atomic copy followed by removal of the source.
pub fn move_directory(
    source: &Path,
    destination: &Path,
    allow_copy: bool,
) -> io::Result<MoveOutcome> {
    if destination.exists() {
        return Ok(MoveOutcome::AlreadyExists);
    }

    match fs::rename(source, destination) {
        Ok(()) => {
            sync_parent(destination)?;
            Ok(MoveOutcome::Renamed)
        }
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices && allow_copy => {
            copy_directory(source, destination)?;
            fs::remove_dir_all(source)?;
            sync_parent(destination)?;
            Ok(MoveOutcome::Copied)
        }
        Err(e) => Err(e),
    }
}

/// Recursively copy a directory, syncing every copied file
pub fn copy_directory(source: &Path, destination: &Path) -> io::Result<()> {
    fs::create_dir_all(destination)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = destination.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_directory(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            File::open(&target)?.sync_all()?;
        }
    }
    Ok(())
}

/// Write `content` to `path` through `temp_path` so the file appears atomically
pub fn write_file_atomically(path: &Path, temp_path: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(temp_path)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    fs::rename(temp_path, path)?;
    sync_parent(path)
}

/// Write `content` to a new file in fixed-size blocks, then force it to disk
///
/// Fails with `AlreadyExists` if the file is already present.
pub fn write_new_file(path: &Path, content: &[u8], block_size: usize) -> io::Result<()> {
    let mut file = OpenOptions::new().create_new(true).write(true).open(path)?;
    for block in content.chunks(block_size.max(1)) {
        file.write_all(block)?;
    }
    file.sync_all()
}

/// Remove a directory tree, tolerating its absence
///
/// Returns whether anything was removed.
pub fn remove_dir_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove a file, tolerating its absence
pub fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove everything inside `dir`, keeping the directory itself
pub fn clear_directory(dir: &Path) -> io::Result<usize> {
    let mut count = 0;
    if !dir.exists() {
        return Ok(0);
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
        count += 1;
    }
    Ok(count)
}

/// Number of regular files directly inside `dir`
pub fn count_files(dir: &Path) -> io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        if entry?.file_type()?.is_file() {
            count += 1;
        }
    }
    Ok(count)
}

/// Sorted names of the regular files directly inside `dir`
pub fn list_file_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => File::open(parent)?.sync_all(),
        None => Ok(()),
    }
}
