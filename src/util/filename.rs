//! Database file naming conventions.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// File types in the database directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Write-ahead log segment.
    Log,
    /// Lock file to prevent concurrent access.
    Lock,
    /// Table file (`.sst` or `.ldb`).
    Table,
    /// Metadata journal.
    Manifest,
    /// Pointer to the active metadata journal.
    Current,
    /// Staging file for replacing CURRENT.
    Temp,
    /// Diagnostic text log.
    InfoLog,
}

/// Generate the lock file path.
pub fn lock_file_path(db_path: &Path) -> PathBuf {
    db_path.join("LOCK")
}

/// Generate the current file path.
pub fn current_file_path(db_path: &Path) -> PathBuf {
    db_path.join("CURRENT")
}

/// Name of a manifest file relative to the database directory.
pub fn manifest_file_name(number: u64) -> String {
    format!("MANIFEST-{:06}", number)
}

/// Generate a manifest file path.
pub fn manifest_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(manifest_file_name(number))
}

/// Generate a log (WAL) file path.
pub fn log_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("{:06}.log", number))
}

/// Generate a table file path.
pub fn table_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("{:06}.ldb", number))
}

/// Generate a table file path with the older `.sst` suffix.
pub fn sst_table_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("{:06}.sst", number))
}

/// Generate a temporary file path.
pub fn temp_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("{:06}.dbtmp", number))
}

/// Generate the info log file path.
pub fn info_log_path(db_path: &Path) -> PathBuf {
    db_path.join("LOG")
}

/// Generate the old info log file path.
pub fn old_info_log_path(db_path: &Path) -> PathBuf {
    db_path.join("LOG.old")
}

/// Parse a file name and return its type and number.
///
/// Returns `None` if the file name doesn't match any known pattern.
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    match name {
        "CURRENT" => return Some((FileType::Current, 0)),
        "LOCK" => return Some((FileType::Lock, 0)),
        "LOG" | "LOG.old" => return Some((FileType::InfoLog, 0)),
        _ => {}
    }

    if let Some(suffix) = name.strip_prefix("MANIFEST-") {
        return parse_number(suffix).map(|number| (FileType::Manifest, number));
    }

    let (num_str, ext) = name.split_once('.')?;
    let number = parse_number(num_str)?;
    let file_type = match ext {
        "log" => FileType::Log,
        "sst" | "ldb" => FileType::Table,
        "dbtmp" => FileType::Temp,
        _ => return None,
    };
    Some((file_type, number))
}

fn parse_number(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Point CURRENT at the given manifest.
///
/// The new contents are written to a `.dbtmp` file, synced, and renamed over
/// CURRENT so readers observe either the old or the new pointer.
pub fn set_current_file(db_path: &Path, manifest_number: u64) -> Result<()> {
    let temp_path = temp_file_path(db_path, manifest_number);

    let result = write_and_rename(&temp_path, &current_file_path(db_path), manifest_number);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_and_rename(temp_path: &Path, current_path: &Path, manifest_number: u64) -> Result<()> {
    let mut file = File::create(temp_path)?;
    file.write_all(format!("{}\n", manifest_file_name(manifest_number)).as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(temp_path, current_path)?;
    Ok(())
}

/// Read the name of the active manifest from CURRENT.
///
/// Returns `NotFound` if CURRENT is absent.
pub fn read_current_file(db_path: &Path) -> Result<String> {
    let content = match fs::read_to_string(current_file_path(db_path)) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!(
                "CURRENT file does not exist in {}",
                db_path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };

    match content.strip_suffix('\n') {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(Error::corruption("CURRENT file does not end with newline")),
    }
}

/// List every recognized file in the database directory.
pub fn list_db_files(db_path: &Path) -> io::Result<Vec<(FileType, u64, String)>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(db_path)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if let Some((file_type, number)) = parse_file_name(&name) {
            files.push((file_type, number, name.into_owned()));
        }
    }

    files.sort_by_key(|(_, number, _)| *number);
    Ok(files)
}

/// List all file numbers of a given type in the database directory.
pub fn list_files_of_type(db_path: &Path, file_type: FileType) -> io::Result<Vec<u64>> {
    Ok(list_db_files(db_path)?
        .into_iter()
        .filter(|(ft, _, _)| *ft == file_type)
        .map(|(_, number, _)| number)
        .collect())
}

/// Delete a file, ignoring "not found" errors.
pub fn delete_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Create directory if it doesn't exist.
pub fn create_dir_if_missing(path: &Path) -> io::Result<()> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// Sync a directory to ensure file operations are durable.
pub fn sync_dir(path: &Path) -> io::Result<()> {
    let dir = File::open(path)?;
    dir.sync_all()
}
