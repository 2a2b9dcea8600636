//! Crash-safe file writes via temp-file-and-rename.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::errors::StorageError;

/// Write `bytes` to `path` atomically.
///
/// The content goes to a uniquely named sibling first and is renamed into
/// place; readers only ever observe the old or the new file. The temporary
/// file is removed on any failure.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = parent_dir(path);
    fs::create_dir_all(&parent).map_err(|e| StorageError::io(&parent, e))?;

    let tmp_path = temp_sibling(path, &parent)?;
    let result = write_and_rename(&tmp_path, path, bytes);
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(StorageError::io(path, e));
    }
    Ok(())
}

fn write_and_rename(tmp_path: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp_path, path)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn temp_sibling(path: &Path, parent: &Path) -> Result<PathBuf, StorageError> {
    let name = path.file_name().ok_or_else(|| {
        StorageError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
        )
    })?;
    Ok(parent.join(format!(
        ".{}.{}.{}.tmp",
        name.to_string_lossy(),
        std::process::id(),
        Uuid::new_v4().simple()
    )))
}
