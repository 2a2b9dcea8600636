//! Locked read-modify-write of JSON documents.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::atomic::write_atomic;
use super::lock::{FileLockManager, LockManager, LockOptions};
use super::merge::deep_merge;
use crate::errors::StorageError;

/// Read a JSON document. A missing or empty file reads as `{}`.
pub fn read_json(path: &Path) -> Result<Value, StorageError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Value::Object(Map::new())),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    if content.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(&content).map_err(|source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and deserialize a JSON document, `None` if the file does not exist.
pub fn read_json_as<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    if !path.exists() {
        return Ok(None);
    }
    let value = read_json(path)?;
    serde_json::from_value(value)
        .map(Some)
        .map_err(|source| StorageError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Serialize `value` as pretty JSON and write it atomically, without locking.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// JSON persistence where every mutation happens under the resource's lock.
#[derive(Clone)]
pub struct JsonStore {
    locks: Arc<dyn LockManager>,
}

impl JsonStore {
    pub fn new(locks: Arc<dyn LockManager>) -> Self {
        Self { locks }
    }

    /// Store backed by lock files with the given options.
    pub fn with_options(options: LockOptions) -> Self {
        Self::new(Arc::new(FileLockManager::new(options)))
    }

    pub fn locks(&self) -> &Arc<dyn LockManager> {
        &self.locks
    }

    pub fn read(&self, path: &Path) -> Result<Value, StorageError> {
        read_json(path)
    }

    /// Replace the document at `path` with `value`.
    pub fn write_locked(&self, path: &Path, value: &Value) -> Result<Value, StorageError> {
        self.update_locked(path, |_| Ok::<_, StorageError>(value.clone()))
    }

    /// Deep-merge `patch` into the document at `path`.
    pub fn patch_locked(&self, path: &Path, patch: Value) -> Result<Value, StorageError> {
        self.update_locked(path, move |mut current| {
            deep_merge(&mut current, patch);
            Ok::<_, StorageError>(current)
        })
    }

    /// Acquire the lock, read the current document (`{}` if absent), compute
    /// the next one with `f`, write it atomically and release.
    ///
    /// The lock is released on every exit path, including errors from `f`.
    pub fn update_locked<F, E>(&self, path: &Path, f: F) -> Result<Value, E>
    where
        F: FnOnce(Value) -> Result<Value, E>,
        E: From<StorageError>,
    {
        let mut guard = self.locks.acquire(path).map_err(StorageError::from)?;
        let current = read_json(path)?;
        let next = f(current)?;
        write_json_atomic(path, &next)?;
        guard.release();
        Ok(next)
    }
}

impl Default for JsonStore {
    fn default() -> Self {
        Self::with_options(LockOptions::default())
    }
}

impl std::fmt::Debug for JsonStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonStore").finish_non_exhaustive()
    }
}
