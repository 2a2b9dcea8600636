//! Atomic storage and cross-process locking.
//!
//! Every persistent mutation in hive goes through this module:
//!
//! 1. **Atomic writes** - temp sibling + rename, so readers never see a torn file
//! 2. **Lock files** - `<path>.lock` created exclusively, with TTL-based staleness
//! 3. **JSON store** - locked read-modify-write with full replace or deep-merge patch

mod atomic;
mod json;
mod lock;
mod merge;

pub use atomic::write_atomic;
pub use json::{JsonStore, read_json, read_json_as, write_json_atomic};
pub use lock::{
    FileLockManager, LOCK_SUFFIX, LockGuard, LockManager, LockOptions, acquire_lock,
    lock_path_for,
};
pub use merge::{deep_merge, merged};
