//! Cross-process advisory locks backed by `<resource>.lock` files.
//!
//! A lock is taken by exclusively creating the lock file. Holders record
//! their pid, a creation time and a random token; a lock older than the
//! configured TTL is treated as abandoned and broken by the next acquirer.
//! There is no fencing: a holder that stalls past the TTL can still write
//! after its lock was broken.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::LockError;

/// Suffix appended to a resource path to form its lock file.
pub const LOCK_SUFFIX: &str = ".lock";

/// Tuning for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Total time to keep retrying before giving up.
    pub timeout: Duration,
    /// Sleep between attempts while the lock is held.
    pub retry_interval: Duration,
    /// Age after which an existing lock is considered abandoned.
    pub stale_lock_ttl: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(50),
            stale_lock_ttl: Duration::from_secs(30),
        }
    }
}

/// Narrow locking interface so callers never depend on lock-file details.
pub trait LockManager: Send + Sync {
    /// Block until the lock protecting `resource` is held.
    fn acquire(&self, resource: &Path) -> Result<LockGuard, LockError>;
}

/// A held lock. Released on [`LockGuard::release`] or drop, whichever is first.
pub struct LockGuard {
    resource: PathBuf,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new(resource: impl Into<PathBuf>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            resource: resource.into(),
            release: Some(Box::new(release)),
        }
    }

    /// The resource this guard protects.
    pub fn resource(&self) -> &Path {
        &self.resource
    }

    /// Release the lock. Calling this more than once is a no-op.
    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("resource", &self.resource)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Lock manager that uses sibling `.lock` files.
#[derive(Debug, Clone, Default)]
pub struct FileLockManager {
    options: LockOptions,
}

impl FileLockManager {
    pub fn new(options: LockOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }
}

impl LockManager for FileLockManager {
    fn acquire(&self, resource: &Path) -> Result<LockGuard, LockError> {
        acquire_lock(resource, &self.options)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockContents {
    pid: u32,
    created_at: DateTime<Utc>,
    token: Uuid,
}

enum ExistingLock {
    Held,
    Stale(Duration),
    Gone,
}

/// Path of the lock file guarding `resource`.
pub fn lock_path_for(resource: &Path) -> PathBuf {
    let mut name = resource.as_os_str().to_os_string();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

/// Acquire the lock for `resource`, polling until `options.timeout` elapses.
pub fn acquire_lock(resource: &Path, options: &LockOptions) -> Result<LockGuard, LockError> {
    let lock_path = lock_path_for(resource);
    let started = Instant::now();

    loop {
        let token = Uuid::new_v4();
        match try_create(&lock_path, token) {
            Ok(()) => {
                debug!(lock = %lock_path.display(), "lock acquired");
                let release_path = lock_path.clone();
                return Ok(LockGuard::new(resource, move || {
                    release_lock(&release_path, token)
                }));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                match inspect(&lock_path, options.stale_lock_ttl) {
                    ExistingLock::Gone => continue,
                    ExistingLock::Stale(age) => {
                        warn!(
                            lock = %lock_path.display(),
                            age_ms = age.as_millis() as u64,
                            "breaking stale lock"
                        );
                        if break_stale(&lock_path, options.stale_lock_ttl)? {
                            continue;
                        }
                    }
                    ExistingLock::Held => {}
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // The directory vanished or does not exist yet; recreate and retry.
                if let Some(parent) = lock_path.parent() {
                    fs::create_dir_all(parent).map_err(|source| LockError::Io {
                        path: lock_path.clone(),
                        source,
                    })?;
                }
                debug!(lock = %lock_path.display(), "lock directory missing, retrying");
                if started.elapsed() < options.timeout {
                    continue;
                }
            }
            Err(source) => {
                return Err(LockError::Io {
                    path: lock_path,
                    source,
                });
            }
        }

        let waited = started.elapsed();
        if waited >= options.timeout {
            return Err(LockError::Timeout {
                path: resource.to_path_buf(),
                waited,
            });
        }
        thread::sleep(options.retry_interval.min(options.timeout - waited));
    }
}

fn try_create(lock_path: &Path, token: Uuid) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)?;

    let contents = LockContents {
        pid: std::process::id(),
        created_at: Utc::now(),
        token,
    };
    let written = serde_json::to_vec(&contents)
        .map_err(std::io::Error::other)
        .and_then(|bytes| file.write_all(&bytes));
    if let Err(e) = written {
        drop(file);
        let _ = fs::remove_file(lock_path);
        return Err(e);
    }
    Ok(())
}

/// Remove a lock that was judged stale, serialized through a sibling
/// `.break` file so two acquirers never break the same lock twice.
///
/// The lock is inspected again while the break file is held: an acquirer that
/// judged it stale may find a fresh lock taken by whoever broke it first.
/// Returns `false` when another acquirer is breaking the lock right now.
fn break_stale(lock_path: &Path, ttl: Duration) -> Result<bool, LockError> {
    let break_path = break_path_for(lock_path);
    match OpenOptions::new().write(true).create_new(true).open(&break_path) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            // A breaker that died mid-break must not wedge the lock forever.
            if mtime_age(&break_path).is_some_and(|age| age > ttl) {
                warn!(path = %break_path.display(), "removing abandoned break file");
                let _ = fs::remove_file(&break_path);
            }
            return Ok(false);
        }
        Err(source) => {
            return Err(LockError::Io {
                path: break_path,
                source,
            });
        }
    }

    let removed = match inspect(lock_path, ttl) {
        ExistingLock::Stale(_) => match fs::remove_file(lock_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io {
                path: lock_path.to_path_buf(),
                source,
            }),
        },
        ExistingLock::Held => {
            debug!(lock = %lock_path.display(), "lock was renewed before it could be broken");
            Ok(())
        }
        ExistingLock::Gone => Ok(()),
    };
    if let Err(e) = fs::remove_file(&break_path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %break_path.display(), error = %e, "failed to remove break file");
        }
    }
    removed.map(|()| true)
}

fn break_path_for(lock_path: &Path) -> PathBuf {
    let mut name = lock_path.as_os_str().to_os_string();
    name.push(".break");
    PathBuf::from(name)
}

fn inspect(lock_path: &Path, ttl: Duration) -> ExistingLock {
    let age = match fs::read(lock_path) {
        Ok(bytes) => match serde_json::from_slice::<LockContents>(&bytes) {
            Ok(contents) => (Utc::now() - contents.created_at)
                .to_std()
                .unwrap_or(Duration::ZERO),
            // Holder is mid-write or the file is foreign; fall back to mtime.
            Err(_) => match mtime_age(lock_path) {
                Some(age) => age,
                None => return ExistingLock::Gone,
            },
        },
        Err(e) if e.kind() == ErrorKind::NotFound => return ExistingLock::Gone,
        Err(_) => return ExistingLock::Held,
    };

    if age > ttl {
        ExistingLock::Stale(age)
    } else {
        ExistingLock::Held
    }
}

fn mtime_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    )
}

fn release_lock(lock_path: &Path, token: Uuid) {
    // Only remove the file if it is still ours; a stale-lock breaker may have
    // replaced it in the meantime.
    let still_ours = fs::read(lock_path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<LockContents>(&bytes).ok())
        .is_some_and(|contents| contents.token == token);

    if !still_ours {
        debug!(lock = %lock_path.display(), "lock no longer held by us, skipping removal");
        return;
    }
    match fs::remove_file(lock_path) {
        Ok(()) => debug!(lock = %lock_path.display(), "lock released"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(lock = %lock_path.display(), error = %e, "failed to remove lock file"),
    }
}
