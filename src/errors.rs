//! Typed error hierarchy for hive.
//!
//! One enum per subsystem:
//! - `LockError` / `StorageError`: lock files and atomic JSON persistence
//! - `ValidationError`: plan dependency graph violations
//! - `TaskError`: task and subtask operations
//! - `VcsError` / `WorktreeError`: git invocations and worktree management
//! - `LifecycleError`: task state transitions that drive a worktree

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from acquiring or releasing a lock file.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Timed out after {waited:?} waiting for lock on {path}")]
    Timeout { path: PathBuf, waited: Duration },

    #[error("Lock file error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    /// Whether the caller may retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::Timeout { .. })
    }
}

/// Errors from the atomic JSON storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Expected a JSON object in {path}")]
    NotAnObject { path: PathBuf },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Dependency graph violations found while validating a plan.
///
/// Every message names the offending tasks and the plan document to fix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Duplicate task number {order} in plan.md: \"{first}\" and \"{second}\"")]
    DuplicateTask {
        order: u32,
        first: String,
        second: String,
    },

    #[error("Task {order} (\"{name}\") depends on itself. Fix the \"Depends on\" line in plan.md")]
    SelfDependency { order: u32, name: String },

    #[error(
        "Task {order} (\"{name}\") depends on unknown task number {dependency}. \
         Fix the \"Depends on\" line in plan.md"
    )]
    UnknownDependency {
        order: u32,
        name: String,
        dependency: u32,
    },

    #[error("Dependency cycle detected in plan.md: {}. Break the cycle in plan.md", format_cycle(.path))]
    Cycle { path: Vec<String> },
}

fn format_cycle(path: &[String]) -> String {
    path.join(" -> ")
}

/// Errors from task and subtask operations.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task '{task}' not found in feature '{feature}'")]
    NotFound { feature: String, task: String },

    #[error("Subtask '{subtask}' not found under task '{task}'")]
    SubtaskNotFound { task: String, subtask: String },

    #[error("Feature '{feature}' not found")]
    FeatureNotFound { feature: String },

    #[error("No plan.md found for feature '{feature}' at {path}")]
    PlanNotFound { feature: String, path: PathBuf },

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl TaskError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TaskError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from invoking the version-control executable.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Unexpected output from `{command}`: {message}")]
    InvalidOutput { command: String, message: String },
}

impl VcsError {
    /// Captured stderr for failed commands, empty otherwise.
    pub fn stderr(&self) -> &str {
        match self {
            VcsError::CommandFailed { stderr, .. } => stderr,
            _ => "",
        }
    }

    /// Whether git refused to create a branch because it already exists.
    pub fn is_branch_exists(&self) -> bool {
        let stderr = self.stderr();
        stderr.contains("branch named") && stderr.contains("already exists")
    }
}

/// Errors from worktree management.
#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("No worktree for task '{task}' in feature '{feature}'")]
    NotFound { feature: String, task: String },

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorktreeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WorktreeError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from the composite task/worktree lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Cannot {action} task '{task}' while it is {status}")]
    InvalidTransition {
        task: String,
        status: String,
        action: &'static str,
    },

    #[error("Task '{task}' is blocked by unfinished dependencies: {}", .waiting_on.join(", "))]
    Blocked { task: String, waiting_on: Vec<String> },

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Worktree(#[from] WorktreeError),

    #[error("Task store call did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_is_retryable_io_is_not() {
        let timeout = LockError::Timeout {
            path: PathBuf::from("/hive/status.json"),
            waited: Duration::from_millis(500),
        };
        assert!(timeout.is_retryable());

        let io = LockError::Io {
            path: PathBuf::from("/hive/status.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!io.is_retryable());
    }

    #[test]
    fn branch_exists_is_detected_from_git_output() {
        let raced = VcsError::CommandFailed {
            command: "git worktree add -b hive/f/01-t".into(),
            stderr: "fatal: a branch named 'hive/f/01-t' already exists".into(),
        };
        assert!(raced.is_branch_exists());

        let path_taken = VcsError::CommandFailed {
            command: "git worktree add -b hive/f/01-t".into(),
            stderr: "fatal: '.hive/.worktrees/f/01-t' already exists".into(),
        };
        assert!(!path_taken.is_branch_exists());
    }

    #[test]
    fn cycle_error_names_path_and_plan() {
        let err = ValidationError::Cycle {
            path: vec!["1".into(), "2".into(), "1".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("1 -> 2 -> 1"));
        assert!(msg.contains("plan.md"));
        assert!(msg.to_lowercase().contains("cycle"));
    }

    #[test]
    fn unknown_dependency_names_task_and_reference() {
        let err = ValidationError::UnknownDependency {
            order: 3,
            name: "Wire up".into(),
            dependency: 9,
        };
        let msg = err.to_string();
        assert!(msg.contains("Task 3"));
        assert!(msg.contains("Wire up"));
        assert!(msg.contains('9'));
        assert!(msg.contains("plan.md"));
    }

    #[test]
    fn task_error_converts_from_validation_error() {
        let inner = ValidationError::SelfDependency {
            order: 2,
            name: "Core".into(),
        };
        let err: TaskError = inner.into();
        match &err {
            TaskError::Validation(ValidationError::SelfDependency { order, .. }) => {
                assert_eq!(*order, 2)
            }
            _ => panic!("Expected TaskError::Validation(SelfDependency)"),
        }
    }

    #[test]
    fn storage_error_wraps_lock_timeout() {
        let err: StorageError = LockError::Timeout {
            path: PathBuf::from("x"),
            waited: Duration::ZERO,
        }
        .into();
        assert!(matches!(err, StorageError::Lock(LockError::Timeout { .. })));
    }

    #[test]
    fn vcs_error_exposes_stderr() {
        let err = VcsError::CommandFailed {
            command: "git merge".into(),
            stderr: "CONFLICT (content)".into(),
        };
        assert_eq!(err.stderr(), "CONFLICT (content)");
        let spawn = VcsError::Spawn {
            program: "git".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(spawn.stderr(), "");
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ValidationError::Cycle { path: vec![] });
        assert_std_error(&TaskError::NotFound {
            feature: "f".into(),
            task: "t".into(),
        });
        assert_std_error(&WorktreeError::NotFound {
            feature: "f".into(),
            task: "t".into(),
        });
        assert_std_error(&LifecycleError::Blocked {
            task: "t".into(),
            waiting_on: vec![],
        });
    }

    #[test]
    fn blocked_error_lists_dependencies() {
        let err = LifecycleError::Blocked {
            task: "03-docs".into(),
            waiting_on: vec!["01-setup".into(), "02-core".into()],
        };
        assert_eq!(
            err.to_string(),
            "Task '03-docs' is blocked by unfinished dependencies: 01-setup, 02-core"
        );
    }
}
