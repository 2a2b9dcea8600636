//! On-disk layout of a hive project.
//!
//! ```text
//! <root>/.hive/
//!   hive.toml
//!   features/<feature>/
//!     feature.json
//!     plan.md
//!     tasks/<NN-slug>/{status.json, spec.md, report.md, changes.diff}
//!     tasks/<NN-slug>/subtasks/<M-slug>/{status.json, spec.md, report.md}
//!   .worktrees/<feature>/<task>
//! ```

use std::path::{Path, PathBuf};

pub const HIVE_DIR: &str = ".hive";
pub const FEATURES_DIR: &str = "features";
pub const WORKTREES_DIR: &str = ".worktrees";
pub const TASKS_DIR: &str = "tasks";
pub const SUBTASKS_DIR: &str = "subtasks";
pub const FEATURE_FILE: &str = "feature.json";
pub const PLAN_FILE: &str = "plan.md";
pub const STATUS_FILE: &str = "status.json";
pub const SPEC_FILE: &str = "spec.md";
pub const REPORT_FILE: &str = "report.md";
pub const DIFF_FILE: &str = "changes.diff";
pub const SYNC_LOCK_RESOURCE: &str = "sync";

/// Resolves every hive path from the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HivePaths {
    root: PathBuf,
}

impl HivePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The project root (the git repository root).
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hive_dir(&self) -> PathBuf {
        self.root.join(HIVE_DIR)
    }

    pub fn features_dir(&self) -> PathBuf {
        self.hive_dir().join(FEATURES_DIR)
    }

    pub fn feature_dir(&self, feature: &str) -> PathBuf {
        self.features_dir().join(feature)
    }

    pub fn feature_file(&self, feature: &str) -> PathBuf {
        self.feature_dir(feature).join(FEATURE_FILE)
    }

    pub fn plan_file(&self, feature: &str) -> PathBuf {
        self.feature_dir(feature).join(PLAN_FILE)
    }

    /// Resource whose lock serializes `sync` for one feature.
    pub fn sync_lock_resource(&self, feature: &str) -> PathBuf {
        self.feature_dir(feature).join(SYNC_LOCK_RESOURCE)
    }

    pub fn tasks_dir(&self, feature: &str) -> PathBuf {
        self.feature_dir(feature).join(TASKS_DIR)
    }

    pub fn task_dir(&self, feature: &str, task: &str) -> PathBuf {
        self.tasks_dir(feature).join(task)
    }

    pub fn task_status(&self, feature: &str, task: &str) -> PathBuf {
        self.task_dir(feature, task).join(STATUS_FILE)
    }

    pub fn task_spec(&self, feature: &str, task: &str) -> PathBuf {
        self.task_dir(feature, task).join(SPEC_FILE)
    }

    pub fn task_report(&self, feature: &str, task: &str) -> PathBuf {
        self.task_dir(feature, task).join(REPORT_FILE)
    }

    pub fn task_diff(&self, feature: &str, task: &str) -> PathBuf {
        self.task_dir(feature, task).join(DIFF_FILE)
    }

    pub fn subtasks_dir(&self, feature: &str, task: &str) -> PathBuf {
        self.task_dir(feature, task).join(SUBTASKS_DIR)
    }

    pub fn subtask_dir(&self, feature: &str, task: &str, subtask: &str) -> PathBuf {
        self.subtasks_dir(feature, task).join(subtask)
    }

    pub fn subtask_status(&self, feature: &str, task: &str, subtask: &str) -> PathBuf {
        self.subtask_dir(feature, task, subtask).join(STATUS_FILE)
    }

    pub fn subtask_spec(&self, feature: &str, task: &str, subtask: &str) -> PathBuf {
        self.subtask_dir(feature, task, subtask).join(SPEC_FILE)
    }

    pub fn subtask_report(&self, feature: &str, task: &str, subtask: &str) -> PathBuf {
        self.subtask_dir(feature, task, subtask).join(REPORT_FILE)
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.hive_dir().join(WORKTREES_DIR)
    }

    pub fn worktree_path(&self, feature: &str, task: &str) -> PathBuf {
        self.worktrees_dir().join(feature).join(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_paths() {
        let paths = HivePaths::new("/repo");
        assert_eq!(
            paths.task_status("auth", "01-setup"),
            PathBuf::from("/repo/.hive/features/auth/tasks/01-setup/status.json")
        );
        assert_eq!(
            paths.plan_file("auth"),
            PathBuf::from("/repo/.hive/features/auth/plan.md")
        );
    }

    #[test]
    fn test_subtask_paths() {
        let paths = HivePaths::new("/repo");
        assert_eq!(
            paths.subtask_status("auth", "01-setup", "1-write-tests"),
            PathBuf::from(
                "/repo/.hive/features/auth/tasks/01-setup/subtasks/1-write-tests/status.json"
            )
        );
    }

    #[test]
    fn test_worktree_path_is_deterministic() {
        let paths = HivePaths::new("/repo");
        assert_eq!(
            paths.worktree_path("auth", "02-core"),
            PathBuf::from("/repo/.hive/.worktrees/auth/02-core")
        );
        assert_eq!(
            paths.worktree_path("auth", "02-core"),
            paths.worktree_path("auth", "02-core")
        );
    }
}
