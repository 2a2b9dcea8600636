//! Composite task/worktree state machine.
//!
//! ```text
//! pending --start--> in_progress --complete--> done --integrate--> merged
//!    ^                    |                      |
//!    +-------abort--------+----------------------+
//! ```

use serde::Serialize;
use tracing::info;

use crate::errors::{LifecycleError, TaskError};
use crate::hive_config::MergeStrategy;
use crate::task::{Task, TaskService, TaskStatus, TaskUpdate, compute_schedule};
use crate::worktree::{CommitResult, DiffResult, MergeResult, WorktreeInfo, WorktreeManager};

#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub task: Task,
    pub commit: CommitResult,
    pub diff: DiffResult,
}

#[derive(Debug, Clone)]
pub struct TaskLifecycle {
    tasks: TaskService,
    worktrees: WorktreeManager,
    default_strategy: MergeStrategy,
}

impl TaskLifecycle {
    pub fn new(tasks: TaskService, worktrees: WorktreeManager, default_strategy: MergeStrategy) -> Self {
        Self {
            tasks,
            worktrees,
            default_strategy,
        }
    }

    /// Start a pending task: create its worktree, record the base commit and
    /// mark it `in_progress`. Starting a task that is already in progress
    /// returns its worktree.
    pub async fn start(
        &self,
        feature: &str,
        task: &str,
        base_branch: Option<&str>,
    ) -> Result<WorktreeInfo, LifecycleError> {
        let current = self.get(feature, task).await?;
        match current.status() {
            TaskStatus::Pending => {}
            TaskStatus::InProgress => return Ok(self.worktrees.create(feature, task, base_branch).await?),
            other => return Err(invalid(task, other, "start")),
        }

        let owned = feature.to_string();
        let schedule = compute_schedule(&self.with_tasks(move |tasks| tasks.list(&owned)).await?);
        if let Some(blocked) = schedule.blocked.into_iter().find(|b| b.folder == task) {
            return Err(LifecycleError::Blocked {
                task: task.to_string(),
                waiting_on: blocked.waiting_on,
            });
        }

        let worktree = self.worktrees.create(feature, task, base_branch).await?;
        let mut update = TaskUpdate::status(TaskStatus::InProgress);
        update.base_commit = worktree.commit.clone();
        self.update(feature, task, update).await?;
        info!(feature, task, "started task");
        Ok(worktree)
    }

    /// Commit the worktree, save the diff and mark the task `done`.
    ///
    /// Without an explicit report one is generated from the summary and the
    /// diff statistics.
    pub async fn complete(
        &self,
        feature: &str,
        task: &str,
        summary: &str,
        report: Option<&str>,
    ) -> Result<Completion, LifecycleError> {
        let current = self.get(feature, task).await?;
        if current.status() != TaskStatus::InProgress {
            return Err(invalid(task, current.status(), "complete"));
        }

        let commit = self
            .worktrees
            .commit_changes(feature, task, Some(&format!("hive({}): {}", feature, summary)))
            .await?;
        let diff = self.worktrees.save_diff(feature, task).await?;

        let report = match report {
            Some(r) => r.to_string(),
            None => default_report(task, summary, &diff),
        };
        let (f, t) = (feature.to_string(), task.to_string());
        self.with_tasks(move |tasks| tasks.write_report(&f, &t, &report))
            .await?;
        let task_record = self
            .update(feature, task, TaskUpdate::status(TaskStatus::Done).with_summary(summary))
            .await?;

        info!(feature, task, files = diff.files_changed, "completed task");
        Ok(Completion {
            task: task_record,
            commit,
            diff,
        })
    }

    /// Merge a finished task into the current branch. On success the
    /// worktree and branch are removed.
    pub async fn integrate(
        &self,
        feature: &str,
        task: &str,
        strategy: Option<MergeStrategy>,
    ) -> Result<MergeResult, LifecycleError> {
        let current = self.get(feature, task).await?;
        if current.status() != TaskStatus::Done {
            return Err(invalid(task, current.status(), "integrate"));
        }

        let strategy = strategy.unwrap_or(self.default_strategy);
        let result = self.worktrees.merge(feature, task, strategy, None).await?;
        if result.success {
            self.worktrees.remove(feature, task, true).await;
        }
        Ok(result)
    }

    /// Throw away the task's worktree and branch and return it to `pending`.
    pub async fn abort(&self, feature: &str, task: &str) -> Result<Task, LifecycleError> {
        self.get(feature, task).await?;
        self.worktrees.remove(feature, task, true).await;
        let task_record = self
            .update(feature, task, TaskUpdate::status(TaskStatus::Pending))
            .await?;
        info!(feature, task, "aborted task");
        Ok(task_record)
    }

    async fn get(&self, feature: &str, task: &str) -> Result<Task, LifecycleError> {
        let (f, t) = (feature.to_string(), task.to_string());
        self.with_tasks(move |tasks| tasks.get(&f, &t)).await
    }

    async fn update(&self, feature: &str, task: &str, update: TaskUpdate) -> Result<Task, LifecycleError> {
        let (f, t) = (feature.to_string(), task.to_string());
        self.with_tasks(move |tasks| tasks.update(&f, &t, update)).await
    }

    /// Run a task store call on the blocking pool. Store writes wait for
    /// file locks with a sleeping retry loop.
    async fn with_tasks<T, F>(&self, f: F) -> Result<T, LifecycleError>
    where
        F: FnOnce(&TaskService) -> Result<T, TaskError> + Send + 'static,
        T: Send + 'static,
    {
        let tasks = self.tasks.clone();
        Ok(tokio::task::spawn_blocking(move || f(&tasks)).await??)
    }
}

fn invalid(task: &str, status: TaskStatus, action: &'static str) -> LifecycleError {
    LifecycleError::InvalidTransition {
        task: task.to_string(),
        status: status.to_string(),
        action,
    }
}

fn default_report(task: &str, summary: &str, diff: &DiffResult) -> String {
    format!(
        "# Report: {}\n\n{}\n\n## Changes\n\n- Files changed: {}\n- Insertions: {}\n- Deletions: {}\n",
        task, summary, diff.files_changed, diff.insertions, diff.deletions
    )
}
