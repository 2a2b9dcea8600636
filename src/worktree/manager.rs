//! One git worktree per task: create, diff, commit, merge back, remove.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::parse::{parse_conflicts, parse_failed_patch_files, parse_files_from_diff, parse_numstat};
use super::vcs::{ApplyMode, DiffTarget, InProgress, Vcs};
use crate::errors::{VcsError, WorktreeError};
use crate::hive_config::MergeStrategy;
use crate::paths::HivePaths;
use crate::storage::{read_json, write_atomic};

/// Object id of git's empty tree, the base for diffs of a root commit.
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorktreeInfo {
    pub feature: String,
    pub task: String,
    pub path: PathBuf,
    pub branch: String,
    /// HEAD of the worktree, `None` if it cannot be resolved
    pub commit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub has_diff: bool,
    pub diff_content: String,
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitResult {
    pub committed: bool,
    pub message: String,
    pub sha: Option<String>,
}

/// Outcome of applying, reverting or checking a patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyResult {
    pub success: bool,
    pub error: Option<String>,
    /// Files reported as `patch failed: <file>`
    pub failed_files: Vec<String>,
}

impl ApplyResult {
    fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeResult {
    pub success: bool,
    pub strategy: MergeStrategy,
    /// HEAD of the target after a successful merge
    pub sha: Option<String>,
    pub files_changed: Vec<String>,
    pub conflicts: Vec<String>,
    pub error: Option<String>,
    /// Commits replayed before stopping (rebase strategy only)
    pub commits_applied: usize,
}

/// Manages task worktrees under `.hive/.worktrees`.
#[derive(Clone)]
pub struct WorktreeManager {
    paths: HivePaths,
    vcs: Arc<dyn Vcs>,
    branch_prefix: String,
}

impl std::fmt::Debug for WorktreeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorktreeManager")
            .field("root", &self.paths.root())
            .field("branch_prefix", &self.branch_prefix)
            .finish_non_exhaustive()
    }
}

impl WorktreeManager {
    pub fn new(paths: HivePaths, vcs: Arc<dyn Vcs>, branch_prefix: impl Into<String>) -> Self {
        Self {
            paths,
            vcs,
            branch_prefix: branch_prefix.into(),
        }
    }

    fn repo(&self) -> &Path {
        self.paths.root()
    }

    /// Branch for a task: `<prefix>/<feature>/<task>`.
    pub fn branch_name(&self, feature: &str, task: &str) -> String {
        format!("{}/{}/{}", self.branch_prefix, feature, task)
    }

    pub fn worktree_path(&self, feature: &str, task: &str) -> PathBuf {
        self.paths.worktree_path(feature, task)
    }

    /// Create the task's worktree, or return it if it already exists.
    ///
    /// A new branch is cut from `base_branch` (default `HEAD`). If the branch
    /// survives from an earlier run, or another process creates it while we
    /// do, the worktree is attached to it instead.
    pub async fn create(
        &self,
        feature: &str,
        task: &str,
        base_branch: Option<&str>,
    ) -> Result<WorktreeInfo, WorktreeError> {
        if let Some(existing) = self.get(feature, task).await? {
            debug!(feature, task, "worktree already exists");
            return Ok(existing);
        }

        let path = self.worktree_path(feature, task);
        let branch = self.branch_name(feature, task);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorktreeError::io(parent, e))?;
        }

        if self.vcs.branch_exists(self.repo(), &branch).await? {
            self.vcs.add_worktree(self.repo(), &path, &branch, None).await?;
        } else {
            let base = base_branch.unwrap_or("HEAD");
            let created = self
                .vcs
                .add_worktree(self.repo(), &path, &branch, Some(base))
                .await;
            if let Err(err) = created {
                if !self.branch_appeared(&branch, &err).await {
                    return Err(err.into());
                }
                debug!(feature, task, branch = %branch, "branch created concurrently, attaching");
                self.vcs.add_worktree(self.repo(), &path, &branch, None).await?;
            }
        }

        let commit = self.vcs.resolve_revision(&path, "HEAD").await?;
        info!(feature, task, branch = %branch, "created worktree");
        Ok(WorktreeInfo {
            feature: feature.to_string(),
            task: task.to_string(),
            path,
            branch,
            commit,
        })
    }

    /// Whether a failed `worktree add -b` lost a race with another creator
    /// of the same branch.
    async fn branch_appeared(&self, branch: &str, err: &VcsError) -> bool {
        if err.is_branch_exists() {
            return true;
        }
        self.vcs.branch_exists(self.repo(), branch).await.unwrap_or(false)
    }

    /// The task's worktree, `None` if its directory does not exist.
    pub async fn get(&self, feature: &str, task: &str) -> Result<Option<WorktreeInfo>, WorktreeError> {
        let path = self.worktree_path(feature, task);
        if !path.is_dir() {
            return Ok(None);
        }
        let commit = self.vcs.resolve_revision(&path, "HEAD").await?;
        Ok(Some(WorktreeInfo {
            feature: feature.to_string(),
            task: task.to_string(),
            branch: self.branch_name(feature, task),
            path,
            commit,
        }))
    }

    async fn require(&self, feature: &str, task: &str) -> Result<WorktreeInfo, WorktreeError> {
        self.get(feature, task)
            .await?
            .ok_or_else(|| WorktreeError::NotFound {
                feature: feature.to_string(),
                task: task.to_string(),
            })
    }

    /// Worktrees on disk, for one feature or all of them.
    pub async fn list(&self, feature: Option<&str>) -> Result<Vec<WorktreeInfo>, WorktreeError> {
        let features = match feature {
            Some(f) => vec![f.to_string()],
            None => subdirectories(&self.paths.worktrees_dir())?,
        };

        let mut found = Vec::new();
        for feature in features {
            for task in subdirectories(&self.paths.worktrees_dir().join(&feature))? {
                if let Some(info) = self.get(&feature, &task).await? {
                    found.push(info);
                }
            }
        }
        Ok(found)
    }

    /// Base commit for diffs: the task's recorded `baseCommit`, else the
    /// worktree HEAD's parent, else the empty tree.
    async fn diff_base(&self, feature: &str, task: &str, worktree: &Path) -> Result<String, WorktreeError> {
        let status = read_json(&self.paths.task_status(feature, task))?;
        if let Some(base) = status.get("baseCommit").and_then(|v| v.as_str()) {
            return Ok(base.to_string());
        }
        Ok(self
            .vcs
            .resolve_revision(worktree, "HEAD~1")
            .await?
            .unwrap_or_else(|| EMPTY_TREE.to_string()))
    }

    /// Everything the task changed since `base_commit`, committed or not.
    ///
    /// Stages all work in the worktree first, so untracked files are
    /// included.
    pub async fn get_diff(
        &self,
        feature: &str,
        task: &str,
        base_commit: Option<&str>,
    ) -> Result<DiffResult, WorktreeError> {
        let wt = self.require(feature, task).await?;
        let base = match base_commit {
            Some(b) => b.to_string(),
            None => self.diff_base(feature, task, &wt.path).await?,
        };

        self.vcs.stage_all(&wt.path).await?;
        let target = DiffTarget::StagedSince(&base);
        let content = self.vcs.diff(&wt.path, target).await?;
        if content.trim().is_empty() {
            return Ok(DiffResult::default());
        }
        let stat = parse_numstat(&self.vcs.diff_numstat(&wt.path, target).await?);
        Ok(DiffResult {
            has_diff: true,
            diff_content: content,
            files_changed: stat.files_changed,
            insertions: stat.insertions,
            deletions: stat.deletions,
        })
    }

    /// Compute the diff and store it as the task's `changes.diff`.
    pub async fn save_diff(&self, feature: &str, task: &str) -> Result<DiffResult, WorktreeError> {
        let diff = self.get_diff(feature, task, None).await?;
        if diff.has_diff {
            write_atomic(&self.paths.task_diff(feature, task), diff.diff_content.as_bytes())?;
        }
        Ok(diff)
    }

    /// Stage and commit all work in the worktree.
    pub async fn commit_changes(
        &self,
        feature: &str,
        task: &str,
        message: Option<&str>,
    ) -> Result<CommitResult, WorktreeError> {
        let wt = self.require(feature, task).await?;
        self.vcs.stage_all(&wt.path).await?;

        let staged = self.vcs.diff(&wt.path, DiffTarget::Staged).await?;
        if staged.trim().is_empty() {
            return Ok(CommitResult {
                committed: false,
                message: "nothing to commit".to_string(),
                sha: self.vcs.resolve_revision(&wt.path, "HEAD").await?,
            });
        }

        let message = message
            .map(str::to_string)
            .unwrap_or_else(|| format!("hive({}): {}", feature, task));
        self.vcs.commit(&wt.path, &message).await?;
        let sha = self.vcs.resolve_revision(&wt.path, "HEAD").await?;
        debug!(feature, task, sha = ?sha, "committed worktree changes");
        Ok(CommitResult {
            committed: true,
            message,
            sha,
        })
    }

    async fn run_patch(&self, dir: &Path, diff: &str, mode: ApplyMode) -> Result<ApplyResult, WorktreeError> {
        if diff.trim().is_empty() {
            return Ok(ApplyResult::ok());
        }

        // Removed when dropped, on every path out of this function.
        let mut patch = tempfile::Builder::new()
            .prefix("hive-")
            .suffix(".patch")
            .tempfile()
            .map_err(|e| WorktreeError::io(std::env::temp_dir(), e))?;
        patch
            .write_all(diff.as_bytes())
            .and_then(|_| patch.flush())
            .map_err(|e| WorktreeError::io(patch.path(), e))?;

        match self.vcs.apply_patch(dir, patch.path(), mode).await {
            Ok(()) => Ok(ApplyResult::ok()),
            Err(err @ VcsError::CommandFailed { .. }) => Ok(ApplyResult {
                success: false,
                failed_files: parse_failed_patch_files(err.stderr()),
                error: Some(err.to_string()),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Apply a diff to the working tree at `dir`.
    pub async fn apply_diff(&self, dir: &Path, diff: &str) -> Result<ApplyResult, WorktreeError> {
        self.run_patch(dir, diff, ApplyMode::Forward).await
    }

    /// Reverse-apply a diff to the working tree at `dir`.
    pub async fn revert_diff(&self, dir: &Path, diff: &str) -> Result<ApplyResult, WorktreeError> {
        self.run_patch(dir, diff, ApplyMode::Reverse).await
    }

    /// Whether the diff would apply cleanly at `dir`, without touching it.
    pub async fn check_conflicts(&self, dir: &Path, diff: &str) -> Result<ApplyResult, WorktreeError> {
        self.run_patch(dir, diff, ApplyMode::Check).await
    }

    /// Check the task's saved `changes.diff` against the repository root.
    pub async fn check_conflicts_from_saved_diff(
        &self,
        feature: &str,
        task: &str,
    ) -> Result<ApplyResult, WorktreeError> {
        let path = self.paths.task_diff(feature, task);
        let diff = match tokio::fs::read_to_string(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ApplyResult::ok()),
            Err(e) => return Err(WorktreeError::io(&path, e)),
        };
        self.check_conflicts(self.paths.root(), &diff).await
    }

    /// Integrate the task branch into the branch checked out at the
    /// repository root.
    ///
    /// On failure every in-progress merge, rebase or cherry-pick is aborted
    /// and a squash or rebase is reset to the pre-merge HEAD, so the target
    /// is left as it was.
    pub async fn merge(
        &self,
        feature: &str,
        task: &str,
        strategy: MergeStrategy,
        message: Option<&str>,
    ) -> Result<MergeResult, WorktreeError> {
        let repo = self.repo();
        let branch = self.branch_name(feature, task);
        if !self.vcs.branch_exists(repo, &branch).await? {
            return Err(WorktreeError::NotFound {
                feature: feature.to_string(),
                task: task.to_string(),
            });
        }
        let pre_head = self
            .vcs
            .resolve_revision(repo, "HEAD")
            .await?
            .ok_or_else(|| VcsError::InvalidOutput {
                command: "rev-parse HEAD".to_string(),
                message: "repository has no commits".to_string(),
            })?;

        let commits = self.vcs.rev_list(repo, &pre_head, &branch).await?;
        let changed = self
            .vcs
            .diff(repo, DiffTarget::MergeBase { base: &pre_head, head: &branch })
            .await?;
        let files_changed = parse_files_from_diff(&changed);

        let mut result = MergeResult {
            success: true,
            strategy,
            sha: None,
            files_changed,
            conflicts: Vec::new(),
            error: None,
            commits_applied: 0,
        };
        if commits.is_empty() {
            debug!(feature, task, "nothing to merge");
            result.sha = Some(pre_head);
            return Ok(result);
        }

        let message = message
            .map(str::to_string)
            .unwrap_or_else(|| format!("Merge {}", branch));

        let outcome = match strategy {
            MergeStrategy::Merge => self.vcs.merge_no_ff(repo, &branch, &message).await,
            MergeStrategy::Squash => match self.vcs.merge_squash(repo, &branch).await {
                Ok(()) => self.vcs.commit(repo, &message).await,
                Err(e) => Err(e),
            },
            MergeStrategy::Rebase => {
                let mut outcome = Ok(());
                for commit in &commits {
                    if let Err(e) = self.vcs.cherry_pick(repo, commit).await {
                        outcome = Err(e);
                        break;
                    }
                    result.commits_applied += 1;
                }
                outcome
            }
        };

        match outcome {
            Ok(()) => {
                result.sha = self.vcs.resolve_revision(repo, "HEAD").await?;
                info!(feature, task, strategy = %strategy, "merged task branch");
            }
            Err(err) => {
                warn!(feature, task, strategy = %strategy, error = %err, "merge failed, rolling back");
                result.success = false;
                result.conflicts = parse_conflicts(err.stderr());
                result.error = Some(err.to_string());
                self.recover(repo, strategy, &pre_head).await;
            }
        }
        Ok(result)
    }

    async fn recover(&self, repo: &Path, strategy: MergeStrategy, pre_head: &str) {
        for op in [InProgress::Merge, InProgress::Rebase, InProgress::CherryPick] {
            if let Err(e) = self.vcs.abort(repo, op).await {
                debug!(operation = ?op, error = %e, "nothing to abort");
            }
        }
        if matches!(strategy, MergeStrategy::Squash | MergeStrategy::Rebase)
            && let Err(e) = self.vcs.reset_hard(repo, pre_head).await
        {
            warn!(error = %e, "failed to reset target after merge failure");
        }
    }

    /// Remove the task's worktree, optionally deleting its branch.
    ///
    /// Failures are logged and swallowed.
    pub async fn remove(&self, feature: &str, task: &str, delete_branch: bool) {
        let path = self.worktree_path(feature, task);
        self.remove_path(&path).await;

        if delete_branch {
            let branch = self.branch_name(feature, task);
            if let Err(e) = self.vcs.delete_branch(self.repo(), &branch).await {
                warn!(branch = %branch, error = %e, "failed to delete task branch");
            }
        }
        debug!(feature, task, "removed worktree");
    }

    async fn remove_path(&self, path: &Path) {
        if let Err(e) = self.vcs.remove_worktree(self.repo(), path).await {
            debug!(path = %path.display(), error = %e, "worktree remove failed, deleting directory");
            if path.exists()
                && let Err(e) = tokio::fs::remove_dir_all(path).await
            {
                warn!(path = %path.display(), error = %e, "failed to delete worktree directory");
            }
        }
        if let Err(e) = self.vcs.prune_worktrees(self.repo()).await {
            warn!(error = %e, "git worktree prune failed");
        }
    }

    /// Remove registered hive worktrees whose HEAD no longer resolves.
    pub async fn cleanup(&self, feature: Option<&str>) -> Result<Vec<PathBuf>, WorktreeError> {
        let mut scope = self.paths.worktrees_dir();
        if let Some(f) = feature {
            scope = scope.join(f);
        }
        let canonical_scope = std::fs::canonicalize(&scope).ok();
        let in_scope = |p: &Path| {
            p.starts_with(&scope) || canonical_scope.as_ref().is_some_and(|c| p.starts_with(c))
        };

        let candidates: Vec<PathBuf> = self
            .vcs
            .list_worktrees(self.repo())
            .await?
            .into_iter()
            .map(|e| e.path)
            .filter(|p| in_scope(p))
            .collect();

        let checks = candidates.iter().map(|path| async move {
            let broken = !path.is_dir() || matches!(self.vcs.resolve_revision(path, "HEAD").await, Ok(None) | Err(_));
            (path.clone(), broken)
        });
        let mut removed = Vec::new();
        for (path, broken) in join_all(checks).await {
            if broken {
                self.remove_path(&path).await;
                removed.push(path);
            }
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "cleaned up stale worktrees");
        }
        Ok(removed)
    }

    /// Whether the worktree has changes `git status` would report.
    pub async fn has_uncommitted_changes(&self, feature: &str, task: &str) -> Result<bool, WorktreeError> {
        let wt = self.require(feature, task).await?;
        Ok(!self.vcs.status_porcelain(&wt.path).await?.trim().is_empty())
    }
}

fn subdirectories(dir: &Path) -> Result<Vec<String>, WorktreeError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(WorktreeError::io(dir, e)),
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worktree::parse::WorktreeEntry;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted stand-in for git. Worktree directories are created on disk
    /// so path checks behave; everything else is canned output.
    #[derive(Default)]
    struct FakeState {
        calls: Vec<String>,
        branches: HashSet<String>,
        revisions: HashMap<String, String>,
        staged_diff: String,
        numstat: String,
        range_diff: String,
        status: String,
        commits: Vec<String>,
        worktrees: Vec<WorktreeEntry>,
        /// operation name -> combined output of the failing command
        failures: HashMap<String, String>,
        /// Branches another process creates between `branch_exists` and
        /// `worktree add -b`
        racing_branches: HashSet<String>,
    }

    #[derive(Default)]
    struct FakeVcs {
        state: Mutex<FakeState>,
    }

    impl FakeVcs {
        fn with<F: FnOnce(&mut FakeState)>(self, f: F) -> Self {
            f(&mut self.state.lock().unwrap());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.state.lock().unwrap().calls.clone()
        }

        fn record(&self, call: String) -> Result<(), VcsError> {
            let mut state = self.state.lock().unwrap();
            let op = call.split_whitespace().next().unwrap_or_default().to_string();
            state.calls.push(call.clone());
            match state.failures.get(&op).or_else(|| state.failures.get(&call)) {
                Some(output) => Err(VcsError::CommandFailed {
                    command: call,
                    stderr: output.clone(),
                }),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl Vcs for FakeVcs {
        async fn resolve_revision(&self, _dir: &Path, rev: &str) -> Result<Option<String>, VcsError> {
            Ok(self.state.lock().unwrap().revisions.get(rev).cloned())
        }

        async fn current_branch(&self, _dir: &Path) -> Result<String, VcsError> {
            Ok("main".to_string())
        }

        async fn branch_exists(&self, _repo: &Path, branch: &str) -> Result<bool, VcsError> {
            Ok(self.state.lock().unwrap().branches.contains(branch))
        }

        async fn add_worktree(&self, _repo: &Path, path: &Path, branch: &str, base: Option<&str>) -> Result<(), VcsError> {
            self.record(format!("add_worktree {} {:?}", branch, base))?;
            if base.is_some() && self.state.lock().unwrap().racing_branches.contains(branch) {
                return Err(VcsError::CommandFailed {
                    command: format!("git worktree add -b {}", branch),
                    stderr: format!("fatal: a branch named '{}' already exists", branch),
                });
            }
            std::fs::create_dir_all(path).unwrap();
            self.state.lock().unwrap().branches.insert(branch.to_string());
            Ok(())
        }

        async fn remove_worktree(&self, _repo: &Path, path: &Path) -> Result<(), VcsError> {
            self.record(format!("remove_worktree {}", path.display()))?;
            std::fs::remove_dir_all(path).ok();
            Ok(())
        }

        async fn prune_worktrees(&self, _repo: &Path) -> Result<(), VcsError> {
            self.record("prune".to_string())
        }

        async fn list_worktrees(&self, _repo: &Path) -> Result<Vec<WorktreeEntry>, VcsError> {
            Ok(self.state.lock().unwrap().worktrees.clone())
        }

        async fn delete_branch(&self, _repo: &Path, branch: &str) -> Result<(), VcsError> {
            self.record(format!("delete_branch {}", branch))?;
            self.state.lock().unwrap().branches.remove(branch);
            Ok(())
        }

        async fn stage_all(&self, _dir: &Path) -> Result<(), VcsError> {
            self.record("stage_all".to_string())
        }

        async fn diff(&self, _dir: &Path, target: DiffTarget<'_>) -> Result<String, VcsError> {
            self.record(format!("diff {:?}", target))?;
            let state = self.state.lock().unwrap();
            Ok(match target {
                DiffTarget::MergeBase { .. } => state.range_diff.clone(),
                _ => state.staged_diff.clone(),
            })
        }

        async fn diff_numstat(&self, _dir: &Path, _target: DiffTarget<'_>) -> Result<String, VcsError> {
            Ok(self.state.lock().unwrap().numstat.clone())
        }

        async fn status_porcelain(&self, _dir: &Path) -> Result<String, VcsError> {
            Ok(self.state.lock().unwrap().status.clone())
        }

        async fn commit(&self, _dir: &Path, message: &str) -> Result<(), VcsError> {
            self.record(format!("commit {}", message))
        }

        async fn apply_patch(&self, _dir: &Path, patch: &Path, mode: ApplyMode) -> Result<(), VcsError> {
            assert!(patch.exists(), "patch file must exist while applying");
            self.record(format!("apply {:?}", mode))
        }

        async fn merge_no_ff(&self, _repo: &Path, branch: &str, _message: &str) -> Result<(), VcsError> {
            self.record(format!("merge_no_ff {}", branch))
        }

        async fn merge_squash(&self, _repo: &Path, branch: &str) -> Result<(), VcsError> {
            self.record(format!("merge_squash {}", branch))
        }

        async fn cherry_pick(&self, _repo: &Path, commit: &str) -> Result<(), VcsError> {
            self.record(format!("cherry_pick {}", commit))
        }

        async fn rev_list(&self, _repo: &Path, _base: &str, _head: &str) -> Result<Vec<String>, VcsError> {
            Ok(self.state.lock().unwrap().commits.clone())
        }

        async fn abort(&self, _repo: &Path, operation: InProgress) -> Result<(), VcsError> {
            self.record(format!("abort {:?}", operation))
        }

        async fn reset_hard(&self, _repo: &Path, rev: &str) -> Result<(), VcsError> {
            self.record(format!("reset_hard {}", rev))
        }
    }

    fn manager(fake: FakeVcs) -> (TempDir, WorktreeManager, Arc<FakeVcs>) {
        let dir = TempDir::new().unwrap();
        let fake = Arc::new(fake);
        let manager = WorktreeManager::new(HivePaths::new(dir.path()), fake.clone(), "hive");
        (dir, manager, fake)
    }

    const DIFF: &str = "diff --git a/src/a.rs b/src/a.rs\n--- a/src/a.rs\n+++ b/src/a.rs\n@@ -1 +1 @@\n-old\n+new\n";

    #[tokio::test]
    async fn test_create_new_branch_from_base() {
        let (_dir, manager, fake) = manager(FakeVcs::default().with(|s| {
            s.revisions.insert("HEAD".into(), "abc".into());
        }));
        let info = manager.create("auth", "01-setup", Some("main")).await.unwrap();
        assert_eq!(info.branch, "hive/auth/01-setup");
        assert!(info.path.ends_with(".hive/.worktrees/auth/01-setup"));
        assert_eq!(info.commit.as_deref(), Some("abc"));
        assert_eq!(fake.calls(), vec!["add_worktree hive/auth/01-setup Some(\"main\")"]);
    }

    #[tokio::test]
    async fn test_create_attaches_existing_branch_and_is_idempotent() {
        let (_dir, manager, fake) = manager(FakeVcs::default().with(|s| {
            s.branches.insert("hive/auth/01-setup".into());
        }));
        manager.create("auth", "01-setup", None).await.unwrap();
        manager.create("auth", "01-setup", None).await.unwrap();
        assert_eq!(fake.calls(), vec!["add_worktree hive/auth/01-setup None"]);
    }

    #[tokio::test]
    async fn test_create_attaches_branch_created_concurrently() {
        let (_dir, manager, fake) = manager(FakeVcs::default().with(|s| {
            s.racing_branches.insert("hive/auth/01-setup".into());
            s.revisions.insert("HEAD".into(), "abc".into());
        }));
        let info = manager.create("auth", "01-setup", Some("main")).await.unwrap();
        assert!(info.path.is_dir());
        assert_eq!(
            fake.calls(),
            vec![
                "add_worktree hive/auth/01-setup Some(\"main\")",
                "add_worktree hive/auth/01-setup None",
            ]
        );
    }

    #[tokio::test]
    async fn test_create_propagates_unrelated_add_failure() {
        let (_dir, manager, fake) = manager(FakeVcs::default().with(|s| {
            s.failures.insert(
                "add_worktree".into(),
                "fatal: '.hive/.worktrees/auth/01-setup' already exists".into(),
            );
        }));
        let err = manager.create("auth", "01-setup", None).await.unwrap_err();
        assert!(matches!(err, WorktreeError::Vcs(VcsError::CommandFailed { .. })));
        assert_eq!(fake.calls(), vec!["add_worktree hive/auth/01-setup Some(\"HEAD\")"]);
    }

    #[tokio::test]
    async fn test_get_and_list() {
        let (_dir, manager, _fake) = manager(FakeVcs::default());
        assert!(manager.get("auth", "01-setup").await.unwrap().is_none());
        manager.create("auth", "01-setup", None).await.unwrap();
        manager.create("auth", "02-core", None).await.unwrap();
        manager.create("billing", "01-api", None).await.unwrap();

        assert_eq!(manager.list(Some("auth")).await.unwrap().len(), 2);
        let all: Vec<_> = manager
            .list(None)
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.branch)
            .collect();
        assert_eq!(all, vec!["hive/auth/01-setup", "hive/auth/02-core", "hive/billing/01-api"]);
    }

    #[tokio::test]
    async fn test_get_diff_uses_recorded_base_commit() {
        let (_dir, manager, fake) = manager(FakeVcs::default().with(|s| {
            s.staged_diff = DIFF.into();
            s.numstat = "1\t1\tsrc/a.rs\n".into();
        }));
        manager.create("auth", "01-setup", None).await.unwrap();
        let status = manager.paths.task_status("auth", "01-setup");
        write_atomic(&status, br#"{"status":"in_progress","baseCommit":"base123"}"#).unwrap();

        let diff = manager.get_diff("auth", "01-setup", None).await.unwrap();
        assert!(diff.has_diff);
        assert_eq!(diff.files_changed, 1);
        assert_eq!(diff.insertions, 1);
        assert_eq!(diff.deletions, 1);
        let calls = fake.calls();
        assert!(calls.contains(&"stage_all".to_string()));
        assert!(calls.contains(&"diff StagedSince(\"base123\")".to_string()));
    }

    #[tokio::test]
    async fn test_get_diff_falls_back_to_parent_then_empty_tree() {
        let (_dir, manager, fake) = manager(FakeVcs::default());
        manager.create("auth", "01-setup", None).await.unwrap();
        let diff = manager.get_diff("auth", "01-setup", None).await.unwrap();
        assert!(!diff.has_diff);
        assert!(fake.calls().contains(&format!("diff StagedSince({:?})", EMPTY_TREE)));
    }

    #[tokio::test]
    async fn test_get_diff_missing_worktree() {
        let (_dir, manager, _fake) = manager(FakeVcs::default());
        assert!(matches!(
            manager.get_diff("auth", "01-setup", None).await,
            Err(WorktreeError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_save_diff_writes_changes_file() {
        let (_dir, manager, _fake) = manager(FakeVcs::default().with(|s| s.staged_diff = DIFF.into()));
        manager.create("auth", "01-setup", None).await.unwrap();
        manager.save_diff("auth", "01-setup").await.unwrap();
        let saved = std::fs::read_to_string(manager.paths.task_diff("auth", "01-setup")).unwrap();
        assert_eq!(saved, DIFF);
    }

    #[tokio::test]
    async fn test_commit_nothing_staged() {
        let (_dir, manager, fake) = manager(FakeVcs::default().with(|s| {
            s.revisions.insert("HEAD".into(), "head1".into());
        }));
        manager.create("auth", "01-setup", None).await.unwrap();
        let result = manager.commit_changes("auth", "01-setup", None).await.unwrap();
        assert!(!result.committed);
        assert_eq!(result.message, "nothing to commit");
        assert_eq!(result.sha.as_deref(), Some("head1"));
        assert!(!fake.calls().iter().any(|c| c.starts_with("commit")));
    }

    #[tokio::test]
    async fn test_commit_with_default_message() {
        let (_dir, manager, fake) = manager(FakeVcs::default().with(|s| s.staged_diff = DIFF.into()));
        manager.create("auth", "01-setup", None).await.unwrap();
        let result = manager.commit_changes("auth", "01-setup", None).await.unwrap();
        assert!(result.committed);
        assert!(fake.calls().contains(&"commit hive(auth): 01-setup".to_string()));
    }

    #[tokio::test]
    async fn test_apply_failure_lists_files() {
        let (dir, manager, _fake) = manager(FakeVcs::default().with(|s| {
            s.failures.insert(
                "apply".into(),
                "error: patch failed: src/a.rs:1\nerror: src/a.rs: patch does not apply".into(),
            );
        }));
        let result = manager.apply_diff(dir.path(), DIFF).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.failed_files, vec!["src/a.rs"]);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_apply_then_revert_runs_forward_and_reverse() {
        let (dir, manager, fake) = manager(FakeVcs::default());
        assert!(manager.apply_diff(dir.path(), DIFF).await.unwrap().success);
        let reverted = manager.revert_diff(dir.path(), DIFF).await.unwrap();
        assert!(reverted.success);
        assert!(reverted.failed_files.is_empty());
        assert_eq!(fake.calls(), vec!["apply Forward", "apply Reverse"]);
    }

    #[tokio::test]
    async fn test_empty_patch_is_noop() {
        let (dir, manager, fake) = manager(FakeVcs::default());
        assert!(manager.revert_diff(dir.path(), "").await.unwrap().success);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_check_conflicts_from_saved_diff() {
        let (_dir, manager, fake) = manager(FakeVcs::default());
        assert!(manager.check_conflicts_from_saved_diff("auth", "01-setup").await.unwrap().success);
        write_atomic(&manager.paths.task_diff("auth", "01-setup"), DIFF.as_bytes()).unwrap();
        assert!(manager.check_conflicts_from_saved_diff("auth", "01-setup").await.unwrap().success);
        assert_eq!(fake.calls(), vec!["apply Check"]);
    }

    fn mergeable() -> FakeVcs {
        FakeVcs::default().with(|s| {
            s.branches.insert("hive/auth/01-setup".into());
            s.revisions.insert("HEAD".into(), "pre".into());
            s.commits = vec!["c1".into(), "c2".into(), "c3".into()];
            s.range_diff = DIFF.into();
        })
    }

    #[tokio::test]
    async fn test_merge_strategies_succeed() {
        for strategy in [MergeStrategy::Merge, MergeStrategy::Squash, MergeStrategy::Rebase] {
            let (_dir, manager, fake) = manager(mergeable());
            let result = manager.merge("auth", "01-setup", strategy, None).await.unwrap();
            assert!(result.success, "{strategy} should succeed");
            assert_eq!(result.files_changed, vec!["src/a.rs"]);
            let calls = fake.calls();
            assert!(calls.contains(&"diff MergeBase { base: \"pre\", head: \"hive/auth/01-setup\" }".to_string()));
            match strategy {
                MergeStrategy::Merge => assert!(calls.contains(&"merge_no_ff hive/auth/01-setup".to_string())),
                MergeStrategy::Squash => {
                    assert!(calls.contains(&"merge_squash hive/auth/01-setup".to_string()));
                    assert!(calls.contains(&"commit Merge hive/auth/01-setup".to_string()));
                }
                MergeStrategy::Rebase => {
                    let picks: Vec<_> = calls.iter().filter(|c| c.starts_with("cherry_pick")).collect();
                    assert_eq!(picks, vec!["cherry_pick c1", "cherry_pick c2", "cherry_pick c3"]);
                    assert_eq!(result.commits_applied, 3);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_merge_conflict_aborts_and_reports() {
        let (_dir, manager, fake) = manager(mergeable().with(|s| {
            s.failures.insert(
                "merge_no_ff".into(),
                "CONFLICT (content): Merge conflict in src/a.rs\nAutomatic merge failed".into(),
            );
        }));
        let result = manager
            .merge("auth", "01-setup", MergeStrategy::Merge, None)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.conflicts, vec!["src/a.rs"]);
        let calls = fake.calls();
        assert!(calls.contains(&"abort Merge".to_string()));
        assert!(calls.contains(&"abort Rebase".to_string()));
        assert!(calls.contains(&"abort CherryPick".to_string()));
        assert!(!calls.iter().any(|c| c.starts_with("reset_hard")));
    }

    #[tokio::test]
    async fn test_failed_squash_resets_target() {
        let (_dir, manager, fake) = manager(mergeable().with(|s| {
            s.failures.insert("merge_squash".into(), "CONFLICT (content): Merge conflict in src/a.rs".into());
        }));
        let result = manager
            .merge("auth", "01-setup", MergeStrategy::Squash, None)
            .await
            .unwrap();
        assert!(!result.success);
        let calls = fake.calls();
        assert!(calls.contains(&"reset_hard pre".to_string()));
        assert!(!calls.iter().any(|c| c.starts_with("commit")));
    }

    #[tokio::test]
    async fn test_rebase_stops_at_first_conflict_and_resets() {
        let (_dir, manager, fake) = manager(mergeable().with(|s| {
            s.failures.insert(
                "cherry_pick c2".into(),
                "CONFLICT (content): Merge conflict in src/a.rs".into(),
            );
        }));
        let result = manager
            .merge("auth", "01-setup", MergeStrategy::Rebase, None)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.commits_applied, 1);
        assert_eq!(result.conflicts, vec!["src/a.rs"]);
        let calls = fake.calls();
        assert!(!calls.contains(&"cherry_pick c3".to_string()));
        assert!(calls.contains(&"reset_hard pre".to_string()));
    }

    #[tokio::test]
    async fn test_merge_unknown_branch() {
        let (_dir, manager, _fake) = manager(FakeVcs::default());
        assert!(matches!(
            manager.merge("auth", "01-setup", MergeStrategy::Merge, None).await,
            Err(WorktreeError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_merge_nothing_to_merge() {
        let (_dir, manager, fake) = manager(mergeable().with(|s| s.commits.clear()));
        let result = manager
            .merge("auth", "01-setup", MergeStrategy::Merge, None)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.sha.as_deref(), Some("pre"));
        assert!(!fake.calls().iter().any(|c| c.starts_with("merge_no_ff")));
    }

    #[tokio::test]
    async fn test_remove_swallows_failures_and_deletes_directory() {
        let (_dir, manager, fake) = manager(FakeVcs::default().with(|s| {
            s.failures.insert("remove_worktree".into(), "fatal: not a working tree".into());
            s.failures.insert("delete_branch".into(), "error: branch not found".into());
        }));
        manager.create("auth", "01-setup", None).await.unwrap();
        manager.remove("auth", "01-setup", true).await;
        assert!(!manager.worktree_path("auth", "01-setup").exists());
        let calls = fake.calls();
        assert!(calls.contains(&"prune".to_string()));
        assert!(calls.contains(&"delete_branch hive/auth/01-setup".to_string()));
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_broken_hive_worktrees() {
        let (dir, manager, _fake) = manager(FakeVcs::default());
        let healthy = manager.worktree_path("auth", "01-setup");
        let broken = manager.worktree_path("auth", "02-core");
        std::fs::create_dir_all(&healthy).unwrap();
        let outside = dir.path().join("elsewhere");

        let fake = FakeVcs::default().with(|s| {
            s.worktrees = vec![
                WorktreeEntry { path: dir.path().to_path_buf(), head: Some("m".into()), branch: Some("main".into()) },
                WorktreeEntry { path: healthy.clone(), head: Some("a".into()), branch: None },
                WorktreeEntry { path: broken.clone(), head: None, branch: None },
                WorktreeEntry { path: outside.clone(), head: None, branch: None },
            ];
            s.revisions.insert("HEAD".into(), "a".into());
        });
        let manager = WorktreeManager::new(HivePaths::new(dir.path()), Arc::new(fake), "hive");
        let removed = manager.cleanup(None).await.unwrap();
        assert_eq!(removed, vec![broken]);
    }

    #[tokio::test]
    async fn test_has_uncommitted_changes() {
        let (_dir, manager, _fake) = manager(FakeVcs::default().with(|s| s.status = " M src/a.rs\n".into()));
        manager.create("auth", "01-setup", None).await.unwrap();
        assert!(manager.has_uncommitted_changes("auth", "01-setup").await.unwrap());
    }
}
