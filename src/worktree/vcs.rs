//! The narrow version-control surface the worktree layer needs.

use async_trait::async_trait;
use std::path::Path;

use super::parse::WorktreeEntry;
use crate::errors::VcsError;

/// What to diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffTarget<'a> {
    /// Index against HEAD (`diff --cached`)
    Staged,
    /// Index against a commit (`diff --cached <base>`), i.e. committed and
    /// staged work since `base`
    StagedSince(&'a str),
    /// What `head` changed since it forked from `base` (`diff <base>...<head>`)
    MergeBase { base: &'a str, head: &'a str },
}

/// How to apply a patch file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    Forward,
    Reverse,
    /// Dry run (`--check`)
    Check,
}

/// An in-progress operation that can be aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InProgress {
    Merge,
    Rebase,
    CherryPick,
}

/// Version-control operations used by [`super::WorktreeManager`].
///
/// Real implementation: [`super::GitCli`]. Tests substitute an in-memory fake.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Resolve a revision to a full sha, `None` if it does not exist.
    async fn resolve_revision(&self, dir: &Path, rev: &str) -> Result<Option<String>, VcsError>;

    async fn current_branch(&self, dir: &Path) -> Result<String, VcsError>;

    async fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, VcsError>;

    /// Add a worktree. With `base` a new branch is created from it; without
    /// one the worktree checks out the existing `branch`.
    async fn add_worktree(&self, repo: &Path, path: &Path, branch: &str, base: Option<&str>) -> Result<(), VcsError>;

    /// `worktree remove --force`
    async fn remove_worktree(&self, repo: &Path, path: &Path) -> Result<(), VcsError>;

    async fn prune_worktrees(&self, repo: &Path) -> Result<(), VcsError>;

    async fn list_worktrees(&self, repo: &Path) -> Result<Vec<WorktreeEntry>, VcsError>;

    /// `branch -D`
    async fn delete_branch(&self, repo: &Path, branch: &str) -> Result<(), VcsError>;

    /// `add -A`
    async fn stage_all(&self, dir: &Path) -> Result<(), VcsError>;

    async fn diff(&self, dir: &Path, target: DiffTarget<'_>) -> Result<String, VcsError>;

    /// Same selection as [`Vcs::diff`] with `--numstat`.
    async fn diff_numstat(&self, dir: &Path, target: DiffTarget<'_>) -> Result<String, VcsError>;

    /// `status --porcelain`
    async fn status_porcelain(&self, dir: &Path) -> Result<String, VcsError>;

    async fn commit(&self, dir: &Path, message: &str) -> Result<(), VcsError>;

    async fn apply_patch(&self, dir: &Path, patch: &Path, mode: ApplyMode) -> Result<(), VcsError>;

    /// `merge --no-ff -m <message> <branch>`
    async fn merge_no_ff(&self, repo: &Path, branch: &str, message: &str) -> Result<(), VcsError>;

    /// `merge --squash <branch>` (stages only, no commit)
    async fn merge_squash(&self, repo: &Path, branch: &str) -> Result<(), VcsError>;

    async fn cherry_pick(&self, repo: &Path, commit: &str) -> Result<(), VcsError>;

    /// Commits in `base..head`, oldest first.
    async fn rev_list(&self, repo: &Path, base: &str, head: &str) -> Result<Vec<String>, VcsError>;

    async fn abort(&self, repo: &Path, operation: InProgress) -> Result<(), VcsError>;

    /// `reset --hard <rev>`
    async fn reset_hard(&self, repo: &Path, rev: &str) -> Result<(), VcsError>;
}
