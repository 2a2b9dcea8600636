//! Execution isolation: one git worktree and branch per task.
//!
//! Git is reached only through the [`Vcs`] trait. [`GitCli`] shells out to
//! the `git` executable with `tokio::process::Command`.
//!
//! Patch and merge failures are reported as structured results
//! ([`ApplyResult`], [`MergeResult`]) rather than errors; errors are reserved
//! for a missing worktree or a git invocation that could not run at all.

mod git;
mod manager;
mod parse;
mod vcs;

pub use git::GitCli;
pub use manager::{ApplyResult, CommitResult, DiffResult, EMPTY_TREE, MergeResult, WorktreeInfo, WorktreeManager};
pub use parse::{
    NumStat, WorktreeEntry, parse_conflicts, parse_failed_patch_files, parse_files_from_diff, parse_numstat,
    parse_worktree_list,
};
pub use vcs::{ApplyMode, DiffTarget, InProgress, Vcs};
