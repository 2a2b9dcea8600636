use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

use super::parse::{WorktreeEntry, parse_worktree_list};
use super::vcs::{ApplyMode, DiffTarget, InProgress, Vcs};
use crate::errors::VcsError;

/// [`Vcs`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl GitCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn output(&self, dir: &Path, args: &[&str]) -> Result<Output, VcsError> {
        debug!(dir = %dir.display(), "{} {}", self.program, args.join(" "));
        Command::new(&self.program)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .map_err(|source| VcsError::Spawn {
                program: self.program.clone(),
                source,
            })
    }

    /// Run git and return stdout. On failure the error carries stdout and
    /// stderr together, since git reports merge conflicts on stdout.
    async fn git(&self, dir: &Path, args: &[&str]) -> Result<String, VcsError> {
        let output = self.output(dir, args).await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(VcsError::CommandFailed {
            command: format!("{} {}", self.program, args.join(" ")),
            stderr: format!("{}{}", stdout, stderr).trim().to_string(),
        })
    }

    fn diff_args(target: DiffTarget<'_>, prefix: &[&str]) -> Vec<String> {
        let mut args: Vec<String> = prefix.iter().map(|a| a.to_string()).collect();
        match target {
            DiffTarget::Staged => args.push("--cached".to_string()),
            DiffTarget::StagedSince(base) => args.extend(["--cached".to_string(), base.to_string()]),
            DiffTarget::MergeBase { base, head } => args.push(format!("{}...{}", base, head)),
        }
        args
    }

    async fn git_diff(&self, dir: &Path, target: DiffTarget<'_>, prefix: &[&str]) -> Result<String, VcsError> {
        let args = Self::diff_args(target, prefix);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.git(dir, &args).await
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn resolve_revision(&self, dir: &Path, rev: &str) -> Result<Option<String>, VcsError> {
        let spec = format!("{}^{{commit}}", rev);
        let output = self.output(dir, &["rev-parse", "--verify", "--quiet", &spec]).await?;
        if output.status.success() {
            let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok((!sha.is_empty()).then_some(sha))
        } else {
            Ok(None)
        }
    }

    async fn current_branch(&self, dir: &Path) -> Result<String, VcsError> {
        Ok(self
            .git(dir, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?
            .trim()
            .to_string())
    }

    async fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, VcsError> {
        let reference = format!("refs/heads/{}", branch);
        let output = self
            .output(repo, &["show-ref", "--verify", "--quiet", &reference])
            .await?;
        Ok(output.status.success())
    }

    async fn add_worktree(&self, repo: &Path, path: &Path, branch: &str, base: Option<&str>) -> Result<(), VcsError> {
        let path = path.to_string_lossy().into_owned();
        match base {
            Some(base) => self.git(repo, &["worktree", "add", "-b", branch, path.as_str(), base]).await?,
            None => self.git(repo, &["worktree", "add", path.as_str(), branch]).await?,
        };
        Ok(())
    }

    async fn remove_worktree(&self, repo: &Path, path: &Path) -> Result<(), VcsError> {
        let path = path.to_string_lossy().into_owned();
        self.git(repo, &["worktree", "remove", "--force", path.as_str()]).await?;
        Ok(())
    }

    async fn prune_worktrees(&self, repo: &Path) -> Result<(), VcsError> {
        self.git(repo, &["worktree", "prune"]).await?;
        Ok(())
    }

    async fn list_worktrees(&self, repo: &Path) -> Result<Vec<WorktreeEntry>, VcsError> {
        let out = self.git(repo, &["worktree", "list", "--porcelain"]).await?;
        Ok(parse_worktree_list(&out))
    }

    async fn delete_branch(&self, repo: &Path, branch: &str) -> Result<(), VcsError> {
        self.git(repo, &["branch", "-D", branch]).await?;
        Ok(())
    }

    async fn stage_all(&self, dir: &Path) -> Result<(), VcsError> {
        self.git(dir, &["add", "-A"]).await?;
        Ok(())
    }

    async fn diff(&self, dir: &Path, target: DiffTarget<'_>) -> Result<String, VcsError> {
        self.git_diff(dir, target, &["diff", "--binary"]).await
    }

    async fn diff_numstat(&self, dir: &Path, target: DiffTarget<'_>) -> Result<String, VcsError> {
        self.git_diff(dir, target, &["diff", "--numstat"]).await
    }

    async fn status_porcelain(&self, dir: &Path) -> Result<String, VcsError> {
        self.git(dir, &["status", "--porcelain"]).await
    }

    async fn commit(&self, dir: &Path, message: &str) -> Result<(), VcsError> {
        self.git(dir, &["commit", "-m", message]).await?;
        Ok(())
    }

    async fn apply_patch(&self, dir: &Path, patch: &Path, mode: ApplyMode) -> Result<(), VcsError> {
        let patch = patch.to_string_lossy().into_owned();
        let mut args = vec!["apply"];
        match mode {
            ApplyMode::Forward => {}
            ApplyMode::Reverse => args.push("-R"),
            ApplyMode::Check => args.push("--check"),
        }
        args.push(patch.as_str());
        self.git(dir, &args).await?;
        Ok(())
    }

    async fn merge_no_ff(&self, repo: &Path, branch: &str, message: &str) -> Result<(), VcsError> {
        self.git(repo, &["merge", "--no-ff", "-m", message, branch]).await?;
        Ok(())
    }

    async fn merge_squash(&self, repo: &Path, branch: &str) -> Result<(), VcsError> {
        self.git(repo, &["merge", "--squash", branch]).await?;
        Ok(())
    }

    async fn cherry_pick(&self, repo: &Path, commit: &str) -> Result<(), VcsError> {
        self.git(repo, &["cherry-pick", commit]).await?;
        Ok(())
    }

    async fn rev_list(&self, repo: &Path, base: &str, head: &str) -> Result<Vec<String>, VcsError> {
        let range = format!("{}..{}", base, head);
        let out = self.git(repo, &["rev-list", "--reverse", &range]).await?;
        Ok(out.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect())
    }

    async fn abort(&self, repo: &Path, operation: InProgress) -> Result<(), VcsError> {
        let command = match operation {
            InProgress::Merge => "merge",
            InProgress::Rebase => "rebase",
            InProgress::CherryPick => "cherry-pick",
        };
        self.git(repo, &[command, "--abort"]).await?;
        Ok(())
    }

    async fn reset_hard(&self, repo: &Path, rev: &str) -> Result<(), VcsError> {
        self.git(repo, &["reset", "--hard", rev]).await?;
        Ok(())
    }
}
