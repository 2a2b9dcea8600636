//! Worktree commands: `hive worktree ...`.

use anyhow::Result;

use hive::config::Config;
use hive::hive_config::MergeStrategy;
use hive::worktree::{ApplyResult, MergeResult, WorktreeInfo};

use super::super::WorktreeCommands;
use super::print_json;

pub async fn cmd_worktree(config: &Config, command: &WorktreeCommands, json: bool) -> Result<()> {
    let worktrees = config.worktrees();

    match command {
        WorktreeCommands::Create { feature, task, base } => {
            let info = worktrees.create(feature, task, base.as_deref()).await?;
            if json {
                return print_json(&info);
            }
            print_worktree(&info);
        }
        WorktreeCommands::List { feature } => {
            let list = worktrees.list(feature.as_deref()).await?;
            if json {
                return print_json(&list);
            }
            if list.is_empty() {
                println!("No worktrees.");
            }
            for info in &list {
                println!(
                    "{:<40} {}",
                    info.branch,
                    console::style(info.path.display()).dim()
                );
            }
        }
        WorktreeCommands::Diff { feature, task, save } => {
            let diff = if *save {
                worktrees.save_diff(feature, task).await?
            } else {
                worktrees.get_diff(feature, task, None).await?
            };
            if json {
                return print_json(&diff);
            }
            if !diff.has_diff {
                println!("No changes.");
                return Ok(());
            }
            print!("{}", diff.diff_content);
            eprintln!(
                "{} files changed, {} insertions(+), {} deletions(-)",
                diff.files_changed, diff.insertions, diff.deletions
            );
        }
        WorktreeCommands::Commit { feature, task, message } => {
            let result = worktrees.commit_changes(feature, task, message.as_deref()).await?;
            if json {
                return print_json(&result);
            }
            if result.committed {
                println!(
                    "{} {} {}",
                    console::style("Committed").green().bold(),
                    result.sha.as_deref().unwrap_or("-"),
                    result.message
                );
            } else {
                println!("{}", console::style(&result.message).dim());
            }
        }
        WorktreeCommands::Merge {
            feature,
            task,
            strategy,
            message,
        } => {
            let strategy = match strategy {
                Some(s) => s.parse::<MergeStrategy>()?,
                None => config.hive_toml().merge_strategy(),
            };
            let result = worktrees.merge(feature, task, strategy, message.as_deref()).await?;
            report_merge(&result, json)?;
        }
        WorktreeCommands::Check { feature, task } => {
            let result = worktrees.check_conflicts_from_saved_diff(feature, task).await?;
            report_apply(&result, json)?;
        }
        WorktreeCommands::Remove {
            feature,
            task,
            keep_branch,
        } => {
            worktrees.remove(feature, task, !keep_branch).await;
            if json {
                return print_json(&serde_json::json!({"removed": true}));
            }
            println!("{} {}/{}", console::style("Removed").green().bold(), feature, task);
        }
        WorktreeCommands::Cleanup { feature } => {
            let removed = worktrees.cleanup(feature.as_deref()).await?;
            if json {
                return print_json(&removed);
            }
            if removed.is_empty() {
                println!("No stale worktrees.");
            }
            for path in &removed {
                println!("{} {}", console::style("Removed").yellow(), path.display());
            }
        }
    }
    Ok(())
}

pub(crate) fn print_worktree(info: &WorktreeInfo) {
    println!("{} {}", console::style("Worktree").bold(), info.path.display());
    println!("  Branch: {}", console::style(&info.branch).cyan());
    if let Some(commit) = &info.commit {
        println!("  Commit: {}", commit);
    }
}

/// Print a merge outcome; a failed merge is an error exit.
pub(crate) fn report_merge(result: &MergeResult, json: bool) -> Result<()> {
    if json {
        print_json(result)?;
    } else if result.success {
        println!(
            "{} with {} ({} files){}",
            console::style("Merged").green().bold(),
            result.strategy,
            result.files_changed.len(),
            result
                .sha
                .as_deref()
                .map(|s| format!(" at {}", s))
                .unwrap_or_default()
        );
    } else {
        println!("{} with {}", console::style("Merge failed").red().bold(), result.strategy);
        for file in &result.conflicts {
            println!("  {} {}", console::style("conflict:").red(), file);
        }
        if result.strategy == MergeStrategy::Rebase {
            println!("  {} commits applied before stopping", result.commits_applied);
        }
    }

    if !result.success {
        anyhow::bail!(
            "{}",
            result.error.as_deref().unwrap_or("merge failed")
        );
    }
    Ok(())
}

fn report_apply(result: &ApplyResult, json: bool) -> Result<()> {
    if json {
        print_json(result)?;
    } else if result.success {
        println!("{}", console::style("Applies cleanly").green());
    } else {
        println!("{}", console::style("Patch does not apply").red().bold());
        for file in &result.failed_files {
            println!("  {}", file);
        }
    }

    if !result.success {
        anyhow::bail!("{}", result.error.as_deref().unwrap_or("patch does not apply"));
    }
    Ok(())
}
