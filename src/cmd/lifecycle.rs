//! Lifecycle shortcuts: `hive start|complete|integrate|abort`.

use anyhow::{Context, Result};
use std::path::Path;

use hive::config::Config;
use hive::hive_config::MergeStrategy;

use super::worktree::{print_worktree, report_merge};
use super::{print_json, styled_status};

pub async fn cmd_start(config: &Config, feature: &str, task: &str, base: Option<&str>, json: bool) -> Result<()> {
    let info = config.lifecycle().start(feature, task, base).await?;
    if json {
        return print_json(&info);
    }
    println!("{} {}", console::style("Started").green().bold(), task);
    print_worktree(&info);
    Ok(())
}

pub async fn cmd_complete(
    config: &Config,
    feature: &str,
    task: &str,
    summary: &str,
    report: Option<&Path>,
    json: bool,
) -> Result<()> {
    let report = match report {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read report: {}", path.display()))?,
        ),
        None => None,
    };
    let completion = config
        .lifecycle()
        .complete(feature, task, summary, report.as_deref())
        .await?;
    if json {
        return print_json(&completion);
    }

    println!(
        "{} {} -> {}",
        console::style("Completed").green().bold(),
        task,
        styled_status(completion.task.status())
    );
    if let Some(sha) = &completion.commit.sha {
        println!("  Commit: {}", sha);
    }
    println!(
        "  {} files changed, {} insertions(+), {} deletions(-)",
        completion.diff.files_changed, completion.diff.insertions, completion.diff.deletions
    );
    Ok(())
}

pub async fn cmd_integrate(
    config: &Config,
    feature: &str,
    task: &str,
    strategy: Option<&str>,
    json: bool,
) -> Result<()> {
    let strategy = strategy.map(str::parse::<MergeStrategy>).transpose()?;
    let result = config.lifecycle().integrate(feature, task, strategy).await?;
    report_merge(&result, json)
}

pub async fn cmd_abort(config: &Config, feature: &str, task: &str, json: bool) -> Result<()> {
    let record = config.lifecycle().abort(feature, task).await?;
    if json {
        return print_json(&record);
    }
    println!(
        "{} {} -> {}",
        console::style("Aborted").yellow().bold(),
        record.folder,
        styled_status(record.status())
    );
    Ok(())
}
