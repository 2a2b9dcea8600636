//! Sync and task commands: `hive sync`, `hive task list|show|update|create`.

use anyhow::Result;

use hive::config::Config;
use hive::task::{Task, TaskOrigin, TaskStatus, TaskUpdate};

use super::super::TaskCommands;
use super::{print_json, styled_status};

pub fn cmd_sync(config: &Config, feature: &str, json: bool) -> Result<()> {
    let result = config.tasks().sync(feature)?;
    if json {
        return print_json(&result);
    }

    if result.is_noop() {
        println!("{} nothing to change", console::style(feature).cyan());
        return Ok(());
    }
    println!("Synced {}", console::style(feature).cyan().bold());
    for (label, folders) in [
        ("created", &result.created),
        ("removed", &result.removed),
        ("kept", &result.kept),
        ("manual", &result.manual),
    ] {
        if !folders.is_empty() {
            println!("  {:<8} {}", label, folders.join(", "));
        }
    }
    Ok(())
}

pub fn cmd_task(config: &Config, command: &TaskCommands, json: bool) -> Result<()> {
    let tasks = config.tasks();

    match command {
        TaskCommands::List { feature } => {
            let list = tasks.list(feature)?;
            if json {
                return print_json(&list);
            }
            if list.is_empty() {
                println!("No tasks found. Run 'hive sync {}' first.", feature);
                return Ok(());
            }
            println!("{:<32} {:<12} {:<8} Depends on", "Task", "Status", "Origin");
            println!("{:<32} {:<12} {:<8} ----------", "-".repeat(32), "-".repeat(12), "-".repeat(8));
            for task in &list {
                print_row(task);
            }
        }
        TaskCommands::Show { feature, task } => {
            let record = tasks.get(feature, task)?;
            if json {
                return print_json(&record);
            }
            println!("{}", console::style(&record.folder).bold().cyan());
            println!("  Status:  {}", styled_status(record.status()));
            println!("  Origin:  {}", origin_label(record.record.origin));
            if let Some(summary) = &record.record.completion.summary {
                println!("  Summary: {}", summary);
            }
            if let Some(started) = record.record.started_at {
                println!("  Started: {}", started.to_rfc3339());
            }
            if let Some(completed) = record.record.completion.completed_at {
                println!("  Done:    {}", completed.to_rfc3339());
            }
            if let Some(base) = &record.record.base_commit {
                println!("  Base:    {}", base);
            }
            println!();
            print!("{}", tasks.read_spec(feature, task)?);
        }
        TaskCommands::Update {
            feature,
            task,
            status,
            summary,
        } => {
            let status: TaskStatus = status.parse()?;
            let mut update = TaskUpdate::status(status);
            update.summary = summary.clone();
            let record = tasks.update(feature, task, update)?;
            if json {
                return print_json(&record);
            }
            println!("{} -> {}", record.folder, styled_status(record.status()));
        }
        TaskCommands::Create {
            feature,
            name,
            depends_on,
            description,
        } => {
            let record = tasks.create_manual(feature, name, description, depends_on.clone())?;
            if json {
                return print_json(&record);
            }
            println!(
                "{} manual task {}",
                console::style("Created").green().bold(),
                console::style(&record.folder).cyan()
            );
        }
    }
    Ok(())
}

fn print_row(task: &Task) {
    let depends = match &task.record.depends_on {
        Some(deps) if deps.is_empty() => "none".to_string(),
        Some(deps) => deps.join(", "),
        None => "(previous)".to_string(),
    };
    println!(
        "{:<32} {:<12} {:<8} {}",
        task.folder,
        styled_status(task.status()),
        origin_label(task.record.origin),
        console::style(depends).dim()
    );
}

fn origin_label(origin: TaskOrigin) -> &'static str {
    match origin {
        TaskOrigin::Plan => "plan",
        TaskOrigin::Manual => "manual",
    }
}
