//! Subtask commands: `hive subtask create|list|update`.

use anyhow::Result;

use hive::config::Config;
use hive::task::{SubtaskType, TaskStatus};

use super::super::SubtaskCommands;
use super::{print_json, styled_status};

pub fn cmd_subtask(config: &Config, command: &SubtaskCommands, json: bool) -> Result<()> {
    let subtasks = config.subtasks();

    match command {
        SubtaskCommands::Create {
            feature,
            task,
            name,
            subtask_type,
            description,
        } => {
            let subtask_type = subtask_type
                .as_deref()
                .map(str::parse::<SubtaskType>)
                .transpose()?;
            let subtask = subtasks.create(feature, task, name, subtask_type, description)?;
            if json {
                return print_json(&subtask);
            }
            println!(
                "{} subtask {} ({})",
                console::style("Created").green().bold(),
                console::style(&subtask.record.id).cyan(),
                subtask.folder
            );
        }
        SubtaskCommands::List { feature, task } => {
            let list = subtasks.list(feature, task)?;
            if json {
                return print_json(&list);
            }
            if list.is_empty() {
                println!("No subtasks under {}.", task);
                return Ok(());
            }
            for subtask in &list {
                let kind = subtask
                    .record
                    .subtask_type
                    .map(|t| t.to_string())
                    .unwrap_or_default();
                println!(
                    "{:<6} {:<12} {:<10} {}",
                    subtask.record.id,
                    styled_status(subtask.record.status),
                    console::style(kind).dim(),
                    subtask.record.name
                );
            }
        }
        SubtaskCommands::Update {
            feature,
            task,
            subtask,
            status,
            summary,
        } => {
            let status = status.as_deref().map(str::parse::<TaskStatus>).transpose()?;
            let updated = subtasks.update(feature, task, subtask, status, summary.clone())?;
            if json {
                return print_json(&updated);
            }
            println!("{} -> {}", updated.record.id, styled_status(updated.record.status));
        }
    }
    Ok(())
}
