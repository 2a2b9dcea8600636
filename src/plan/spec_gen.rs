//! Task brief (`spec.md`) generation from a parsed plan.
//!
//! The generated brief gives an agent everything it needs to start a task
//! without reading the whole plan: its description, the tasks it waits on,
//! and the neighbouring tasks for context.

use super::parser::ParsedTask;

/// Everything needed to render one task brief.
pub struct SpecContext<'a> {
    pub feature: &'a str,
    pub task: &'a ParsedTask,
    /// Resolved dependencies, in declared order
    pub dependencies: Vec<&'a ParsedTask>,
    /// All plan tasks, sorted by order
    pub plan_tasks: &'a [ParsedTask],
}

/// Render the markdown brief for a plan task.
pub fn generate_task_spec(ctx: &SpecContext<'_>) -> String {
    let mut lines = Vec::new();

    lines.push(format!("# Task {:02}: {}", ctx.task.order, ctx.task.name));
    lines.push(String::new());
    lines.push(format!("> Feature: {}", ctx.feature));
    lines.push(format!("> Folder: {}", ctx.task.folder));
    lines.push("> Source: plan.md".to_string());
    lines.push(String::new());

    lines.push("## Description".to_string());
    lines.push(String::new());
    if ctx.task.description.trim().is_empty() {
        lines.push("_No description provided in plan.md._".to_string());
    } else {
        lines.push(ctx.task.description.trim().to_string());
    }
    lines.push(String::new());

    lines.push("## Dependencies".to_string());
    lines.push(String::new());
    if ctx.dependencies.is_empty() {
        lines.push("_None. This task can start immediately._".to_string());
    } else {
        for dep in &ctx.dependencies {
            lines.push(format!("- **{}** ({})", dep.name, dep.folder));
        }
    }
    lines.push(String::new());

    let previous: Vec<&ParsedTask> = ctx
        .plan_tasks
        .iter()
        .filter(|t| t.order < ctx.task.order)
        .collect();
    let upcoming: Vec<&ParsedTask> = ctx
        .plan_tasks
        .iter()
        .filter(|t| t.order > ctx.task.order)
        .collect();

    if !previous.is_empty() || !upcoming.is_empty() {
        lines.push("## Plan Context".to_string());
        lines.push(String::new());
        if !previous.is_empty() {
            lines.push("### Prior tasks".to_string());
            lines.push(String::new());
            for t in previous {
                lines.push(format!("- {:02}. {} ({})", t.order, t.name, t.folder));
            }
            lines.push(String::new());
        }
        if !upcoming.is_empty() {
            lines.push("### Upcoming tasks".to_string());
            lines.push(String::new());
            for t in upcoming {
                lines.push(format!("- {:02}. {} ({})", t.order, t.name, t.folder));
            }
            lines.push(String::new());
        }
    }

    lines.join("\n")
}

/// Render the brief for a task created by hand rather than from the plan.
pub fn generate_manual_spec(feature: &str, folder: &str, name: &str, description: &str, depends_on: &[String]) -> String {
    let mut lines = vec![
        format!("# {}", name),
        String::new(),
        format!("> Feature: {}", feature),
        format!("> Folder: {}", folder),
        "> Source: manual".to_string(),
        String::new(),
        "## Description".to_string(),
        String::new(),
    ];
    if description.trim().is_empty() {
        lines.push("_No description provided._".to_string());
    } else {
        lines.push(description.trim().to_string());
    }
    lines.push(String::new());
    lines.push("## Dependencies".to_string());
    lines.push(String::new());
    if depends_on.is_empty() {
        lines.push("_None._".to_string());
    } else {
        lines.extend(depends_on.iter().map(|d| format!("- {}", d)));
    }
    lines.push(String::new());
    lines.join("\n")
}
