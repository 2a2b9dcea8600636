//! Which tasks can run now, and in which parallel waves the rest can follow.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use super::types::{Task, TaskStatus};

/// A pending task that cannot start yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedTask {
    pub folder: String,
    /// Dependencies that are not `done`
    pub waiting_on: Vec<String>,
}

/// Pending tasks split by whether their dependencies are satisfied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Schedule {
    pub runnable: Vec<String>,
    pub blocked: Vec<BlockedTask>,
}

/// Effective dependencies of every task, by folder.
///
/// A task with an explicit `dependsOn` uses it as is. Without one it depends
/// on the task immediately before it in folder order.
pub fn effective_dependencies(tasks: &[Task]) -> BTreeMap<String, Vec<String>> {
    let mut sorted: Vec<&Task> = tasks.iter().collect();
    sorted.sort_by(|a, b| a.folder.cmp(&b.folder));

    let mut deps = BTreeMap::new();
    let mut previous: Option<&str> = None;
    for task in sorted {
        let list = match &task.record.depends_on {
            Some(explicit) => explicit.clone(),
            None => previous.map(|p| vec![p.to_string()]).unwrap_or_default(),
        };
        deps.insert(task.folder.clone(), list);
        previous = Some(task.folder.as_str());
    }
    deps
}

/// Partition pending tasks into runnable and blocked.
///
/// Only `done` satisfies a dependency; a dependency on a missing task is
/// never satisfied.
pub fn compute_schedule(tasks: &[Task]) -> Schedule {
    let done: HashSet<&str> = tasks
        .iter()
        .filter(|t| t.status().satisfies_dependency())
        .map(|t| t.folder.as_str())
        .collect();
    let deps = effective_dependencies(tasks);

    let mut schedule = Schedule::default();
    for (folder, task_deps) in &deps {
        let Some(task) = tasks.iter().find(|t| &t.folder == folder) else {
            continue;
        };
        if task.status() != TaskStatus::Pending {
            continue;
        }
        let waiting_on: Vec<String> = task_deps
            .iter()
            .filter(|d| !done.contains(d.as_str()))
            .cloned()
            .collect();
        if waiting_on.is_empty() {
            schedule.runnable.push(folder.clone());
        } else {
            schedule.blocked.push(BlockedTask {
                folder: folder.clone(),
                waiting_on,
            });
        }
    }
    schedule
}

/// Group unfinished tasks into waves that can run in parallel.
///
/// Each wave contains tasks whose dependencies are all `done` or in an
/// earlier wave. Cancelled tasks never run, so anything that depends on one
/// (directly or transitively) appears in no wave.
pub fn compute_waves(tasks: &[Task]) -> Vec<Vec<String>> {
    let deps = effective_dependencies(tasks);
    let mut completed: HashSet<&str> = tasks
        .iter()
        .filter(|t| t.status().satisfies_dependency())
        .map(|t| t.folder.as_str())
        .collect();
    let mut remaining: Vec<&Task> = tasks
        .iter()
        .filter(|t| matches!(t.status(), TaskStatus::Pending | TaskStatus::InProgress))
        .collect();
    remaining.sort_by(|a, b| a.folder.cmp(&b.folder));

    let mut waves = Vec::new();
    loop {
        let (ready, rest): (Vec<&Task>, Vec<&Task>) = remaining.into_iter().partition(|t| {
            deps.get(&t.folder)
                .map(|d| d.iter().all(|dep| completed.contains(dep.as_str())))
                .unwrap_or(true)
        });
        remaining = rest;

        if ready.is_empty() {
            break;
        }

        let wave: Vec<String> = ready.iter().map(|t| t.folder.clone()).collect();
        for t in ready {
            completed.insert(t.folder.as_str());
        }
        waves.push(wave);
    }

    waves
}
