//! Dependency resolution and validation for plan tasks.
//!
//! Validation runs in three passes, all before anything touches disk:
//! duplicate ordinals, self/unknown references, then cycle detection. Cycle
//! detection is a pure function over an explicit adjacency map and returns a
//! tagged [`CycleCheck`] instead of failing mid-traversal.

use std::collections::{BTreeMap, HashMap};

use super::parser::ParsedTask;
use crate::errors::ValidationError;

/// Task ordinal -> ordinals it depends on.
pub type Adjacency = BTreeMap<u32, Vec<u32>>;

/// Outcome of a cycle check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleCheck {
    /// No cycle; `order` lists every node with dependencies before dependents.
    Acyclic { order: Vec<u32> },
    /// A cycle, as a closed path: `[1, 2, 1]` means 1 -> 2 -> 1.
    Cycle { path: Vec<u32> },
}

impl CycleCheck {
    pub fn is_acyclic(&self) -> bool {
        matches!(self, CycleCheck::Acyclic { .. })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

/// Detect a cycle with a three-state depth-first search.
///
/// Edges pointing at nodes missing from the map are ignored; unknown
/// references are reported separately by [`validate_plan`].
pub fn check_cycles(adjacency: &Adjacency) -> CycleCheck {
    let mut marks: HashMap<u32, Mark> = adjacency.keys().map(|&k| (k, Mark::Unvisited)).collect();
    let mut order = Vec::with_capacity(adjacency.len());
    let mut path = Vec::new();

    for &start in adjacency.keys() {
        if marks[&start] == Mark::Unvisited
            && let Some(cycle) = visit(start, adjacency, &mut marks, &mut path, &mut order)
        {
            return CycleCheck::Cycle { path: cycle };
        }
    }
    CycleCheck::Acyclic { order }
}

fn visit(
    node: u32,
    adjacency: &Adjacency,
    marks: &mut HashMap<u32, Mark>,
    path: &mut Vec<u32>,
    order: &mut Vec<u32>,
) -> Option<Vec<u32>> {
    marks.insert(node, Mark::OnPath);
    path.push(node);

    for &next in adjacency.get(&node).map(Vec::as_slice).unwrap_or(&[]) {
        match marks.get(&next).copied() {
            Some(Mark::OnPath) => {
                let start = path.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(next);
                return Some(cycle);
            }
            Some(Mark::Unvisited) => {
                if let Some(cycle) = visit(next, adjacency, marks, path, order) {
                    return Some(cycle);
                }
            }
            Some(Mark::Done) | None => {}
        }
    }

    path.pop();
    marks.insert(node, Mark::Done);
    order.push(node);
    None
}

/// Resolve each task's dependency ordinals, applying the implicit rule.
///
/// `None` means "depends on the preceding task in plan order" (the first
/// task depends on nothing); `Some(list)` is taken as declared.
pub fn dependency_numbers(tasks: &[ParsedTask]) -> Adjacency {
    let mut sorted: Vec<&ParsedTask> = tasks.iter().collect();
    sorted.sort_by_key(|t| t.order);

    let mut adjacency = Adjacency::new();
    let mut previous: Option<u32> = None;
    for task in sorted {
        let deps = match &task.depends_on_numbers {
            Some(explicit) => explicit.clone(),
            None => previous.into_iter().collect(),
        };
        adjacency.insert(task.order, deps);
        previous = Some(task.order);
    }
    adjacency
}

/// Validate the plan's dependency graph.
///
/// Returns a topological order of task ordinals on success.
pub fn validate_plan(tasks: &[ParsedTask]) -> Result<Vec<u32>, ValidationError> {
    let mut by_order: BTreeMap<u32, &ParsedTask> = BTreeMap::new();
    for task in tasks {
        if let Some(existing) = by_order.insert(task.order, task) {
            return Err(ValidationError::DuplicateTask {
                order: task.order,
                first: existing.name.clone(),
                second: task.name.clone(),
            });
        }
    }

    for task in tasks {
        let Some(deps) = &task.depends_on_numbers else {
            continue;
        };
        if deps.contains(&task.order) {
            return Err(ValidationError::SelfDependency {
                order: task.order,
                name: task.name.clone(),
            });
        }
        if let Some(&unknown) = deps.iter().find(|d| !by_order.contains_key(d)) {
            return Err(ValidationError::UnknownDependency {
                order: task.order,
                name: task.name.clone(),
                dependency: unknown,
            });
        }
    }

    match check_cycles(&dependency_numbers(tasks)) {
        CycleCheck::Acyclic { order } => Ok(order),
        CycleCheck::Cycle { path } => Err(ValidationError::Cycle {
            path: path
                .iter()
                .map(|n| match by_order.get(n) {
                    Some(task) => format!("{} ({})", n, task.name),
                    None => n.to_string(),
                })
                .collect(),
        }),
    }
}

/// Map every task folder to the folders it depends on.
///
/// Call after [`validate_plan`]; unknown ordinals are skipped.
pub fn resolve_depends_on(tasks: &[ParsedTask]) -> BTreeMap<String, Vec<String>> {
    let folders: HashMap<u32, &str> = tasks.iter().map(|t| (t.order, t.folder.as_str())).collect();
    let adjacency = dependency_numbers(tasks);

    tasks
        .iter()
        .map(|task| {
            let deps = adjacency
                .get(&task.order)
                .into_iter()
                .flatten()
                .filter_map(|n| folders.get(n).map(|f| f.to_string()))
                .collect();
            (task.folder.clone(), deps)
        })
        .collect()
}
