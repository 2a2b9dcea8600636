//! Reconcile a feature's task folders against its `plan.md`.

use std::collections::{BTreeMap, HashSet};
use std::fs;

use serde::Serialize;
use tracing::{debug, info};

use super::store::TaskService;
use super::types::{TaskOrigin, TaskRecord, TaskStatus};
use crate::errors::{StorageError, TaskError};
use crate::plan::{ParsedTask, SpecContext, generate_task_spec, parse_plan, resolve_depends_on, validate_plan};

/// What a sync did, by task folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub created: Vec<String>,
    pub removed: Vec<String>,
    pub kept: Vec<String>,
    pub manual: Vec<String>,
}

impl SyncResult {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }
}

impl TaskService {
    /// Make the feature's task folders match its plan.
    ///
    /// The plan is parsed and validated before anything on disk changes, so a
    /// broken plan leaves every task untouched. Concurrent syncs of the same
    /// feature are serialized by the feature's `sync.lock`.
    ///
    /// | Existing task                   | Outcome  |
    /// |---------------------------------|----------|
    /// | `origin = manual`               | manual   |
    /// | `done` / `in_progress`          | kept     |
    /// | `cancelled`                     | removed (recreated if still planned) |
    /// | `pending`, still in the plan    | kept     |
    /// | `pending`, dropped from plan    | removed  |
    pub fn sync(&self, feature: &str) -> Result<SyncResult, TaskError> {
        let plan_path = self.paths.plan_file(feature);
        let content = match fs::read_to_string(&plan_path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TaskError::PlanNotFound {
                    feature: feature.to_string(),
                    path: plan_path,
                });
            }
            Err(e) => return Err(TaskError::io(&plan_path, e)),
        };

        let mut planned = parse_plan(&content);
        planned.sort_by_key(|t| t.order);
        validate_plan(&planned)?;
        let resolved = resolve_depends_on(&planned);

        let _sync_lock = self
            .store
            .locks()
            .acquire(&self.paths.sync_lock_resource(feature))
            .map_err(StorageError::from)?;

        let desired: HashSet<&str> = planned.iter().map(|t| t.folder.as_str()).collect();
        let mut result = SyncResult::default();
        let mut occupied: HashSet<String> = HashSet::new();

        for task in self.list(feature)? {
            if task.record.origin == TaskOrigin::Manual {
                occupied.insert(task.folder.clone());
                result.manual.push(task.folder);
                continue;
            }
            let remove = match task.status() {
                TaskStatus::Done | TaskStatus::InProgress => false,
                TaskStatus::Cancelled => true,
                TaskStatus::Pending => !desired.contains(task.folder.as_str()),
            };
            if remove {
                self.delete(feature, &task.folder)?;
                debug!(feature, task = %task.folder, "removed task");
                result.removed.push(task.folder);
            } else {
                occupied.insert(task.folder.clone());
                result.kept.push(task.folder);
            }
        }

        let by_folder: BTreeMap<&str, &ParsedTask> =
            planned.iter().map(|t| (t.folder.as_str(), t)).collect();

        for task in &planned {
            if occupied.contains(&task.folder) {
                continue;
            }
            let depends_on = resolved.get(&task.folder).cloned().unwrap_or_default();
            let dependencies = depends_on
                .iter()
                .filter_map(|f| by_folder.get(f.as_str()).copied())
                .collect();
            let spec = generate_task_spec(&SpecContext {
                feature,
                task,
                dependencies,
                plan_tasks: &planned,
            });
            let record = TaskRecord::new(TaskOrigin::Plan, Some(depends_on));
            self.create(feature, &task.folder, &record, &spec)?;
            result.created.push(task.folder.clone());
        }

        info!(
            feature,
            created = result.created.len(),
            removed = result.removed.len(),
            kept = result.kept.len(),
            manual = result.manual.len(),
            "synced tasks from plan"
        );
        Ok(result)
    }
}
