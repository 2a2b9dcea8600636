//! Subtasks: numbered steps (`2.1`, `2.2`, ...) inside a task folder.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::types::{Subtask, SubtaskRecord, SubtaskType, TaskStatus};
use crate::errors::{StorageError, TaskError};
use crate::paths::HivePaths;
use crate::storage::{JsonStore, deep_merge, read_json, write_atomic};
use crate::util::slugify;

const SUBTASK_SLUG_LEN: usize = 40;

/// Subtask operations for every task under one project root.
#[derive(Debug, Clone)]
pub struct SubtaskService {
    paths: HivePaths,
    store: JsonStore,
}

impl SubtaskService {
    pub fn new(paths: HivePaths, store: JsonStore) -> Self {
        Self { paths, store }
    }

    /// Create the next subtask of `task`. Numbering runs under a lock on the
    /// task's subtask directory.
    pub fn create(
        &self,
        feature: &str,
        task: &str,
        name: &str,
        subtask_type: Option<SubtaskType>,
        description: &str,
    ) -> Result<Subtask, TaskError> {
        if !self.paths.task_status(feature, task).exists() {
            return Err(TaskError::NotFound {
                feature: feature.to_string(),
                task: task.to_string(),
            });
        }
        if name.trim().is_empty() {
            return Err(TaskError::InvalidName {
                name: name.to_string(),
                reason: "subtask name cannot be empty".to_string(),
            });
        }

        let _numbering = self
            .store
            .locks()
            .acquire(&self.paths.subtasks_dir(feature, task))
            .map_err(StorageError::from)?;

        let task_order = crate::plan::folder_order(task).unwrap_or(0);
        let next = self
            .list(feature, task)?
            .iter()
            .filter_map(|s| subtask_order(&s.folder))
            .max()
            .unwrap_or(0)
            + 1;
        let slug = slugify(name, SUBTASK_SLUG_LEN);
        let folder = if slug.is_empty() {
            format!("{}-subtask", next)
        } else {
            format!("{}-{}", next, slug)
        };

        let record = SubtaskRecord {
            id: format!("{}.{}", task_order, next),
            name: name.trim().to_string(),
            status: TaskStatus::Pending,
            subtask_type,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            summary: None,
        };
        let status_path = self.paths.subtask_status(feature, task, &folder);
        let value = serde_json::to_value(&record).map_err(|source| TaskError::Json {
            path: status_path.clone(),
            source,
        })?;
        self.store.write_locked(&status_path, &value)?;
        write_atomic(
            &self.paths.subtask_spec(feature, task, &folder),
            subtask_spec(&record, task, description).as_bytes(),
        )?;

        debug!(feature, task, subtask = %record.id, "created subtask");
        Ok(Subtask { folder, record })
    }

    /// All subtasks of a task in numeric order.
    pub fn list(&self, feature: &str, task: &str) -> Result<Vec<Subtask>, TaskError> {
        let dir = self.paths.subtasks_dir(feature, task);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TaskError::io(&dir, e)),
        };

        let mut subtasks = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TaskError::io(&dir, e))?;
            let Some(folder) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let status_path = self.paths.subtask_status(feature, task, &folder);
            if !status_path.exists() {
                continue;
            }
            let record = read_subtask(&status_path)?;
            subtasks.push(Subtask { folder, record });
        }
        subtasks.sort_by_key(|s| (subtask_order(&s.folder).unwrap_or(u32::MAX), s.folder.clone()));
        Ok(subtasks)
    }

    /// Look up a subtask by id (`"2.1"`), folder (`"1-write-tests"`) or
    /// bare number (`"1"`).
    pub fn get(&self, feature: &str, task: &str, subtask: &str) -> Result<Subtask, TaskError> {
        self.list(feature, task)?
            .into_iter()
            .find(|s| {
                s.record.id == subtask
                    || s.folder == subtask
                    || subtask_order(&s.folder).is_some_and(|n| n.to_string() == subtask)
            })
            .ok_or_else(|| TaskError::SubtaskNotFound {
                task: task.to_string(),
                subtask: subtask.to_string(),
            })
    }

    /// Update a subtask's status and summary, stamping `startedAt` and
    /// `completedAt` once, the same way task updates do.
    pub fn update(
        &self,
        feature: &str,
        task: &str,
        subtask: &str,
        status: Option<TaskStatus>,
        summary: Option<String>,
    ) -> Result<Subtask, TaskError> {
        let folder = self.get(feature, task, subtask)?.folder;
        let status_path = self.paths.subtask_status(feature, task, &folder);

        let next = self.store.update_locked(&status_path, |mut current| {
            if !current.is_object() {
                return Err(TaskError::from(StorageError::NotAnObject {
                    path: status_path.clone(),
                }));
            }
            let record = subtask_from_value(&status_path, current.clone())?;
            let mut patch = Map::new();
            let now = Utc::now();
            if let Some(status) = status {
                patch.insert("status".into(), json!(status));
                if status == TaskStatus::InProgress && record.started_at.is_none() {
                    patch.insert("startedAt".into(), json!(now));
                }
                if status == TaskStatus::Done && record.completed_at.is_none() {
                    patch.insert("completedAt".into(), json!(now));
                }
            }
            if let Some(summary) = &summary {
                patch.insert("summary".into(), json!(summary));
            }
            deep_merge(&mut current, Value::Object(patch));
            Ok(current)
        })?;

        Ok(Subtask {
            folder,
            record: subtask_from_value(&status_path, next)?,
        })
    }

    pub fn delete(&self, feature: &str, task: &str, subtask: &str) -> Result<(), TaskError> {
        let folder = self.get(feature, task, subtask)?.folder;
        let dir = self.paths.subtask_dir(feature, task, &folder);
        fs::remove_dir_all(&dir).map_err(|e| TaskError::io(&dir, e))
    }

    pub fn read_spec(&self, feature: &str, task: &str, subtask: &str) -> Result<String, TaskError> {
        let folder = self.get(feature, task, subtask)?.folder;
        let path = self.paths.subtask_spec(feature, task, &folder);
        fs::read_to_string(&path).map_err(|e| TaskError::io(&path, e))
    }

    pub fn write_report(&self, feature: &str, task: &str, subtask: &str, report: &str) -> Result<(), TaskError> {
        let folder = self.get(feature, task, subtask)?.folder;
        write_atomic(&self.paths.subtask_report(feature, task, &folder), report.as_bytes())?;
        Ok(())
    }

    pub fn read_report(&self, feature: &str, task: &str, subtask: &str) -> Result<Option<String>, TaskError> {
        let folder = self.get(feature, task, subtask)?.folder;
        let path = self.paths.subtask_report(feature, task, &folder);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TaskError::io(&path, e)),
        }
    }
}

fn subtask_order(folder: &str) -> Option<u32> {
    folder.split('-').next()?.parse().ok()
}

fn read_subtask(path: &Path) -> Result<SubtaskRecord, TaskError> {
    subtask_from_value(path, read_json(path)?)
}

fn subtask_from_value(path: &Path, value: Value) -> Result<SubtaskRecord, TaskError> {
    serde_json::from_value(value).map_err(|source| TaskError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn subtask_spec(record: &SubtaskRecord, task: &str, description: &str) -> String {
    let mut lines = vec![format!("# Subtask {}: {}", record.id, record.name), String::new()];
    lines.push(format!("> Task: {}", task));
    if let Some(kind) = record.subtask_type {
        lines.push(format!("> Type: {}", kind));
    }
    lines.push(String::new());
    lines.push("## Description".to_string());
    lines.push(String::new());
    if description.trim().is_empty() {
        lines.push("_No description provided._".to_string());
    } else {
        lines.push(description.trim().to_string());
    }
    lines.push(String::new());
    lines.join("\n")
}
