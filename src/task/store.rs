//! Task records on disk: queries, creation and the two field-owner update
//! entry points.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::types::{BackgroundPatch, Task, TaskOrigin, TaskRecord, TaskStatus, TaskUpdate};
use crate::errors::{StorageError, TaskError};
use crate::paths::HivePaths;
use crate::plan::{generate_manual_spec, task_folder};
use crate::storage::{JsonStore, deep_merge, write_atomic};
use crate::util::validate_name;

/// Reads and mutates the tasks of every feature under one project root.
#[derive(Debug, Clone)]
pub struct TaskService {
    pub(crate) paths: HivePaths,
    pub(crate) store: JsonStore,
}

impl TaskService {
    pub fn new(paths: HivePaths, store: JsonStore) -> Self {
        Self { paths, store }
    }

    pub fn paths(&self) -> &HivePaths {
        &self.paths
    }

    pub fn store(&self) -> &JsonStore {
        &self.store
    }

    /// All tasks of a feature, sorted by folder name (= declared order).
    ///
    /// Folders without a `status.json` are skipped.
    pub fn list(&self, feature: &str) -> Result<Vec<Task>, TaskError> {
        let tasks_dir = self.paths.tasks_dir(feature);
        let entries = match fs::read_dir(&tasks_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TaskError::io(&tasks_dir, e)),
        };

        let mut folders = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TaskError::io(&tasks_dir, e))?;
            if entry.path().is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                folders.push(name.to_string());
            }
        }
        folders.sort();

        let mut tasks = Vec::with_capacity(folders.len());
        for folder in folders {
            let status_path = self.paths.task_status(feature, &folder);
            if !status_path.exists() {
                debug!(feature, folder = %folder, "skipping task folder without status.json");
                continue;
            }
            let record = read_record(&status_path)?;
            tasks.push(Task { folder, record });
        }
        Ok(tasks)
    }

    /// A single task.
    pub fn get(&self, feature: &str, task: &str) -> Result<Task, TaskError> {
        let status_path = self.paths.task_status(feature, task);
        if !status_path.exists() {
            return Err(not_found(feature, task));
        }
        Ok(Task {
            folder: task.to_string(),
            record: read_record(&status_path)?,
        })
    }

    pub fn exists(&self, feature: &str, task: &str) -> bool {
        self.paths.task_status(feature, task).exists()
    }

    /// Write a new task folder with its record and brief.
    pub(crate) fn create(
        &self,
        feature: &str,
        folder: &str,
        record: &TaskRecord,
        spec: &str,
    ) -> Result<Task, TaskError> {
        validate_name(folder).map_err(|reason| TaskError::InvalidName {
            name: folder.to_string(),
            reason,
        })?;
        let status_path = self.paths.task_status(feature, folder);
        let value = serde_json::to_value(record).map_err(|source| TaskError::Json {
            path: status_path.clone(),
            source,
        })?;
        self.store.write_locked(&status_path, &value)?;
        write_atomic(&self.paths.task_spec(feature, folder), spec.as_bytes())?;
        Ok(Task {
            folder: folder.to_string(),
            record: record.clone(),
        })
    }

    /// Delete a task folder and everything in it.
    pub fn delete(&self, feature: &str, task: &str) -> Result<(), TaskError> {
        let dir = self.paths.task_dir(feature, task);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(feature, task)),
            Err(e) => Err(TaskError::io(&dir, e)),
        }
    }

    /// Create a task by hand, outside of `plan.md`.
    ///
    /// The task takes the next free ordinal and is never touched by sync.
    /// Ordinals are handed out under the feature's sync lock.
    /// `depends_on` of `None` leaves the implicit predecessor rule in effect.
    pub fn create_manual(
        &self,
        feature: &str,
        name: &str,
        description: &str,
        depends_on: Option<Vec<String>>,
    ) -> Result<Task, TaskError> {
        if name.trim().is_empty() {
            return Err(TaskError::InvalidName {
                name: name.to_string(),
                reason: "task name cannot be empty".to_string(),
            });
        }
        if !self.paths.feature_dir(feature).exists() {
            return Err(TaskError::FeatureNotFound {
                feature: feature.to_string(),
            });
        }

        // Numbering and folder creation share the sync lock, so concurrent
        // manual creates and syncs never pick the same ordinal.
        let _numbering = self
            .store
            .locks()
            .acquire(&self.paths.sync_lock_resource(feature))
            .map_err(StorageError::from)?;

        let existing = self.list(feature)?;
        if let Some(deps) = &depends_on
            && let Some(missing) = deps.iter().find(|d| !existing.iter().any(|t| &t.folder == *d))
        {
            return Err(not_found(feature, missing));
        }

        let next = next_free_order(&existing);
        let folder = task_folder(next, name);
        let record = TaskRecord::new(TaskOrigin::Manual, depends_on.clone());
        let spec = generate_manual_spec(
            feature,
            &folder,
            name.trim(),
            description,
            depends_on.as_deref().unwrap_or(&[]),
        );
        let task = self.create(feature, &folder, &record, &spec)?;
        info!(feature, task = %folder, "created manual task");
        Ok(task)
    }

    /// Update the completion-owned fields of a task.
    ///
    /// Runs as a locked read-modify-write: entering `in_progress` stamps
    /// `startedAt` and entering `done` stamps `completedAt`, each only once.
    /// `schemaVersion` is bumped on every call. Keys this crate does not know
    /// about survive the update.
    pub fn update(&self, feature: &str, task: &str, update: TaskUpdate) -> Result<Task, TaskError> {
        let status_path = self.paths.task_status(feature, task);
        if !status_path.exists() {
            return Err(not_found(feature, task));
        }

        let next = self.store.update_locked(&status_path, |mut current| {
            let record = record_from_value(&status_path, current.clone())?;
            let patch = completion_patch(&record, &update);
            ensure_object(&status_path, &current)?;
            deep_merge(&mut current, patch);
            Ok::<_, TaskError>(current)
        })?;

        debug!(feature, task, status = ?update.status, "updated task");
        Ok(Task {
            folder: task.to_string(),
            record: record_from_value(&status_path, next)?,
        })
    }

    /// Patch the background-owned fields of a task.
    ///
    /// Only `idempotencyKey` and `workerSession` are written; the session is
    /// deep merged so a heartbeat can update a single field.
    pub fn patch_background_fields(
        &self,
        feature: &str,
        task: &str,
        patch: BackgroundPatch,
    ) -> Result<Task, TaskError> {
        let status_path = self.paths.task_status(feature, task);
        if !status_path.exists() {
            return Err(not_found(feature, task));
        }
        let patch = serde_json::to_value(&patch).map_err(|source| TaskError::Json {
            path: status_path.clone(),
            source,
        })?;
        let next = self.store.patch_locked(&status_path, patch)?;
        Ok(Task {
            folder: task.to_string(),
            record: record_from_value(&status_path, next)?,
        })
    }

    /// The task brief (`spec.md`).
    pub fn read_spec(&self, feature: &str, task: &str) -> Result<String, TaskError> {
        self.read_task_file(feature, task, &self.paths.task_spec(feature, task))
    }

    /// Write the task's `report.md`, replacing any previous report.
    pub fn write_report(&self, feature: &str, task: &str, report: &str) -> Result<(), TaskError> {
        if !self.paths.task_dir(feature, task).exists() {
            return Err(not_found(feature, task));
        }
        write_atomic(&self.paths.task_report(feature, task), report.as_bytes())?;
        Ok(())
    }

    /// The task's `report.md`, `None` if no report was written yet.
    pub fn read_report(&self, feature: &str, task: &str) -> Result<Option<String>, TaskError> {
        let path = self.paths.task_report(feature, task);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if self.paths.task_dir(feature, task).exists() {
                    Ok(None)
                } else {
                    Err(not_found(feature, task))
                }
            }
            Err(e) => Err(TaskError::io(&path, e)),
        }
    }

    fn read_task_file(&self, feature: &str, task: &str, path: &Path) -> Result<String, TaskError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(feature, task)),
            Err(e) => Err(TaskError::io(path, e)),
        }
    }

    /// Ordinal the next manual task would take.
    pub fn next_order(&self, feature: &str) -> Result<u32, TaskError> {
        Ok(next_free_order(&self.list(feature)?))
    }
}

fn next_free_order(tasks: &[Task]) -> u32 {
    tasks.iter().filter_map(Task::order).max().unwrap_or(0) + 1
}

fn not_found(feature: &str, task: &str) -> TaskError {
    TaskError::NotFound {
        feature: feature.to_string(),
        task: task.to_string(),
    }
}

fn read_record(path: &Path) -> Result<TaskRecord, TaskError> {
    let value = crate::storage::read_json(path)?;
    record_from_value(path, value)
}

fn record_from_value(path: &Path, value: Value) -> Result<TaskRecord, TaskError> {
    serde_json::from_value(value).map_err(|source| TaskError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn ensure_object(path: &Path, value: &Value) -> Result<(), TaskError> {
    if value.is_object() {
        Ok(())
    } else {
        Err(StorageError::NotAnObject {
            path: path.to_path_buf(),
        }
        .into())
    }
}

/// The JSON patch a completion-owned update applies to `record`.
fn completion_patch(record: &TaskRecord, update: &TaskUpdate) -> Value {
    let mut patch = Map::new();
    let now = Utc::now();

    if let Some(status) = update.status {
        patch.insert("status".into(), json!(status));
        if status == TaskStatus::InProgress && record.started_at.is_none() {
            patch.insert("startedAt".into(), json!(now));
        }
        if status == TaskStatus::Done && record.completion.completed_at.is_none() {
            patch.insert("completedAt".into(), json!(now));
        }
    }
    if let Some(summary) = &update.summary {
        patch.insert("summary".into(), json!(summary));
    }
    if let Some(sha) = &update.base_commit {
        patch.insert("baseCommit".into(), json!(sha));
    }
    patch.insert("schemaVersion".into(), json!(record.schema_version + 1));
    Value::Object(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LockOptions, lock_path_for, read_json};
    use crate::task::WorkerSession;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TaskService) {
        let dir = TempDir::new().unwrap();
        let paths = HivePaths::new(dir.path());
        fs::create_dir_all(paths.feature_dir("auth")).unwrap();
        let store = JsonStore::with_options(LockOptions {
            timeout: Duration::from_secs(10),
            retry_interval: Duration::from_millis(2),
            stale_lock_ttl: Duration::from_secs(60),
        });
        (dir, TaskService::new(paths, store))
    }

    fn seed(service: &TaskService, folder: &str) {
        service
            .create("auth", folder, &TaskRecord::new(TaskOrigin::Plan, Some(vec![])), "# spec\n")
            .unwrap();
    }

    #[test]
    fn test_create_list_get() {
        let (_dir, service) = setup();
        seed(&service, "02-core");
        seed(&service, "01-setup");

        let tasks = service.list("auth").unwrap();
        let folders: Vec<_> = tasks.iter().map(|t| t.folder.as_str()).collect();
        assert_eq!(folders, vec!["01-setup", "02-core"]);

        let task = service.get("auth", "01-setup").unwrap();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(service.read_spec("auth", "01-setup").unwrap(), "# spec\n");
    }

    #[test]
    fn test_list_missing_feature_is_empty() {
        let (_dir, service) = setup();
        assert!(service.list("nope").unwrap().is_empty());
    }

    #[test]
    fn test_get_missing_task() {
        let (_dir, service) = setup();
        assert!(matches!(
            service.get("auth", "09-ghost"),
            Err(TaskError::NotFound { .. })
        ));
    }

    #[test]
    fn test_update_stamps_started_and_completed_once() {
        let (_dir, service) = setup();
        seed(&service, "01-setup");

        let started = service
            .update("auth", "01-setup", TaskUpdate::status(TaskStatus::InProgress))
            .unwrap();
        let first_start = started.record.started_at.unwrap();
        assert_eq!(started.record.schema_version, 2);

        let again = service
            .update("auth", "01-setup", TaskUpdate::status(TaskStatus::InProgress))
            .unwrap();
        assert_eq!(again.record.started_at, Some(first_start));

        let done = service
            .update(
                "auth",
                "01-setup",
                TaskUpdate::status(TaskStatus::Done).with_summary("Scaffolded"),
            )
            .unwrap();
        let completed = done.record.completion.completed_at.unwrap();
        assert_eq!(done.record.completion.summary.as_deref(), Some("Scaffolded"));
        assert_eq!(done.record.schema_version, 4);

        let redo = service
            .update("auth", "01-setup", TaskUpdate::status(TaskStatus::Done))
            .unwrap();
        assert_eq!(redo.record.completion.completed_at, Some(completed));
        assert_eq!(redo.record.started_at, Some(first_start));
    }

    #[test]
    fn test_update_preserves_unknown_keys_and_background_fields() {
        let (_dir, service) = setup();
        seed(&service, "01-setup");
        let path = service.paths.task_status("auth", "01-setup");
        service
            .store
            .patch_locked(&path, json!({"customNote": "keep me", "idempotencyKey": "k"}))
            .unwrap();

        service
            .update("auth", "01-setup", TaskUpdate::status(TaskStatus::Done).with_base_commit("abc123"))
            .unwrap();

        let raw = read_json(&path).unwrap();
        assert_eq!(raw["customNote"], "keep me");
        assert_eq!(raw["idempotencyKey"], "k");
        assert_eq!(raw["baseCommit"], "abc123");
        assert_eq!(raw["status"], "done");
    }

    #[test]
    fn test_update_missing_task_writes_nothing() {
        let (_dir, service) = setup();
        let err = service
            .update("auth", "07-ghost", TaskUpdate::status(TaskStatus::Done))
            .unwrap_err();
        assert!(matches!(err, TaskError::NotFound { .. }));
        assert!(!service.paths.task_dir("auth", "07-ghost").exists());
    }

    #[test]
    fn test_background_patch_never_touches_completion_fields() {
        let (_dir, service) = setup();
        seed(&service, "01-setup");
        service
            .update("auth", "01-setup", TaskUpdate::status(TaskStatus::InProgress).with_summary("working"))
            .unwrap();

        let patched = service
            .patch_background_fields(
                "auth",
                "01-setup",
                BackgroundPatch {
                    idempotency_key: Some("run-1".into()),
                    worker_session: Some(WorkerSession {
                        session_id: Some("s1".into()),
                        attempt: Some(1),
                        ..Default::default()
                    }),
                },
            )
            .unwrap();
        assert_eq!(patched.status(), TaskStatus::InProgress);
        assert_eq!(patched.record.completion.summary.as_deref(), Some("working"));

        // A heartbeat updates one session field and keeps the rest.
        let beat = service
            .patch_background_fields(
                "auth",
                "01-setup",
                BackgroundPatch {
                    idempotency_key: None,
                    worker_session: Some(WorkerSession {
                        message_count: Some(12),
                        ..Default::default()
                    }),
                },
            )
            .unwrap();
        let session = beat.record.background.worker_session.unwrap();
        assert_eq!(session.session_id.as_deref(), Some("s1"));
        assert_eq!(session.message_count, Some(12));
        assert_eq!(beat.record.background.idempotency_key.as_deref(), Some("run-1"));
    }

    #[test]
    fn test_ten_sequential_background_patches_last_wins() {
        let (_dir, service) = setup();
        seed(&service, "01-setup");
        for i in 0..10 {
            service
                .patch_background_fields(
                    "auth",
                    "01-setup",
                    BackgroundPatch {
                        idempotency_key: Some(format!("key-{i}")),
                        worker_session: Some(WorkerSession {
                            attempt: Some(i),
                            ..Default::default()
                        }),
                    },
                )
                .unwrap();
        }
        let path = service.paths.task_status("auth", "01-setup");
        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["idempotencyKey"], "key-9");
        assert_eq!(raw["workerSession"]["attempt"], 9);
        assert_eq!(raw["status"], "pending");
        assert!(!lock_path_for(&path).exists());
    }

    #[test]
    fn test_interleaved_update_and_background_patch() {
        let (_dir, service) = setup();
        seed(&service, "01-setup");
        let service = Arc::new(service);

        let updater = {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                for _ in 0..15 {
                    service
                        .update("auth", "01-setup", TaskUpdate::status(TaskStatus::InProgress).with_summary("busy"))
                        .unwrap();
                }
            })
        };
        let patcher = {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                for i in 0..15u32 {
                    service
                        .patch_background_fields(
                            "auth",
                            "01-setup",
                            BackgroundPatch {
                                idempotency_key: Some(format!("k{i}")),
                                worker_session: None,
                            },
                        )
                        .unwrap();
                }
            })
        };
        updater.join().unwrap();
        patcher.join().unwrap();

        let task = service.get("auth", "01-setup").unwrap();
        assert_eq!(task.status(), TaskStatus::InProgress);
        assert_eq!(task.record.completion.summary.as_deref(), Some("busy"));
        assert_eq!(task.record.background.idempotency_key.as_deref(), Some("k14"));
        assert_eq!(task.record.schema_version, 16);
    }

    #[test]
    fn test_create_manual_takes_next_ordinal() {
        let (_dir, service) = setup();
        seed(&service, "01-setup");
        seed(&service, "02-core");

        let task = service
            .create_manual("auth", "Hotfix login", "Patch the redirect", Some(vec!["01-setup".into()]))
            .unwrap();
        assert_eq!(task.folder, "03-hotfix-login");
        assert_eq!(task.record.origin, TaskOrigin::Manual);
        assert_eq!(task.record.depends_on, Some(vec!["01-setup".to_string()]));
        assert!(service.read_spec("auth", "03-hotfix-login").unwrap().contains("Patch the redirect"));
        assert_eq!(service.next_order("auth").unwrap(), 4);
    }

    #[test]
    fn test_concurrent_manual_creates_get_distinct_ordinals() {
        let (_dir, service) = setup();
        let service = Arc::new(service);
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let service = Arc::clone(&service);
                thread::spawn(move || service.create_manual("auth", "Hotfix", "", None).unwrap().folder)
            })
            .collect();

        let mut folders: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        folders.sort();
        folders.dedup();
        assert_eq!(folders.len(), 6);
        assert_eq!(service.list("auth").unwrap().len(), 6);
    }

    #[test]
    fn test_create_manual_rejects_unknown_dependency() {
        let (_dir, service) = setup();
        let err = service
            .create_manual("auth", "Hotfix", "", Some(vec!["05-missing".into()]))
            .unwrap_err();
        assert!(matches!(err, TaskError::NotFound { ref task, .. } if task == "05-missing"));
    }

    #[test]
    fn test_create_manual_requires_feature() {
        let (_dir, service) = setup();
        assert!(matches!(
            service.create_manual("billing", "Hotfix", "", None),
            Err(TaskError::FeatureNotFound { .. })
        ));
    }

    #[test]
    fn test_reports() {
        let (_dir, service) = setup();
        seed(&service, "01-setup");
        assert_eq!(service.read_report("auth", "01-setup").unwrap(), None);
        service.write_report("auth", "01-setup", "# Report\nAll good\n").unwrap();
        assert_eq!(
            service.read_report("auth", "01-setup").unwrap().as_deref(),
            Some("# Report\nAll good\n")
        );
        assert!(service.write_report("auth", "99-nope", "x").is_err());
    }

    #[test]
    fn test_delete() {
        let (_dir, service) = setup();
        seed(&service, "01-setup");
        service.delete("auth", "01-setup").unwrap();
        assert!(!service.exists("auth", "01-setup"));
        assert!(matches!(service.delete("auth", "01-setup"), Err(TaskError::NotFound { .. })));
    }
}
