//! Task and subtask records as stored in `status.json`.
//!
//! A task record is split into two disjoint field groups with separate
//! writers:
//!
//! | Group                | Fields                                   | Writer                       |
//! |----------------------|------------------------------------------|------------------------------|
//! | [`CompletionFields`] | `status`, `summary`, `completedAt`       | `TaskService::update`        |
//! | [`BackgroundFields`] | `idempotencyKey`, `workerSession`        | `TaskService::patch_background_fields` |
//!
//! Both groups are flattened, so the file on disk is a single flat object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task or subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Cancelled,
}

impl TaskStatus {
    /// Whether this status satisfies a dependency edge.
    pub fn satisfies_dependency(&self) -> bool {
        matches!(self, TaskStatus::Done)
    }

    /// Whether sync must leave the task alone.
    pub fn is_active_or_done(&self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::Done)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => anyhow::bail!(
                "Invalid task status '{}'. Valid values: pending, in_progress, done, cancelled",
                s
            ),
        }
    }
}

/// Where a task came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOrigin {
    /// Created by sync from plan.md
    #[default]
    Plan,
    /// Created by hand; sync never touches it
    Manual,
}

/// Fields owned by whoever completes the task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionFields {
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Heartbeat information about the worker currently running a task.
///
/// Every field is optional so the same type serves as a partial patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// Fields owned by background writers (heartbeats, retry bookkeeping).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_session: Option<WorkerSession>,
}

/// Schema version written for newly created records.
pub const INITIAL_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    INITIAL_SCHEMA_VERSION
}

/// The full `status.json` record of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(default)]
    pub origin: TaskOrigin,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_commit: Option<String>,
    /// `None` means the implicit predecessor rule applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    #[serde(flatten)]
    pub completion: CompletionFields,
    #[serde(flatten)]
    pub background: BackgroundFields,
}

impl TaskRecord {
    /// A fresh pending record.
    pub fn new(origin: TaskOrigin, depends_on: Option<Vec<String>>) -> Self {
        Self {
            origin,
            schema_version: INITIAL_SCHEMA_VERSION,
            started_at: None,
            base_commit: None,
            depends_on,
            completion: CompletionFields::default(),
            background: BackgroundFields::default(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.completion.status
    }
}

/// A task folder together with its record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub folder: String,
    #[serde(flatten)]
    pub record: TaskRecord,
}

impl Task {
    pub fn status(&self) -> TaskStatus {
        self.record.status()
    }

    /// Ordinal parsed from the folder prefix.
    pub fn order(&self) -> Option<u32> {
        crate::plan::folder_order(&self.folder)
    }
}

/// Input to a completion-owned status update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub summary: Option<String>,
    pub base_commit: Option<String>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_base_commit(mut self, sha: impl Into<String>) -> Self {
        self.base_commit = Some(sha.into());
        self
    }
}

/// Input to a background-owned patch. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_session: Option<WorkerSession>,
}

/// Kind of step a subtask represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtaskType {
    Test,
    Implement,
    Review,
    Verify,
    Research,
    Debug,
    Custom,
}

impl std::fmt::Display for SubtaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubtaskType::Test => "test",
            SubtaskType::Implement => "implement",
            SubtaskType::Review => "review",
            SubtaskType::Verify => "verify",
            SubtaskType::Research => "research",
            SubtaskType::Debug => "debug",
            SubtaskType::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SubtaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "test" => Ok(SubtaskType::Test),
            "implement" => Ok(SubtaskType::Implement),
            "review" => Ok(SubtaskType::Review),
            "verify" => Ok(SubtaskType::Verify),
            "research" => Ok(SubtaskType::Research),
            "debug" => Ok(SubtaskType::Debug),
            "custom" => Ok(SubtaskType::Custom),
            _ => anyhow::bail!(
                "Invalid subtask type '{}'. Valid values: test, implement, review, verify, research, debug, custom",
                s
            ),
        }
    }
}

/// The `status.json` record of a subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskRecord {
    /// `<taskOrder>.<subtaskOrder>`, e.g. `"2.1"`
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub subtask_type: Option<SubtaskType>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// A subtask folder together with its record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subtask {
    pub folder: String,
    #[serde(flatten)]
    pub record: SubtaskRecord,
}
