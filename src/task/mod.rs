//! Task state: records, plan sync, scheduling and subtasks.
//!
//! Every write goes through [`crate::storage::JsonStore`], so several
//! processes may work on the same feature at once.

mod schedule;
mod store;
mod subtask;
mod sync;
mod types;

pub use schedule::{BlockedTask, Schedule, compute_schedule, compute_waves, effective_dependencies};
pub use store::TaskService;
pub use subtask::SubtaskService;
pub use sync::SyncResult;
pub use types::{
    BackgroundFields, BackgroundPatch, CompletionFields, INITIAL_SCHEMA_VERSION, Subtask, SubtaskRecord,
    SubtaskType, Task, TaskOrigin, TaskRecord, TaskStatus, TaskUpdate, WorkerSession,
};
