//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module      | Commands handled                              |
//! |-------------|-----------------------------------------------|
//! | `feature`   | `Feature`                                     |
//! | `task`      | `Sync`, `Task`                                |
//! | `schedule`  | `Schedule`                                    |
//! | `subtask`   | `Subtask`                                     |
//! | `worktree`  | `Worktree`                                    |
//! | `lifecycle` | `Start`, `Complete`, `Integrate`, `Abort`     |

pub mod feature;
pub mod lifecycle;
pub mod schedule;
pub mod subtask;
pub mod task;
pub mod worktree;

pub use feature::cmd_feature;
pub use lifecycle::{cmd_abort, cmd_complete, cmd_integrate, cmd_start};
pub use schedule::cmd_schedule;
pub use subtask::cmd_subtask;
pub use task::{cmd_sync, cmd_task};
pub use worktree::cmd_worktree;

use anyhow::{Context, Result};
use console::StyledObject;
use serde::Serialize;

use hive::task::TaskStatus;

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", out);
    Ok(())
}

pub(crate) fn styled_status(status: TaskStatus) -> StyledObject<String> {
    let label = status.to_string();
    match status {
        TaskStatus::Pending => console::style(label).dim(),
        TaskStatus::InProgress => console::style(label).yellow(),
        TaskStatus::Done => console::style(label).green(),
        TaskStatus::Cancelled => console::style(label).red(),
    }
}
