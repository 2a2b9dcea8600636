//! Plan parsing and dependency-graph validation.
//!
//! A feature's `plan.md` is the source of truth for its task set. This module
//! turns it into [`ParsedTask`]s, resolves implicit dependencies and rejects
//! broken graphs before any task file is written.
//!
//! ## Example
//!
//! ```
//! use hive::plan::{parse_plan, resolve_depends_on, validate_plan};
//!
//! let plan = "### 1. Setup\n\n### 2. Core\n**Depends on:** 1\n\n### 3. Docs\nDepends on: 1, 2\n";
//! let tasks = parse_plan(plan);
//! validate_plan(&tasks).unwrap();
//!
//! let deps = resolve_depends_on(&tasks);
//! assert_eq!(deps["03-docs"], vec!["01-setup", "02-core"]);
//! ```

mod graph;
mod parser;
mod spec_gen;

pub use graph::{
    Adjacency, CycleCheck, check_cycles, dependency_numbers, resolve_depends_on, validate_plan,
};
pub use parser::{ParsedTask, folder_order, parse_depends_line, parse_plan, task_folder};
pub use spec_gen::{SpecContext, generate_manual_spec, generate_task_spec};
